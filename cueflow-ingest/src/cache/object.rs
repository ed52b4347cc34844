//! Write-optional singleton cache
//!
//! Handles the zero-or-one root document (e.g. the Rundown itself),
//! including the "didn't exist, still doesn't" no-op case.

use crate::cache::changes::WriteOp;
use crate::cache::doc::{docs_equal, CacheDoc};
use crate::error::{fatal_defect, Error, Result};
use crate::locks::LockToken;
use std::sync::atomic::Ordering;

pub struct WriteOptionalObject<T: CacheDoc> {
    name: &'static str,
    original: Option<T>,
    current: Option<T>,
    token: LockToken,
}

impl<T: CacheDoc> WriteOptionalObject<T> {
    pub fn from_doc(name: &'static str, doc: Option<T>, token: LockToken) -> Result<Self> {
        if !token.load(Ordering::SeqCst) {
            return Err(Error::LockReleased(format!(
                "cannot load {} object after lock release",
                name
            )));
        }
        Ok(Self {
            name,
            original: doc.clone(),
            current: doc,
            token,
        })
    }

    pub fn get(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.current.is_some()
    }

    /// Set (insert or replace) the document.
    pub fn set(&mut self, doc: T) {
        self.current = Some(doc);
    }

    /// Mutate the document in place; error when it does not exist.
    /// Returns true when the mutator actually changed it.
    pub fn update(&mut self, mutate: impl FnOnce(&mut T)) -> Result<bool> {
        let doc = self
            .current
            .as_mut()
            .ok_or_else(|| Error::NotFound(self.name.to_string()))?;
        let before = doc.clone();
        mutate(doc);
        Ok(!docs_equal(&before, doc))
    }

    pub fn remove(&mut self) {
        self.current = None;
    }

    pub fn has_changes(&self) -> bool {
        match (&self.original, &self.current) {
            (None, None) => false,
            (Some(orig), Some(cur)) => !docs_equal(orig, cur),
            _ => true,
        }
    }

    pub fn discard_changes(&mut self) {
        self.current = self.original.clone();
    }

    pub fn assert_no_changes(&mut self) {
        if self.has_changes() {
            fatal_defect(&format!(
                "object cache {} was mutated under a no-changes contract",
                self.name
            ));
            self.discard_changes();
        }
    }

    /// Compute the net write operation (if any) and reset tracking.
    pub fn take_write_ops(&mut self) -> Result<Vec<WriteOp<T>>> {
        if !self.token.load(Ordering::SeqCst) {
            return Err(Error::LockReleased(format!(
                "cannot save {} object after lock release",
                self.name
            )));
        }

        let ops = match (&self.original, &self.current) {
            (None, None) => Vec::new(),
            (Some(orig), Some(cur)) if docs_equal(orig, cur) => Vec::new(),
            (_, Some(cur)) => vec![WriteOp::Upsert(cur.clone())],
            (Some(orig), None) => vec![WriteOp::Delete(vec![orig.doc_id().clone()])],
        };

        self.original = self.current.clone();
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Rundown, RundownOrphaned};
    use cueflow_common::ids::{PlaylistId, RundownId};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn live_token() -> LockToken {
        Arc::new(AtomicBool::new(true))
    }

    fn rundown() -> Rundown {
        Rundown {
            id: RundownId::new("r1"),
            external_id: "RO1".to_string(),
            name: "Show".to_string(),
            playlist_id: PlaylistId::new("p1"),
            playlist_external_id: None,
            rank: 0.0,
            orphaned: None,
            modified: 0,
        }
    }

    #[test]
    fn test_absent_and_untouched_is_noop() {
        let mut obj: WriteOptionalObject<Rundown> =
            WriteOptionalObject::from_doc("rundown", None, live_token()).unwrap();
        assert!(!obj.has_changes());
        assert!(obj.take_write_ops().unwrap().is_empty());
    }

    #[test]
    fn test_insert_then_save_emits_upsert() {
        let mut obj = WriteOptionalObject::from_doc("rundown", None, live_token()).unwrap();
        obj.set(rundown());
        let ops = obj.take_write_ops().unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], WriteOp::Upsert(_)));
        // Reset: no further ops
        assert!(obj.take_write_ops().unwrap().is_empty());
    }

    #[test]
    fn test_remove_existing_emits_delete() {
        let mut obj =
            WriteOptionalObject::from_doc("rundown", Some(rundown()), live_token()).unwrap();
        obj.remove();
        let ops = obj.take_write_ops().unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], WriteOp::Delete(ids) if ids.len() == 1));
    }

    #[test]
    fn test_update_tracks_real_change_only() {
        let mut obj =
            WriteOptionalObject::from_doc("rundown", Some(rundown()), live_token()).unwrap();
        obj.update(|r| r.orphaned = None).unwrap();
        assert!(!obj.has_changes());
        obj.update(|r| r.orphaned = Some(RundownOrphaned::Deleted))
            .unwrap();
        assert!(obj.has_changes());
    }

    #[test]
    fn test_save_refused_after_lock_release() {
        let token = live_token();
        let mut obj =
            WriteOptionalObject::from_doc("rundown", Some(rundown()), token.clone()).unwrap();
        token.store(false, Ordering::SeqCst);
        assert!(matches!(obj.take_write_ops(), Err(Error::LockReleased(_))));
    }
}

//! In-memory mirror of a document-store query result set with per-document
//! dirty tracking (unit-of-work pattern)
//!
//! All mutation goes through the typed methods here, which compare-and-mark
//! rather than trusting callers to report what they touched. Saving
//! computes the diff against the original load and issues exactly the
//! upsert/delete operations needed, then resets the tracking.

use crate::cache::changes::{changes_for, ChangeTracker, WriteOp};
use crate::cache::doc::{docs_equal, CacheDoc};
use crate::error::{fatal_defect, Error, Result};
use crate::locks::LockToken;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::Ordering;

/// Writable unit-of-work collection cache
pub struct WriteCollection<T: CacheDoc> {
    /// Collection name, for error messages and defect reports
    name: &'static str,
    original: HashMap<T::Id, T>,
    current: BTreeMap<T::Id, T>,
    dirty: HashSet<T::Id>,
    token: LockToken,
}

impl<T: CacheDoc> WriteCollection<T> {
    /// Wrap a freshly loaded document set.
    ///
    /// Duplicate ids in the load are a programming error in the store
    /// layer and fail loudly instead of silently overwriting.
    pub fn from_docs(name: &'static str, docs: Vec<T>, token: LockToken) -> Result<Self> {
        if !token.load(Ordering::SeqCst) {
            return Err(Error::LockReleased(format!(
                "cannot load {} cache after lock release",
                name
            )));
        }

        let mut current = BTreeMap::new();
        for doc in docs {
            let id = doc.doc_id().clone();
            if current.insert(id.clone(), doc).is_some() {
                return Err(Error::DuplicateId(format!("{}/{}", name, id)));
            }
        }

        Ok(Self {
            name,
            original: current.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            current,
            dirty: HashSet::new(),
            token,
        })
    }

    pub fn empty(name: &'static str, token: LockToken) -> Self {
        Self {
            name,
            original: HashMap::new(),
            current: BTreeMap::new(),
            dirty: HashSet::new(),
            token,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn find_one(&self, id: &T::Id) -> Option<&T> {
        self.current.get(id)
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<&T> {
        self.current.values().filter(|d| predicate(d)).collect()
    }

    pub fn find_all(&self) -> Vec<&T> {
        self.current.values().collect()
    }

    pub fn ids(&self) -> Vec<T::Id> {
        self.current.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Insert a new document. An existing id is a programming error.
    pub fn insert(&mut self, doc: T) -> Result<()> {
        let id = doc.doc_id().clone();
        if self.current.contains_key(&id) {
            return Err(Error::DuplicateId(format!("{}/{}", self.name, id)));
        }
        self.dirty.insert(id.clone());
        self.current.insert(id, doc);
        Ok(())
    }

    /// Insert-or-replace. Marks dirty only when the content differs.
    pub fn upsert(&mut self, doc: T) {
        let id = doc.doc_id().clone();
        match self.current.get(&id) {
            Some(existing) if docs_equal(existing, &doc) => {}
            _ => {
                self.dirty.insert(id.clone());
                self.current.insert(id, doc);
            }
        }
    }

    /// Mutate one document in place. Returns true when the mutator
    /// actually changed it; an untouched document stays clean.
    pub fn update_one(&mut self, id: &T::Id, mutate: impl FnOnce(&mut T)) -> Result<bool> {
        let doc = self
            .current
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", self.name, id)))?;
        let before = doc.clone();
        mutate(doc);
        if docs_equal(&before, doc) {
            return Ok(false);
        }
        if doc.doc_id() != id {
            *doc = before;
            return Err(Error::Rejected(format!(
                "{}: mutator must not change the document id",
                self.name
            )));
        }
        self.dirty.insert(id.clone());
        Ok(true)
    }

    /// Mutate all documents matching a predicate. Returns how many changed.
    pub fn update(&mut self, predicate: impl Fn(&T) -> bool, mutate: impl Fn(&mut T)) -> usize {
        let ids: Vec<T::Id> = self
            .current
            .values()
            .filter(|d| predicate(d))
            .map(|d| d.doc_id().clone())
            .collect();
        let mut changed = 0;
        for id in ids {
            if matches!(self.update_one(&id, &mutate), Ok(true)) {
                changed += 1;
            }
        }
        changed
    }

    /// Remove all documents matching a predicate; returns the removed ids.
    pub fn remove(&mut self, predicate: impl Fn(&T) -> bool) -> Vec<T::Id> {
        let ids: Vec<T::Id> = self
            .current
            .values()
            .filter(|d| predicate(d))
            .map(|d| d.doc_id().clone())
            .collect();
        for id in &ids {
            self.current.remove(id);
            self.dirty.insert(id.clone());
        }
        ids
    }

    pub fn remove_by_id(&mut self, id: &T::Id) -> bool {
        if self.current.remove(id).is_some() {
            self.dirty.insert(id.clone());
            true
        } else {
            false
        }
    }

    /// Whether any net change exists against the original load.
    pub fn has_changes(&self) -> bool {
        self.dirty.iter().any(|id| self.id_changed(id))
    }

    fn id_changed(&self, id: &T::Id) -> bool {
        match (self.original.get(id), self.current.get(id)) {
            (Some(orig), Some(cur)) => !docs_equal(orig, cur),
            (None, None) => false,
            _ => true,
        }
    }

    /// Throw away all local mutations.
    pub fn discard_changes(&mut self) {
        self.current = self
            .original
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.dirty.clear();
    }

    /// Assert the read-only contract: this cache must not have been
    /// touched. A violation is a programming defect (debug panic,
    /// release log) and the changes are discarded to avoid persisting
    /// them.
    pub fn assert_no_changes(&mut self) {
        if self.has_changes() {
            fatal_defect(&format!(
                "cache {} was mutated under a no-changes contract",
                self.name
            ));
            self.discard_changes();
        }
    }

    /// Compute the minimal write operations and reset dirty tracking.
    pub fn take_write_ops(&mut self) -> Result<Vec<WriteOp<T>>> {
        if !self.token.load(Ordering::SeqCst) {
            return Err(Error::LockReleased(format!(
                "cannot save {} cache after lock release",
                self.name
            )));
        }

        // Touched-but-reverted ids drop out here; the tracker then turns
        // the net change set into one upsert per document plus a single
        // batched delete, in deterministic id order
        let net_changed: HashSet<T::Id> = self
            .dirty
            .iter()
            .filter(|id| self.id_changed(id))
            .cloned()
            .collect();
        let current_docs: Vec<T> = self.current.values().cloned().collect();

        let mut tracker = ChangeTracker::new();
        tracker.add_changes(changes_for(&net_changed, &current_docs), false);
        let ops = tracker.generate_write_ops();

        self.original = self
            .current
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.dirty.clear();
        Ok(ops)
    }
}

/// Read-only specialization: query methods only.
pub struct ReadCollection<T: CacheDoc> {
    docs: BTreeMap<T::Id, T>,
}

impl<T: CacheDoc> ReadCollection<T> {
    pub fn from_docs(docs: Vec<T>) -> Self {
        Self {
            docs: docs.into_iter().map(|d| (d.doc_id().clone(), d)).collect(),
        }
    }

    pub fn find_one(&self, id: &T::Id) -> Option<&T> {
        self.docs.get(id)
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<&T> {
        self.docs.values().filter(|d| predicate(d)).collect()
    }

    pub fn find_all(&self) -> Vec<&T> {
        self.docs.values().collect()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Piece;
    use cueflow_common::ids::{PartId, PieceId, RundownId};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn live_token() -> LockToken {
        Arc::new(AtomicBool::new(true))
    }

    fn piece(id: &str, name: &str) -> Piece {
        Piece {
            id: PieceId::new(id),
            part_id: PartId::new("part"),
            rundown_id: RundownId::new("rundown"),
            name: name.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    fn cache_with(docs: Vec<Piece>) -> WriteCollection<Piece> {
        WriteCollection::from_docs("pieces", docs, live_token()).unwrap()
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let result =
            WriteCollection::from_docs("pieces", vec![piece("a", "A"), piece("a", "A2")], live_token());
        assert!(matches!(result, Err(Error::DuplicateId(_))));
    }

    #[test]
    fn test_update_marks_dirty_only_on_real_change() {
        let mut cache = cache_with(vec![piece("a", "A")]);

        let changed = cache
            .update_one(&PieceId::new("a"), |p| p.name = "A".to_string())
            .unwrap();
        assert!(!changed);
        assert!(!cache.has_changes());

        let changed = cache
            .update_one(&PieceId::new("a"), |p| p.name = "B".to_string())
            .unwrap();
        assert!(changed);
        assert!(cache.has_changes());
    }

    #[test]
    fn test_save_emits_minimal_ops_and_resets() {
        let mut cache = cache_with(vec![piece("a", "A"), piece("b", "B"), piece("c", "C")]);
        cache
            .update_one(&PieceId::new("a"), |p| p.name = "A2".to_string())
            .unwrap();
        cache.remove_by_id(&PieceId::new("b"));
        cache.insert(piece("d", "D")).unwrap();
        // Touched but reverted: must not produce an op
        cache
            .update_one(&PieceId::new("c"), |p| p.name = "X".to_string())
            .unwrap();
        cache
            .update_one(&PieceId::new("c"), |p| p.name = "C".to_string())
            .unwrap();

        let ops = cache.take_write_ops().unwrap();
        assert_eq!(ops.len(), 3); // upsert a, upsert d, delete [b]
        let deletes: Vec<_> = ops
            .iter()
            .filter(|op| matches!(op, WriteOp::Delete(_)))
            .collect();
        assert_eq!(deletes.len(), 1);

        // Tracking reset: a second save is a no-op
        assert!(cache.take_write_ops().unwrap().is_empty());
        assert!(!cache.has_changes());
    }

    #[test]
    fn test_remove_then_reinsert_same_content_is_noop() {
        let mut cache = cache_with(vec![piece("a", "A")]);
        cache.remove_by_id(&PieceId::new("a"));
        cache.insert(piece("a", "A")).unwrap();
        assert!(!cache.has_changes());
        assert!(cache.take_write_ops().unwrap().is_empty());
    }

    #[test]
    fn test_discard_changes_restores_original() {
        let mut cache = cache_with(vec![piece("a", "A")]);
        cache.remove_by_id(&PieceId::new("a"));
        cache.insert(piece("z", "Z")).unwrap();

        cache.discard_changes();
        assert!(cache.find_one(&PieceId::new("a")).is_some());
        assert!(cache.find_one(&PieceId::new("z")).is_none());
        assert!(!cache.has_changes());
    }

    #[test]
    fn test_save_refused_after_lock_release() {
        let token = live_token();
        let mut cache =
            WriteCollection::from_docs("pieces", vec![piece("a", "A")], token.clone()).unwrap();
        token.store(false, Ordering::SeqCst);
        assert!(matches!(
            cache.take_write_ops(),
            Err(Error::LockReleased(_))
        ));
    }

    #[test]
    fn test_load_refused_after_lock_release() {
        let token = live_token();
        token.store(false, Ordering::SeqCst);
        let result = WriteCollection::from_docs("pieces", vec![piece("a", "A")], token);
        assert!(matches!(result, Err(Error::LockReleased(_))));
    }

    #[test]
    #[should_panic(expected = "fatal defect")]
    fn test_assert_no_changes_panics_in_debug() {
        let mut cache = cache_with(vec![piece("a", "A")]);
        cache.remove_by_id(&PieceId::new("a"));
        cache.assert_no_changes();
    }

    #[test]
    fn test_read_collection_queries() {
        let read = ReadCollection::from_docs(vec![piece("a", "A"), piece("b", "B")]);
        assert_eq!(read.len(), 2);
        assert_eq!(read.find_one(&PieceId::new("a")).unwrap().name, "A");
        assert_eq!(read.find(|p| p.name == "B").len(), 1);
    }
}

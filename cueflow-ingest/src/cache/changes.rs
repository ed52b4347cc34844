//! Change diff engine and document change tracker
//!
//! `diff_docs` partitions an old/new document pair-up by identity, with
//! "changed" decided by normalized deep equality rather than a dirty bit.
//! `ChangeTracker` accumulates per-sub-scope change sets (e.g. one per
//! part inside a segment) and lazily materializes the minimal set of
//! upsert/delete write operations.

use crate::cache::doc::{docs_equal, CacheDoc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A net write operation against one collection
#[derive(Debug, Clone)]
pub enum WriteOp<T: CacheDoc> {
    /// Insert-or-replace one document
    Upsert(T),
    /// Delete a batch of documents by id
    Delete(Vec<T::Id>),
}

/// Partition of a document set comparison
#[derive(Debug, Clone)]
pub struct DocDiff<T: CacheDoc> {
    pub added: Vec<T>,
    pub changed: Vec<T>,
    pub removed: Vec<T::Id>,
    pub unchanged: Vec<T::Id>,
}

/// Compare two document arrays keyed by identity.
pub fn diff_docs<T: CacheDoc>(old_docs: &[T], new_docs: &[T]) -> DocDiff<T> {
    let old_by_id: BTreeMap<&T::Id, &T> = old_docs.iter().map(|d| (d.doc_id(), d)).collect();
    let new_ids: HashSet<&T::Id> = new_docs.iter().map(|d| d.doc_id()).collect();

    let mut diff = DocDiff {
        added: Vec::new(),
        changed: Vec::new(),
        removed: Vec::new(),
        unchanged: Vec::new(),
    };

    for doc in new_docs {
        match old_by_id.get(doc.doc_id()) {
            None => diff.added.push(doc.clone()),
            Some(old) if docs_equal(*old, doc) => diff.unchanged.push(doc.doc_id().clone()),
            Some(_) => diff.changed.push(doc.clone()),
        }
    }

    for (id, _) in old_by_id {
        if !new_ids.contains(id) {
            diff.removed.push(id.clone());
        }
    }

    diff
}

/// Change set of one sub-scope, reconstructed from touched ids
#[derive(Debug, Clone)]
pub struct DocumentChanges<T: CacheDoc> {
    /// Every id present in the scope right now
    pub current_ids: Vec<T::Id>,
    /// Touched ids that are no longer present
    pub deleted_ids: Vec<T::Id>,
    /// Present documents whose ids were touched
    pub changed_documents: Vec<T>,
}

/// Reconstruct a full change set from a set of touched ids and a freshly
/// loaded document array, for callers that only track *which* ids changed.
pub fn changes_for<T: CacheDoc>(
    known_changed_ids: &HashSet<T::Id>,
    current_docs: &[T],
) -> DocumentChanges<T> {
    let current_ids: Vec<T::Id> = current_docs.iter().map(|d| d.doc_id().clone()).collect();
    let present: HashSet<&T::Id> = current_docs.iter().map(|d| d.doc_id()).collect();

    let deleted_ids = known_changed_ids
        .iter()
        .filter(|id| !present.contains(id))
        .cloned()
        .collect();

    let changed_documents = current_docs
        .iter()
        .filter(|d| known_changed_ids.contains(d.doc_id()))
        .cloned()
        .collect();

    DocumentChanges {
        current_ids,
        deleted_ids,
        changed_documents,
    }
}

/// Accumulates change sets from many independent sub-scopes and generates
/// the minimal net write operations.
///
/// Conflicting instructions resolve in favor of existence: an id reported
/// as current always wins over a deletion recorded earlier.
#[derive(Debug)]
pub struct ChangeTracker<T: CacheDoc> {
    upserts: BTreeMap<T::Id, T>,
    deletions: BTreeSet<T::Id>,
    current: BTreeSet<T::Id>,
}

impl<T: CacheDoc> Default for ChangeTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheDoc> ChangeTracker<T> {
    pub fn new() -> Self {
        Self {
            upserts: BTreeMap::new(),
            deletions: BTreeSet::new(),
            current: BTreeSet::new(),
        }
    }

    /// Consume one sub-scope's change set.
    ///
    /// When `parent_deleted` is true every id in the batch is treated as
    /// deleted regardless of its own diff: a removed segment deletes all
    /// of its parts.
    pub fn add_changes(&mut self, changes: DocumentChanges<T>, parent_deleted: bool) {
        if parent_deleted {
            for id in changes
                .current_ids
                .into_iter()
                .chain(changes.deleted_ids)
                .chain(changes.changed_documents.into_iter().map(|d| d.doc_id().clone()))
            {
                self.upserts.remove(&id);
                self.current.remove(&id);
                self.deletions.insert(id);
            }
            return;
        }

        for id in changes.current_ids {
            self.deletions.remove(&id);
            self.current.insert(id);
        }

        for doc in changes.changed_documents {
            let id = doc.doc_id().clone();
            self.deletions.remove(&id);
            self.current.insert(id.clone());
            self.upserts.insert(id, doc);
        }

        for id in changes.deleted_ids {
            if !self.current.contains(&id) {
                self.upserts.remove(&id);
                self.deletions.insert(id);
            }
        }
    }

    /// Materialize the net write operations: one upsert per changed
    /// document plus at most one batched delete.
    pub fn generate_write_ops(self) -> Vec<WriteOp<T>> {
        let current = self.current;
        let mut ops: Vec<WriteOp<T>> = self
            .upserts
            .into_values()
            .map(WriteOp::Upsert)
            .collect();

        let deleted: Vec<T::Id> = self
            .deletions
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();
        if !deleted.is_empty() {
            ops.push(WriteOp::Delete(deleted));
        }

        ops
    }
}

//! Per-rundown unit of work for ingest operations
//!
//! Loads every ingest-owned document of one rundown under its lock,
//! accumulates mutations in memory and emits the minimal write ops at
//! commit time. Nothing touches the database between load and save.

use crate::cache::{diff_docs, docs_equal, WriteCollection, WriteOp, WriteOptionalObject};
use crate::db::{DocQuery, DocStore};
use crate::error::Result;
use crate::locks::LockHandle;
use crate::model::{IngestDataCacheRow, IngestRundown, Part, Piece, Rundown, Segment};
use cueflow_common::ids::RundownId;

pub struct IngestCache {
    pub rundown_id: RundownId,
    pub rundown_external_id: String,
    pub rundown: WriteOptionalObject<Rundown>,
    pub segments: WriteCollection<Segment>,
    pub parts: WriteCollection<Part>,
    pub pieces: WriteCollection<Piece>,
    pub ingest_data: WriteCollection<IngestDataCacheRow>,
}

impl IngestCache {
    /// Load the full ingest state of one rundown. The rundown lock must be
    /// held; the cache inherits its token so a release invalidates it.
    pub async fn load(
        store: &DocStore,
        lock: &LockHandle,
        rundown_external_id: &str,
    ) -> Result<IngestCache> {
        let rundown_id = RundownId::from_external(rundown_external_id);
        let token = lock.token();
        let by_rundown = DocQuery::ByRundown(rundown_id.to_string());

        let rundown: Option<Rundown> = store.load_one(rundown_id.as_str()).await?;
        let segments: Vec<Segment> = store.load(&by_rundown).await?;
        let parts: Vec<Part> = store.load(&by_rundown).await?;
        let pieces: Vec<Piece> = store.load(&by_rundown).await?;
        let ingest_rows: Vec<IngestDataCacheRow> = store.load(&by_rundown).await?;

        Ok(IngestCache {
            rundown_id: rundown_id.clone(),
            rundown_external_id: rundown_external_id.to_string(),
            rundown: WriteOptionalObject::from_doc("rundowns", rundown, token.clone())?,
            segments: WriteCollection::from_docs("segments", segments, token.clone())?,
            parts: WriteCollection::from_docs("parts", parts, token.clone())?,
            pieces: WriteCollection::from_docs("pieces", pieces, token.clone())?,
            ingest_data: WriteCollection::from_docs("ingest_data", ingest_rows, token)?,
        })
    }

    /// Reassemble the stored feed snapshot, if any.
    pub fn stored_snapshot(&self) -> Option<IngestRundown> {
        let rows: Vec<IngestDataCacheRow> =
            self.ingest_data.find_all().into_iter().cloned().collect();
        IngestDataCacheRow::snapshot_from_rows(&rows)
    }

    /// Replace the stored snapshot with a new one. Unchanged rows stay
    /// clean so per-segment updates touch a single row.
    pub fn put_snapshot(&mut self, snapshot: &IngestRundown, modified: i64) {
        let old_rows: Vec<IngestDataCacheRow> =
            self.ingest_data.find_all().into_iter().cloned().collect();
        let mut rows = IngestDataCacheRow::rows_from_snapshot(&self.rundown_id, snapshot, modified);
        // Preserve the stored modified stamp when the payload is unchanged,
        // so such rows diff as identical
        for row in &mut rows {
            if let Some(existing) = self.ingest_data.find_one(&row.id) {
                if docs_equal(&existing.data, &row.data) {
                    row.modified = existing.modified;
                }
            }
        }
        let diff = diff_docs(&old_rows, &rows);
        for row in diff.added.into_iter().chain(diff.changed) {
            self.ingest_data.upsert(row);
        }
        for id in &diff.removed {
            self.ingest_data.remove_by_id(id);
        }
    }

    pub fn clear_snapshot(&mut self) {
        let ids = self.ingest_data.ids();
        for id in ids {
            self.ingest_data.remove_by_id(&id);
        }
    }

    pub fn has_changes(&self) -> bool {
        self.rundown.has_changes()
            || self.segments.has_changes()
            || self.parts.has_changes()
            || self.pieces.has_changes()
            || self.ingest_data.has_changes()
    }

    pub fn discard_changes(&mut self) {
        self.rundown.discard_changes();
        self.segments.discard_changes();
        self.parts.discard_changes();
        self.pieces.discard_changes();
        self.ingest_data.discard_changes();
    }

    /// Drain the accumulated write ops. The cache is clean afterwards.
    pub fn take_write_ops(&mut self) -> Result<IngestWriteOps> {
        Ok(IngestWriteOps {
            rundowns: self.rundown.take_write_ops()?,
            segments: self.segments.take_write_ops()?,
            parts: self.parts.take_write_ops()?,
            pieces: self.pieces.take_write_ops()?,
            ingest_data: self.ingest_data.take_write_ops()?,
        })
    }
}

/// Pending ingest writes, detached from the cache so they can be applied
/// on a separate task while playout reconciliation continues.
pub struct IngestWriteOps {
    pub rundowns: Vec<WriteOp<Rundown>>,
    pub segments: Vec<WriteOp<Segment>>,
    pub parts: Vec<WriteOp<Part>>,
    pub pieces: Vec<WriteOp<Piece>>,
    pub ingest_data: Vec<WriteOp<IngestDataCacheRow>>,
}

impl IngestWriteOps {
    pub fn is_empty(&self) -> bool {
        self.rundowns.is_empty()
            && self.segments.is_empty()
            && self.parts.is_empty()
            && self.pieces.is_empty()
            && self.ingest_data.is_empty()
    }

    pub async fn apply(self, store: &DocStore) -> Result<()> {
        store.apply_ops(self.rundowns).await?;
        store.apply_ops(self.segments).await?;
        store.apply_ops(self.parts).await?;
        store.apply_ops(self.pieces).await?;
        store.apply_ops(self.ingest_data).await?;
        Ok(())
    }
}

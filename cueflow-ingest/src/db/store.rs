//! Generic document store over the collection tables
//!
//! Loads are per-collection queries returning full documents; writes apply
//! `WriteOp` batches inside one transaction. The store is deliberately
//! dumb: all consistency logic lives in the caches and the commit
//! pipeline.

use crate::cache::{CacheDoc, WriteOp};
use crate::error::Result;
use crate::model::{
    IngestDataCacheRow, Part, PartInstance, Piece, Rundown, RundownPlaylist, Segment,
};
use sqlx::{Pool, Sqlite};

/// Index columns stored beside the document JSON
#[derive(Debug, Default, Clone)]
pub struct IndexKeys {
    pub rundown_id: Option<String>,
    pub playlist_id: Option<String>,
}

/// A cache document that maps onto one collection table
pub trait StoreDoc: CacheDoc {
    const TABLE: &'static str;

    fn index_keys(&self) -> IndexKeys;
}

impl StoreDoc for Rundown {
    const TABLE: &'static str = "rundowns";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: Some(self.id.to_string()),
            playlist_id: Some(self.playlist_id.to_string()),
        }
    }
}

impl StoreDoc for Segment {
    const TABLE: &'static str = "segments";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: Some(self.rundown_id.to_string()),
            playlist_id: None,
        }
    }
}

impl StoreDoc for Part {
    const TABLE: &'static str = "parts";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: Some(self.rundown_id.to_string()),
            playlist_id: None,
        }
    }
}

impl StoreDoc for Piece {
    const TABLE: &'static str = "pieces";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: Some(self.rundown_id.to_string()),
            playlist_id: None,
        }
    }
}

impl StoreDoc for PartInstance {
    const TABLE: &'static str = "part_instances";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: Some(self.rundown_id.to_string()),
            playlist_id: None,
        }
    }
}

impl StoreDoc for RundownPlaylist {
    const TABLE: &'static str = "rundown_playlists";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: None,
            playlist_id: Some(self.id.to_string()),
        }
    }
}

impl StoreDoc for IngestDataCacheRow {
    const TABLE: &'static str = "ingest_data";

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            rundown_id: Some(self.rundown_id.to_string()),
            playlist_id: None,
        }
    }
}

/// Collection query shapes the caches load with
#[derive(Debug, Clone)]
pub enum DocQuery {
    All,
    ById(String),
    ByRundown(String),
    ByRundowns(Vec<String>),
    ByPlaylist(String),
}

/// Handle to the document store
#[derive(Clone)]
pub struct DocStore {
    pool: Pool<Sqlite>,
}

impl DocStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Load all documents of a collection matching a query
    pub async fn load<T: StoreDoc>(&self, query: &DocQuery) -> Result<Vec<T>> {
        let (where_clause, binds) = Self::where_clause(query);
        let sql = format!("SELECT doc FROM {} {} ORDER BY id", T::TABLE, where_clause);

        let mut q = sqlx::query_scalar::<_, String>(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(rows.len());
        for raw in rows {
            docs.push(serde_json::from_str(&raw)?);
        }
        Ok(docs)
    }

    /// Load zero-or-one document by id
    pub async fn load_one<T: StoreDoc>(&self, id: &str) -> Result<Option<T>> {
        let docs = self.load::<T>(&DocQuery::ById(id.to_string())).await?;
        Ok(docs.into_iter().next())
    }

    /// Apply a batch of write operations for one collection in a single
    /// transaction.
    pub async fn apply_ops<T: StoreDoc>(&self, ops: Vec<WriteOp<T>>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                WriteOp::Upsert(doc) => {
                    let keys = doc.index_keys();
                    let raw = serde_json::to_string(&doc)?;
                    sqlx::query(&format!(
                        r#"
                        INSERT INTO {} (id, rundown_id, playlist_id, doc)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            rundown_id = excluded.rundown_id,
                            playlist_id = excluded.playlist_id,
                            doc = excluded.doc
                        "#,
                        T::TABLE
                    ))
                    .bind(doc.doc_id().to_string())
                    .bind(keys.rundown_id)
                    .bind(keys.playlist_id)
                    .bind(raw)
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::Delete(ids) => {
                    if ids.is_empty() {
                        continue;
                    }
                    let placeholders = vec!["?"; ids.len()].join(", ");
                    let sql = format!("DELETE FROM {} WHERE id IN ({})", T::TABLE, placeholders);
                    let mut q = sqlx::query(&sql);
                    for id in &ids {
                        q = q.bind(id.to_string());
                    }
                    q.execute(&mut *tx).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    fn where_clause(query: &DocQuery) -> (String, Vec<String>) {
        match query {
            DocQuery::All => (String::new(), Vec::new()),
            DocQuery::ById(id) => ("WHERE id = ?".to_string(), vec![id.clone()]),
            DocQuery::ByRundown(id) => ("WHERE rundown_id = ?".to_string(), vec![id.clone()]),
            DocQuery::ByRundowns(ids) => {
                if ids.is_empty() {
                    // Matches nothing; keeps the caller free of special cases
                    ("WHERE 1 = 0".to_string(), Vec::new())
                } else {
                    let placeholders = vec!["?"; ids.len()].join(", ");
                    (
                        format!("WHERE rundown_id IN ({})", placeholders),
                        ids.clone(),
                    )
                }
            }
            DocQuery::ByPlaylist(id) => ("WHERE playlist_id = ?".to_string(), vec![id.clone()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::{init_schema, open_in_memory};
    use cueflow_common::ids::{PartId, RundownId, SegmentId};

    async fn test_store() -> DocStore {
        let pool = open_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        DocStore::new(pool)
    }

    fn part(id: &str, rundown: &str, rank: f64) -> Part {
        Part {
            id: PartId::new(id),
            rundown_id: RundownId::new(rundown),
            segment_id: SegmentId::new("seg"),
            external_id: format!("ext-{}", id),
            title: format!("Part {}", id),
            rank,
            invalid: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_load_round_trip() {
        let store = test_store().await;
        store
            .apply_ops(vec![
                WriteOp::Upsert(part("a", "r1", 1.0)),
                WriteOp::Upsert(part("b", "r1", 2.0)),
                WriteOp::Upsert(part("c", "r2", 1.0)),
            ])
            .await
            .unwrap();

        let r1: Vec<Part> = store
            .load(&DocQuery::ByRundown("r1".to_string()))
            .await
            .unwrap();
        assert_eq!(r1.len(), 2);

        let all: Vec<Part> = store.load(&DocQuery::All).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let store = test_store().await;
        store
            .apply_ops(vec![WriteOp::Upsert(part("a", "r1", 1.0))])
            .await
            .unwrap();
        store
            .apply_ops(vec![WriteOp::Upsert(part("a", "r1", 5.0))])
            .await
            .unwrap();

        let loaded: Option<Part> = store.load_one("a").await.unwrap();
        assert_eq!(loaded.unwrap().rank, 5.0);
    }

    #[tokio::test]
    async fn test_batched_delete() {
        let store = test_store().await;
        store
            .apply_ops(vec![
                WriteOp::Upsert(part("a", "r1", 1.0)),
                WriteOp::Upsert(part("b", "r1", 2.0)),
            ])
            .await
            .unwrap();
        store
            .apply_ops::<Part>(vec![WriteOp::Delete(vec![
                PartId::new("a"),
                PartId::new("b"),
            ])])
            .await
            .unwrap();

        let all: Vec<Part> = store.load(&DocQuery::All).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_by_rundowns_empty_matches_nothing() {
        let store = test_store().await;
        store
            .apply_ops(vec![WriteOp::Upsert(part("a", "r1", 1.0))])
            .await
            .unwrap();
        let none: Vec<Part> = store
            .load(&DocQuery::ByRundowns(Vec::new()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}

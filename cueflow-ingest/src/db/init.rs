//! Database initialization

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Collection tables; each holds `(id, rundown_id, playlist_id, doc)`
pub const COLLECTION_TABLES: &[&str] = &[
    "rundowns",
    "segments",
    "parts",
    "pieces",
    "part_instances",
    "rundown_playlists",
    "ingest_data",
];

/// Open (and create if missing) the database file
pub async fn open_database(path: &Path) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an in-memory database (tests). A single connection keeps every
/// query on the same in-memory instance.
pub async fn open_in_memory() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Create collection tables and indexes if missing
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Initializing document collection tables");

    for table in COLLECTION_TABLES {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                rundown_id TEXT,
                playlist_id TEXT,
                doc TEXT NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_rundown ON {table} (rundown_id)"
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_playlist ON {table} (playlist_id)"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_schema_creates_all_tables() {
        let pool = open_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        for table in COLLECTION_TABLES {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "table {} missing", table);
        }
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let pool = open_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}

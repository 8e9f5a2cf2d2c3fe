//! Checkpoint ledger: which source files are fully ingested.
//!
//! An entry for `(dataset, file_name)` exists only after every row of that
//! file has been committed to the store and the vector index has been
//! saved. Partial processing never writes one.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointEntry {
    pub dataset: String,
    pub file_name: String,
    pub row_count: i64,
    /// Unix seconds.
    pub completed_at: i64,
}

#[derive(Clone)]
pub struct CheckpointLedger {
    pool: SqlitePool,
}

impl CheckpointLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn is_done(&self, dataset: &str, file_name: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM processed_files WHERE dataset = ? AND file_name = ?",
        )
        .bind(dataset)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Record a completed file. Re-marking overwrites the row count and time.
    pub async fn mark_done(&self, dataset: &str, file_name: &str, row_count: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_files (dataset, file_name, row_count, completed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(dataset, file_name) DO UPDATE SET
                row_count = excluded.row_count,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(dataset)
        .bind(file_name)
        .bind(row_count as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, dataset: Option<&str>) -> Result<Vec<CheckpointEntry>> {
        let rows = match dataset {
            Some(ds) => {
                sqlx::query(
                    "SELECT dataset, file_name, row_count, completed_at FROM processed_files \
                     WHERE dataset = ? ORDER BY completed_at, file_name",
                )
                .bind(ds)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT dataset, file_name, row_count, completed_at FROM processed_files \
                     ORDER BY dataset, completed_at, file_name",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .iter()
            .map(|row| CheckpointEntry {
                dataset: row.get("dataset"),
                file_name: row.get("file_name"),
                row_count: row.get("row_count"),
                completed_at: row.get("completed_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sqlite_store::SqliteStore;

    #[tokio::test]
    async fn test_mark_and_query() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, _) = SqliteStore::open(&Config::in_dir(tmp.path())).await.unwrap();
        let ledger = store.checkpoints();

        assert!(!ledger.is_done("ig", "a.csv").await.unwrap());
        ledger.mark_done("ig", "a.csv", 10).await.unwrap();
        assert!(ledger.is_done("ig", "a.csv").await.unwrap());
        assert!(!ledger.is_done("tiktok", "a.csv").await.unwrap());

        ledger.mark_done("ig", "a.csv", 12).await.unwrap();
        let entries = ledger.list(Some("ig")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].row_count, 12);
        assert!(ledger.list(Some("tiktok")).await.unwrap().is_empty());
    }
}

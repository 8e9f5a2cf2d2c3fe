use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist. Idempotent.
///
/// | Table | Purpose |
/// |-------|---------|
/// | `leads` | Base records; `id` is never reused (`AUTOINCREMENT`) |
/// | `leads_fts` | Contentless FTS5 shadow over the text blob, `rowid = leads.id` |
/// | `processed_files` | Checkpoint ledger, one row per fully ingested file |
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset TEXT NOT NULL,
            source_file TEXT NOT NULL,
            source_row INTEGER NOT NULL,
            username TEXT,
            name TEXT,
            bio TEXT,
            category TEXT,
            follower_count INTEGER,
            following_count INTEGER,
            website TEXT,
            email TEXT,
            phone TEXT,
            text_concat TEXT NOT NULL,
            row_hash TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_dataset ON leads(dataset)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_files (
            dataset TEXT NOT NULL,
            file_name TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            completed_at INTEGER NOT NULL,
            PRIMARY KEY (dataset, file_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='leads_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query("CREATE VIRTUAL TABLE leads_fts USING fts5(text, content='')")
            .execute(pool)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let pool = db::connect(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('leads', 'leads_fts', 'processed_files') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["leads", "leads_fts", "processed_files"]);
    }
}

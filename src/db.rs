use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::Config;
use crate::migrate;

/// How [`open`] found the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Existing (or new) store passed its integrity check.
    Ready,
    /// The store was corrupt and has been recreated empty. The vector index
    /// and every checkpoint went with it.
    Recreated,
}

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// `PRAGMA quick_check` → `true` when the database reports `ok`.
pub async fn quick_check(pool: &SqlitePool) -> Result<bool> {
    let rows: Vec<String> = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_all(pool)
        .await?;
    Ok(rows.len() == 1 && rows[0] == "ok")
}

/// Connect, migrate and integrity-check the store. A store that cannot be
/// opened or fails the check is discarded together with the vector index
/// directory, then recreated empty.
pub async fn open(config: &Config) -> Result<(SqlitePool, StoreState)> {
    match open_checked(config).await {
        Ok(pool) => Ok((pool, StoreState::Ready)),
        Err(e) => {
            tracing::warn!(
                path = %config.db.path.display(),
                error = %e,
                "store failed integrity check; recreating"
            );
            discard(config)?;
            let pool = connect(config).await?;
            migrate::run_migrations(&pool).await?;
            Ok((pool, StoreState::Recreated))
        }
    }
}

async fn open_checked(config: &Config) -> Result<SqlitePool> {
    let pool = connect(config).await?;
    migrate::run_migrations(&pool).await?;
    if !quick_check(&pool).await? {
        pool.close().await;
        bail!("PRAGMA quick_check reported problems");
    }
    Ok(pool)
}

fn discard(config: &Config) -> Result<()> {
    let db = &config.db.path;
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{}", db.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    if config.index.dir.exists() {
        std::fs::remove_dir_all(&config.index.dir)?;
    }
    Ok(())
}

//! Store overview and maintenance commands.
//!
//! `leads status` summarizes what is indexed (records per dataset, lexical
//! alignment, vector index size, last ingest status document),
//! `leads checkpoints` lists completed files, and `leads repair` rebuilds
//! the lexical shadow from the base table.

use anyhow::Result;
use lead_search_core::store::LeadStore;
use lead_search_core::vector::VectorIndex;

use crate::config::Config;
use crate::db::StoreState;
use crate::progress::{format_number, read_status};
use crate::sqlite_store::SqliteStore;

pub async fn run_status(config: &Config) -> Result<()> {
    let (store, state) = SqliteStore::open(config).await?;
    let total = store.count().await?;
    let alignment = store.alignment().await?;
    let datasets = store.dataset_counts().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lead Search: Store Status");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    if state == StoreState::Recreated {
        println!("  State:       recreated (previous store was corrupt)");
    }
    println!("  Records:     {}", format_number(total));
    println!(
        "  Lexical:     {} entries{}",
        format_number(alignment.shadow.max(0) as u64),
        if alignment.is_aligned() { "" } else { " (misaligned)" }
    );

    match VectorIndex::load(&config.index.dir, &config.index.options()?) {
        Ok(Some(index)) => println!(
            "  Vectors:     {} ({}, {} dims)",
            format_number(index.len() as u64),
            index.kind(),
            index.dims()
        ),
        Ok(None) => println!("  Vectors:     none (lexical-only search)"),
        Err(e) => println!("  Vectors:     unreadable ({})", e),
    }

    if !datasets.is_empty() {
        println!();
        println!("  By dataset:");
        for (dataset, count) in &datasets {
            println!("    {:<24} {:>12}", dataset, format_number(*count as u64));
        }
    }

    if let Some(status) = read_status(&config.ingest.status_path)? {
        println!();
        println!("  Last ingest ({}):", status.dataset);
        println!(
            "    phase:     {:?}{}",
            status.phase,
            status
                .current_file
                .as_deref()
                .map(|f| format!(" ({})", f))
                .unwrap_or_default()
        );
        println!(
            "    files:     {} / {}",
            status.files_completed, status.files_total
        );
        println!(
            "    rows:      {} read, {} new",
            format_number(status.rows_processed),
            format_number(status.rows_inserted)
        );
        println!("    updated:   {}", format_ts_relative(status.updated_at));
    }
    println!();

    store.pool().close().await;
    Ok(())
}

pub async fn run_checkpoints(config: &Config, dataset: Option<&str>) -> Result<()> {
    let (store, _) = SqliteStore::open(config).await?;
    let entries = store.checkpoints().list(dataset).await?;

    if entries.is_empty() {
        println!("No completed files.");
    } else {
        println!("  {:<16} {:<40} {:>10}  COMPLETED", "DATASET", "FILE", "ROWS");
        println!("  {}", "-".repeat(88));
        for e in &entries {
            println!(
                "  {:<16} {:<40} {:>10}  {}",
                e.dataset,
                e.file_name,
                format_number(e.row_count.max(0) as u64),
                format_ts_iso(e.completed_at)
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

/// Force a lexical rebuild and report the resulting alignment.
pub async fn run_repair(config: &Config) -> Result<()> {
    let (store, state) = SqliteStore::open(config).await?;
    if state == StoreState::Recreated {
        println!("Store was corrupt and has been recreated empty; re-run ingest.");
    }
    let written = store.rebuild_lexical().await?;
    let alignment = store.alignment().await?;
    println!(
        "Rebuilt lexical shadow: {} entries ({})",
        format_number(written),
        if alignment.is_aligned() {
            "aligned"
        } else {
            "still misaligned"
        }
    );
    store.pool().close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}

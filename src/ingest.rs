//! Ingestion controller.
//!
//! Drives one archive into the content store and the vector index:
//!
//! ```text
//! select members ─► for each member:
//!     PENDING ── checkpointed? ──► skip
//!        │
//!     READING ─► BATCHING ─► FLUSHING ─┐   (repeat per batch)
//!        ▲                             │
//!        └─────────────────────────────┘
//!        │
//!      DONE: save index, write checkpoint, force status write
//! ```
//!
//! A flush commits the batch to the store (records + lexical shadow in one
//! transaction), then embeds and indexes the ids the vector index does not
//! hold yet. Rows already committed by an interrupted run resolve to their
//! existing ids, so a re-run neither duplicates rows nor leaves them
//! without vectors.
//!
//! Configuration errors (unreadable archive, zero matching members, no
//! embedder while vectors are wanted, index dims disagreeing with the
//! embedder) abort before anything is written.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use lead_search_core::embedding::Embedder;
use lead_search_core::models::NewLead;
use lead_search_core::normalize::normalize_row;
use lead_search_core::store::LeadStore;
use lead_search_core::vector::VectorIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::archive::{SourceArchive, SourceRow};
use crate::config::Config;
use crate::db::StoreState;
use crate::progress::{IngestEvent, IngestProgressReporter, IngestStatus, StatusWriter};
use crate::sqlite_store::SqliteStore;

/// Per-file state, also reported in the status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePhase {
    Pending,
    Reading,
    Batching,
    Flushing,
    Done,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub archive: PathBuf,
    /// Glob matched against member paths.
    pub pattern: String,
    pub dataset: String,
    /// Stop after this many parsed rows across all files.
    pub limit: Option<u64>,
    pub skip_vectors: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_total: usize,
    pub files_skipped: usize,
    pub files_completed: usize,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_malformed: u64,
    pub vectors_added: u64,
    /// The row limit stopped the run before every file was completed.
    pub truncated: bool,
    /// The store failed its integrity check and was rebuilt empty.
    pub store_recreated: bool,
}

struct StatusTracker {
    writer: StatusWriter,
    status: IngestStatus,
    started: Instant,
}

impl StatusTracker {
    fn set_phase(&mut self, phase: FilePhase) {
        self.status.phase = phase;
    }

    fn publish(&mut self, force: bool) {
        self.status.updated_at = Utc::now().timestamp();
        self.status.elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.writer.update(&self.status, force);
    }
}

pub async fn run_ingest(
    config: &Config,
    req: &IngestRequest,
    embedder: Option<&dyn Embedder>,
    reporter: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    if req.dataset.trim().is_empty() {
        bail!("dataset name must not be empty");
    }
    let embedder = if req.skip_vectors {
        None
    } else {
        match embedder {
            Some(e) => Some(e),
            None => bail!(
                "No embedding provider configured. Set [embedding] provider or pass --no-vectors."
            ),
        }
    };

    let mut archive = SourceArchive::open(&req.archive)?;
    let members = archive.select(&req.pattern)?;

    let index_options = config.index.options()?;
    let mut index = match embedder {
        Some(embedder) => {
            let loaded = VectorIndex::load(&config.index.dir, &index_options)
                .with_context(|| format!("failed to load vector index from {}", config.index.dir.display()))?;
            match loaded {
                Some(index) if index.dims() != embedder.dims() => bail!(
                    "vector index has {} dims but embedder '{}' produces {}",
                    index.dims(),
                    embedder.model_name(),
                    embedder.dims()
                ),
                Some(index) => Some(index),
                None => None,
            }
        }
        None => None,
    };

    let (store, state) = SqliteStore::open(config).await?;
    let mut report = IngestReport {
        files_total: members.len(),
        store_recreated: state == StoreState::Recreated,
        ..IngestReport::default()
    };
    if report.store_recreated {
        // The index directory went with the store.
        index = None;
    }
    if let (None, Some(embedder)) = (&index, embedder) {
        index = Some(VectorIndex::new(embedder.dims(), &index_options));
    }

    let ledger = store.checkpoints();
    let now = Utc::now().timestamp();
    let mut tracker = StatusTracker {
        writer: StatusWriter::new(&config.ingest.status_path, config.ingest.status_interval()),
        status: IngestStatus {
            dataset: req.dataset.clone(),
            current_file: None,
            phase: FilePhase::Pending,
            rows_processed: 0,
            rows_inserted: 0,
            files_completed: 0,
            files_total: members.len(),
            started_at: now,
            updated_at: now,
            elapsed_ms: 0,
        },
        started: Instant::now(),
    };

    let batch_size = config.ingest.batch_size;

    for (file_idx, file) in members.iter().enumerate() {
        tracker.status.current_file = Some(file.clone());
        tracker.set_phase(FilePhase::Pending);

        if ledger.is_done(&req.dataset, file).await? {
            tracing::info!(dataset = %req.dataset, file = %file, "already ingested; skipping");
            report.files_skipped += 1;
            reporter.report(IngestEvent::FileSkipped {
                dataset: req.dataset.clone(),
                file: file.clone(),
            });
            continue;
        }

        reporter.report(IngestEvent::FileStarted {
            dataset: req.dataset.clone(),
            file: file.clone(),
            index: file_idx + 1,
            total: members.len(),
        });
        tracker.set_phase(FilePhase::Reading);
        tracker.publish(false);

        let rows = archive.member_rows(file, config.ingest.max_member_bytes)?;
        tracker.set_phase(FilePhase::Batching);

        let mut batch: Vec<NewLead> = Vec::with_capacity(batch_size);
        let mut file_rows: u64 = 0;
        let mut file_vectors: u64 = 0;
        let mut truncated = false;

        for (pos, row) in rows.enumerate() {
            if req.limit.is_some_and(|limit| report.rows_read >= limit) {
                truncated = true;
                break;
            }
            let raw = match row {
                SourceRow::Parsed(raw) => raw,
                SourceRow::Malformed => {
                    report.rows_malformed += 1;
                    tracing::debug!(file = %file, row = pos + 1, "skipping malformed row");
                    continue;
                }
            };
            batch.push(NewLead {
                dataset: req.dataset.clone(),
                source_file: file.clone(),
                source_row: pos as i64 + 1,
                lead: normalize_row(&raw),
            });
            report.rows_read += 1;
            file_rows += 1;

            if batch.len() >= batch_size {
                file_vectors += flush(
                    &store,
                    index.as_mut(),
                    embedder,
                    &mut batch,
                    &mut report,
                    &mut tracker,
                )
                .await?;
                reporter.report(IngestEvent::Flushed {
                    dataset: req.dataset.clone(),
                    file: file.clone(),
                    rows: file_rows,
                    inserted: report.rows_inserted,
                });
            }
        }

        if !batch.is_empty() {
            file_vectors += flush(
                &store,
                index.as_mut(),
                embedder,
                &mut batch,
                &mut report,
                &mut tracker,
            )
            .await?;
            reporter.report(IngestEvent::Flushed {
                dataset: req.dataset.clone(),
                file: file.clone(),
                rows: file_rows,
                inserted: report.rows_inserted,
            });
        }

        if let Some(index) = index.as_ref() {
            if file_vectors > 0 {
                index.save(&config.index.dir)?;
            }
        }

        if truncated {
            tracing::info!(
                dataset = %req.dataset,
                file = %file,
                rows = file_rows,
                "row limit reached; file left without checkpoint"
            );
            report.truncated = true;
            tracker.publish(true);
            break;
        }

        ledger.mark_done(&req.dataset, file, file_rows).await?;
        report.files_completed += 1;
        tracker.status.files_completed = report.files_completed;
        tracker.set_phase(FilePhase::Done);
        tracker.publish(true);
        reporter.report(IngestEvent::FileDone {
            dataset: req.dataset.clone(),
            file: file.clone(),
            rows: file_rows,
        });
        tracing::info!(
            dataset = %req.dataset,
            file = %file,
            rows = file_rows,
            vectors = file_vectors,
            "file ingested"
        );
    }

    tracing::info!(
        dataset = %req.dataset,
        files = report.files_completed,
        skipped = report.files_skipped,
        rows = report.rows_read,
        inserted = report.rows_inserted,
        malformed = report.rows_malformed,
        "ingest finished"
    );
    Ok(report)
}

/// Commit one batch, then index whatever the vector index is missing.
/// Returns the number of vectors added.
async fn flush(
    store: &SqliteStore,
    index: Option<&mut VectorIndex>,
    embedder: Option<&dyn Embedder>,
    batch: &mut Vec<NewLead>,
    report: &mut IngestReport,
    tracker: &mut StatusTracker,
) -> Result<u64> {
    tracker.set_phase(FilePhase::Flushing);

    let outcome = store.append_batch(batch).await?;
    report.rows_inserted += outcome.inserted as u64;

    let mut added = 0u64;
    if let (Some(index), Some(embedder)) = (index, embedder) {
        let mut seen = HashSet::new();
        let pending: Vec<usize> = outcome
            .ids
            .iter()
            .enumerate()
            .filter(|(_, id)| !index.contains(**id) && seen.insert(**id))
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|&i| batch[i].lead.text.clone()).collect();
            let ids: Vec<i64> = pending.iter().map(|&i| outcome.ids[i]).collect();
            let vectors = embedder.embed(&texts).await?;
            index.add(&vectors, &ids)?;
            added = ids.len() as u64;
            report.vectors_added += added;
        }
    }

    batch.clear();
    tracker.status.rows_processed = report.rows_read;
    tracker.status.rows_inserted = report.rows_inserted;
    tracker.set_phase(FilePhase::Batching);
    tracker.publish(false);
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::progress::{read_status, NoProgress};
    use lead_search_core::embedding::HashEmbedder;

    fn request(archive: PathBuf, skip_vectors: bool) -> IngestRequest {
        IngestRequest {
            archive,
            pattern: "*.csv".to_string(),
            dataset: "ig".to_string(),
            limit: None,
            skip_vectors,
        }
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FilePhase::Flushing).unwrap(),
            "\"flushing\""
        );
    }

    #[tokio::test]
    async fn test_missing_embedder_fails_before_any_write() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let zip = tmp.path().join("leads.zip");
        write_zip(&zip, &[("a.csv", "username\nalice\n")]);

        let err = run_ingest(&config, &request(zip, false), None, &NoProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--no-vectors"));
        assert!(!config.db.path.exists());
    }

    #[tokio::test]
    async fn test_status_document_written_at_file_end() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::in_dir(tmp.path());
        config.ingest.batch_size = 2;
        let zip = tmp.path().join("leads.zip");
        write_zip(
            &zip,
            &[("a.csv", "username,name\nalice,Alice\nbob,Bob\ncarol,Carol\n")],
        );

        let report = run_ingest(&config, &request(zip, true), None, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.files_completed, 1);

        let status = read_status(&config.ingest.status_path).unwrap().unwrap();
        assert_eq!(status.phase, FilePhase::Done);
        assert_eq!(status.rows_processed, 3);
        assert_eq!(status.files_completed, 1);
        assert_eq!(status.current_file.as_deref(), Some("a.csv"));
    }

    #[tokio::test]
    async fn test_rerun_backfills_missing_vectors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let zip = tmp.path().join("leads.zip");
        write_zip(
            &zip,
            &[("a.csv", "username,bio\nalice,coffee roaster\nbob,trail runner\n")],
        );
        let embedder = HashEmbedder::new(32);

        let first = run_ingest(&config, &request(zip.clone(), false), Some(&embedder), &NoProgress)
            .await
            .unwrap();
        assert_eq!(first.vectors_added, 2);

        // Simulate a crash after the store commit but before the index save.
        std::fs::remove_dir_all(&config.index.dir).unwrap();
        let (store, _) = SqliteStore::open(&config).await.unwrap();
        sqlx::query("DELETE FROM processed_files")
            .execute(store.pool())
            .await
            .unwrap();

        let second = run_ingest(&config, &request(zip, false), Some(&embedder), &NoProgress)
            .await
            .unwrap();
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.vectors_added, 2);

        let index = VectorIndex::load(&config.index.dir, &config.index.options().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_rows_counted_not_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let zip = tmp.path().join("leads.zip");
        write_zip(
            &zip,
            &[("a.csv", "username,followers\nalice,12\nbob,1,extra\ncarol,lots\n")],
        );

        let report = run_ingest(&config, &request(zip, true), None, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_malformed, 1);
        assert_eq!(report.files_completed, 1);

        let (store, _) = SqliteStore::open(&config).await.unwrap();
        let hits = store.lexical_search("carol", 10, None).await.unwrap();
        let records = store.fetch(&[hits[0].id]).await.unwrap();
        assert_eq!(records[&hits[0].id].follower_count, None);
    }
}

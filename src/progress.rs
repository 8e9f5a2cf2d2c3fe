//! Ingest progress reporting.
//!
//! Two independent sinks:
//!
//! - an [`IngestProgressReporter`] on **stderr** (human or JSON lines), so
//!   stdout stays parseable for scripts;
//! - the [`StatusWriter`], a small JSON status document overwritten
//!   atomically and throttled to a minimum interval, for external
//!   monitors (`leads status` reads it back).
//!
//! Neither sink can fail an ingest run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::ingest::FilePhase;

/// A single progress event for ingest.
#[derive(Clone, Debug)]
pub enum IngestEvent {
    /// Starting file `index` (1-based) of `total`.
    FileStarted {
        dataset: String,
        file: String,
        index: usize,
        total: usize,
    },
    /// File already has a checkpoint.
    FileSkipped { dataset: String, file: String },
    /// A batch was committed; `rows` is the file's running row count.
    Flushed {
        dataset: String,
        file: String,
        rows: u64,
        inserted: u64,
    },
    FileDone {
        dataset: String,
        file: String,
        rows: u64,
    },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress on stderr: "ingest ig/leads.csv  flushed  12,000 rows".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::FileStarted {
                dataset,
                file,
                index,
                total,
            } => format!("ingest {}/{}  reading  (file {} of {})\n", dataset, file, index, total),
            IngestEvent::FileSkipped { dataset, file } => {
                format!("ingest {}/{}  skipped (checkpointed)\n", dataset, file)
            }
            IngestEvent::Flushed {
                dataset,
                file,
                rows,
                inserted,
            } => format!(
                "ingest {}/{}  flushed  {} rows ({} new)\n",
                dataset,
                file,
                format_number(*rows),
                format_number(*inserted)
            ),
            IngestEvent::FileDone {
                dataset,
                file,
                rows,
            } => format!(
                "ingest {}/{}  done  {} rows\n",
                dataset,
                file,
                format_number(*rows)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::FileStarted {
                dataset,
                file,
                index,
                total,
            } => serde_json::json!({
                "event": "file_started",
                "dataset": dataset,
                "file": file,
                "index": index,
                "total": total
            }),
            IngestEvent::FileSkipped { dataset, file } => serde_json::json!({
                "event": "file_skipped",
                "dataset": dataset,
                "file": file
            }),
            IngestEvent::Flushed {
                dataset,
                file,
                rows,
                inserted,
            } => serde_json::json!({
                "event": "flushed",
                "dataset": dataset,
                "file": file,
                "rows": rows,
                "inserted": inserted
            }),
            IngestEvent::FileDone {
                dataset,
                file,
                rows,
            } => serde_json::json!({
                "event": "file_done",
                "dataset": dataset,
                "file": file,
                "rows": rows
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// The status document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestStatus {
    pub dataset: String,
    pub current_file: Option<String>,
    pub phase: FilePhase,
    pub rows_processed: u64,
    pub rows_inserted: u64,
    pub files_completed: usize,
    pub files_total: usize,
    /// Unix seconds.
    pub started_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
    pub elapsed_ms: u64,
}

/// Throttled, atomically replaced status file.
///
/// A write happens when `force` is set or at least `min_interval` has passed
/// since the last successful write. Failures are logged and swallowed.
pub struct StatusWriter {
    path: PathBuf,
    min_interval: Duration,
    last_write: Option<Instant>,
}

impl StatusWriter {
    pub fn new(path: impl Into<PathBuf>, min_interval: Duration) -> Self {
        Self {
            path: path.into(),
            min_interval,
            last_write: None,
        }
    }

    /// Returns `true` if the document was written.
    pub fn update(&mut self, status: &IngestStatus, force: bool) -> bool {
        if !force {
            if let Some(last) = self.last_write {
                if last.elapsed() < self.min_interval {
                    return false;
                }
            }
        }
        match write_status(&self.path, status) {
            Ok(()) => {
                self.last_write = Some(Instant::now());
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "status write failed");
                false
            }
        }
    }
}

fn write_status(path: &Path, status: &IngestStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(status)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the status document, `None` if no ingest has written one yet.
pub fn read_status(path: &Path) -> Result<Option<IngestStatus>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read status file: {}", path.display()))?;
    let status = serde_json::from_str(&content)
        .with_context(|| format!("Malformed status file: {}", path.display()))?;
    Ok(Some(status))
}

//! # Lead Search CLI (`leads`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `leads init` | Create the SQLite store and run schema migrations |
//! | `leads ingest` | Ingest matching members of a zip archive into a dataset |
//! | `leads search "<query>"` | Hybrid search over ingested leads |
//! | `leads status` | Store, index and last-ingest overview |
//! | `leads checkpoints` | List fully ingested files |
//! | `leads repair` | Rebuild the lexical shadow from the base table |
//!
//! ## Examples
//!
//! ```bash
//! leads --config ./config/leads.toml init
//! leads ingest --zip exports.zip --pattern 'instagram/*.csv' --dataset instagram
//! leads ingest --zip exports.zip --pattern '*.xlsx' --dataset tiktok --limit 1000 --no-vectors
//! leads search "vegan bakery" --k 10 --alpha 0.7 --datasets instagram,tiktok
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lead_search::config::{self, Config};
use lead_search::embedding::create_embedder;
use lead_search::ingest::{self, IngestRequest};
use lead_search::progress::ProgressMode;
use lead_search::search::{self, SearchOptions};
use lead_search::{sqlite_store, stats};

/// Lead Search CLI: hybrid lexical + vector search over lead exports.
#[derive(Parser)]
#[command(
    name = "leads",
    about = "Lead Search: ingest lead exports and query them with hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/leads.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store. Idempotent.
    Init,

    /// Ingest archive members into a dataset.
    ///
    /// Files that already have a checkpoint for the dataset are skipped, so
    /// an interrupted run can simply be repeated.
    Ingest {
        /// Zip archive containing CSV, TSV or XLSX exports.
        #[arg(long = "zip")]
        archive: PathBuf,

        /// Glob selecting archive members (e.g. `*.csv`).
        #[arg(long)]
        pattern: String,

        /// Dataset name recorded on every ingested lead.
        #[arg(long)]
        dataset: String,

        /// Stop after this many rows (dry runs). The last file is left
        /// without a checkpoint.
        #[arg(long)]
        limit: Option<u64>,

        /// Store records and lexical entries only; skip embedding.
        #[arg(long)]
        no_vectors: bool,

        /// Progress output on stderr: human, json or off. Defaults to human
        /// on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search ingested leads.
    Search {
        /// Free-text query.
        query: String,

        /// Number of results. Defaults to `retrieval.default_k`.
        #[arg(long)]
        k: Option<usize>,

        /// Vector weight in [0, 1]; 0 = lexical only, 1 = vector only.
        #[arg(long)]
        alpha: Option<f64>,

        /// Comma-separated dataset filter.
        #[arg(long, value_delimiter = ',')]
        datasets: Option<Vec<String>>,

        /// Print JSON including per-result score breakdown.
        #[arg(long)]
        explain: bool,
    },

    /// Show store, index and last-ingest status.
    Status,

    /// List fully ingested files.
    Checkpoints {
        #[arg(long)]
        dataset: Option<String>,
    },

    /// Rebuild the lexical shadow from stored records.
    Repair,
}

fn progress_mode(value: Option<&str>) -> Result<ProgressMode> {
    match value {
        None => Ok(ProgressMode::default_for_tty()),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some("off") => Ok(ProgressMode::Off),
        Some(other) => anyhow::bail!("Unknown progress mode: {}. Use human, json, or off.", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg: Config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let (store, state) = sqlite_store::SqliteStore::open(&cfg).await?;
            store.pool().close().await;
            match state {
                lead_search::db::StoreState::Ready => println!("Store initialized successfully."),
                lead_search::db::StoreState::Recreated => {
                    println!("Existing store was corrupt; recreated empty.")
                }
            }
        }
        Commands::Ingest {
            archive,
            pattern,
            dataset,
            limit,
            no_vectors,
            progress,
        } => {
            let reporter = progress_mode(progress.as_deref())?.reporter();
            let embedder = if no_vectors {
                None
            } else {
                create_embedder(&cfg.embedding)?
            };
            let req = IngestRequest {
                archive,
                pattern,
                dataset,
                limit,
                skip_vectors: no_vectors,
            };
            let report =
                ingest::run_ingest(&cfg, &req, embedder.as_deref(), &*reporter).await?;

            println!("ingest {} ({})", req.dataset, req.archive.display());
            println!(
                "  files: {} completed, {} skipped, {} total",
                report.files_completed, report.files_skipped, report.files_total
            );
            println!(
                "  rows: {} read, {} new, {} malformed",
                report.rows_read, report.rows_inserted, report.rows_malformed
            );
            if !req.skip_vectors {
                println!("  vectors: {} added", report.vectors_added);
            }
            if report.truncated {
                println!("  stopped at row limit; last file not checkpointed");
            }
            if report.store_recreated {
                println!("  store was corrupt and has been recreated");
            }
            println!("ok");
        }
        Commands::Search {
            query,
            k,
            alpha,
            datasets,
            explain,
        } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let opts = SearchOptions {
                query,
                k,
                alpha,
                datasets,
                explain,
            };
            search::run_search(&cfg, embedder.as_deref(), &opts).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Checkpoints { dataset } => {
            stats::run_checkpoints(&cfg, dataset.as_deref()).await?;
        }
        Commands::Repair => {
            stats::run_repair(&cfg).await?;
        }
    }

    Ok(())
}

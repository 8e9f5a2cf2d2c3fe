//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/leads.sqlite"
//!
//! [index]
//! dir = "./data/index"
//! backend = "ivf"          # or "hnsw"
//!
//! [ingest]
//! batch_size = 5000
//! status_path = "./data/status.json"
//!
//! [embedding]
//! provider = "local"       # "disabled" | "hash" | "local"
//! model = "all-minilm-l6-v2"
//! dims = 384
//!
//! [retrieval]
//! default_k = 20
//! hybrid_alpha = 0.5
//! ```
//!
//! Every section except `[db]` is optional.

use anyhow::{Context, Result};
use lead_search_core::vector::{BackendKind, IndexOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_nlist")]
    pub nlist: usize,
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,
    #[serde(default = "default_ef_construction")]
    pub hnsw_ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: usize,
    #[serde(default = "default_capacity")]
    pub initial_capacity: usize,
    #[serde(default = "default_capacity")]
    pub growth_slack: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            backend: default_backend(),
            nlist: default_nlist(),
            nprobe: default_nprobe(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_ef_construction(),
            hnsw_ef_search: default_ef_search(),
            initial_capacity: default_capacity(),
            growth_slack: default_capacity(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_backend() -> String {
    "ivf".to_string()
}
fn default_nlist() -> usize {
    1024
}
fn default_nprobe() -> usize {
    16
}
fn default_hnsw_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}
fn default_capacity() -> usize {
    10_000
}

impl IndexConfig {
    /// Backend kind; validated by [`load_config`].
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.backend.parse::<BackendKind>().map_err(anyhow::Error::msg)
    }

    pub fn options(&self) -> Result<IndexOptions> {
        Ok(IndexOptions {
            backend: self.backend_kind()?,
            nlist: self.nlist,
            nprobe: self.nprobe,
            hnsw_m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
            initial_capacity: self.initial_capacity,
            growth_slack: self.growth_slack,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Upper bound on the uncompressed size of one archive member.
    #[serde(default = "default_max_member_bytes")]
    pub max_member_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch(),
            status_path: default_status_path(),
            status_interval_ms: default_status_interval_ms(),
            max_member_bytes: default_max_member_bytes(),
        }
    }
}

fn default_ingest_batch() -> usize {
    5000
}
fn default_status_path() -> PathBuf {
    PathBuf::from("./data/status.json")
}
fn default_status_interval_ms() -> u64 {
    500
}
fn default_max_member_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

impl IngestConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_k() -> usize {
    20
}
fn default_hybrid_alpha() -> f64 {
    0.5
}

impl Config {
    /// Config rooted at `dir`: store, index and status file all inside it.
    /// Used by tests and as a fallback for `leads init` without a file.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("leads.sqlite"),
            },
            index: IndexConfig {
                dir: dir.join("index"),
                ..IndexConfig::default()
            },
            ingest: IngestConfig {
                status_path: dir.join("status.json"),
                ..IngestConfig::default()
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    config.index.backend_kind()?;
    if config.index.nlist == 0 || config.index.nprobe == 0 {
        anyhow::bail!("index.nlist and index.nprobe must be > 0");
    }
    if config.index.hnsw_m < 2 {
        anyhow::bail!("index.hnsw_m must be >= 2");
    }
    if config.index.initial_capacity == 0 {
        anyhow::bail!("index.initial_capacity must be > 0");
    }

    if config.retrieval.default_k == 0 {
        anyhow::bail!("retrieval.default_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "hash" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'hash'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}

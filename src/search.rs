//! Search entry point: wires the SQLite store, the persisted vector index
//! and the configured embedder into the hybrid query engine.
//!
//! A vector index that is missing, unreadable or built with different
//! dimensions than the current embedder is not an error; the query runs
//! lexical-only and a warning is logged.

use anyhow::Result;
use lead_search_core::embedding::Embedder;
use lead_search_core::models::ScoredLead;
use lead_search_core::search::{hybrid_search, HybridQuery};
use lead_search_core::vector::VectorIndex;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    /// Defaults to `retrieval.default_k`.
    pub k: Option<usize>,
    /// Defaults to `retrieval.hybrid_alpha`.
    pub alpha: Option<f64>,
    pub datasets: Option<Vec<String>>,
    pub explain: bool,
}

pub async fn search_leads(
    config: &Config,
    embedder: Option<&dyn Embedder>,
    opts: &SearchOptions,
) -> Result<Vec<ScoredLead>> {
    let (store, _) = SqliteStore::open(config).await?;
    let index = match embedder {
        Some(embedder) => load_index(config, embedder),
        None => None,
    };

    let query = HybridQuery {
        query: &opts.query,
        k: opts.k.unwrap_or(config.retrieval.default_k),
        alpha: opts.alpha.unwrap_or(config.retrieval.hybrid_alpha),
        datasets: opts.datasets.as_deref(),
        explain: opts.explain,
    };
    let results = hybrid_search(&store, index.as_ref(), embedder, &query).await;
    store.pool().close().await;
    results
}

fn load_index(config: &Config, embedder: &dyn Embedder) -> Option<VectorIndex> {
    let options = match config.index.options() {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, "invalid index options; lexical only");
            return None;
        }
    };
    match VectorIndex::load(&config.index.dir, &options) {
        Ok(Some(index)) if index.dims() == embedder.dims() => Some(index),
        Ok(Some(index)) => {
            tracing::warn!(
                index_dims = index.dims(),
                embedder_dims = embedder.dims(),
                "vector index dimensions differ from embedder; lexical only"
            );
            None
        }
        Ok(None) => {
            tracing::debug!(dir = %config.index.dir.display(), "no vector index; lexical only");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "vector index unreadable; lexical only");
            None
        }
    }
}

pub async fn run_search(
    config: &Config,
    embedder: Option<&dyn Embedder>,
    opts: &SearchOptions,
) -> Result<()> {
    let results = search_leads(config, embedder, opts).await?;

    if opts.explain {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let lead = &result.lead;
        println!(
            "{}. [{:.4}] {} / {}",
            i + 1,
            result.score,
            lead.dataset,
            lead.username.as_deref().unwrap_or("(no username)")
        );
        if let Some(ref name) = lead.name {
            println!("    name: {}", name);
        }
        if let Some(ref category) = lead.category {
            println!("    category: {}", category);
        }
        if let Some(followers) = lead.follower_count {
            println!("    followers: {}", followers);
        }
        if let Some(ref email) = lead.email {
            println!("    email: {}", email);
        }
        if let Some(ref website) = lead.website {
            println!("    website: {}", website);
        }
        println!("    id: {}", lead.id);
        println!();
    }
    Ok(())
}

//! Storage abstraction for lead records.
//!
//! The [`LeadStore`] trait is everything the query engine needs from the
//! content store: appending batches, the lexical shadow index, and
//! hydration by id. The SQLite implementation lives in the application
//! crate; [`memory::InMemoryLeadStore`] backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{AppendOutcome, LeadRecord, LexicalHit, NewLead};

/// Abstract content store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`append_batch`](LeadStore::append_batch) | Atomically persist rows + lexical entries |
/// | [`lexical_search`](LeadStore::lexical_search) | Ranked ids from the lexical shadow |
/// | [`fetch`](LeadStore::fetch) | Hydrate records by id |
/// | [`filter_datasets`](LeadStore::filter_datasets) | Restrict ids to datasets |
/// | [`count`](LeadStore::count) | Number of stored records |
/// | [`health_check`](LeadStore::health_check) | Integrity probe |
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Persist a batch and its lexical entries in one atomic unit.
    ///
    /// New rows receive increasing ids. Rows whose dedup key is already
    /// stored are not inserted again; their existing id is returned in
    /// position. On error nothing from the batch is visible.
    async fn append_batch(&self, batch: &[NewLead]) -> Result<AppendOutcome>;

    /// Up to `limit` ids matching `query`, best first, ties by ascending id.
    /// `datasets`, when given, restricts hits to those datasets.
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        datasets: Option<&[String]>,
    ) -> Result<Vec<LexicalHit>>;

    /// Records for the given ids. Unknown ids are absent from the map.
    async fn fetch(&self, ids: &[i64]) -> Result<HashMap<i64, LeadRecord>>;

    /// The subset of `ids` whose record belongs to one of `datasets`.
    async fn filter_datasets(&self, ids: &[i64], datasets: &[String]) -> Result<HashSet<i64>>;

    async fn count(&self) -> Result<u64>;

    /// `true` when the store passes its integrity check.
    async fn health_check(&self) -> Result<bool>;
}

/// Split free text into lowercase alphanumeric search terms.
///
/// Shared by every lexical backend so the same query matches the same way.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

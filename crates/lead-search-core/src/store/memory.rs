//! In-memory [`LeadStore`] implementation for tests.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. Lexical search
//! requires every query term to appear in the text blob (implicit AND) and
//! ranks by total term occurrences.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{AppendOutcome, LeadRecord, LexicalHit, NewLead};

use super::{query_terms, LeadStore};

type DedupKey = (String, String, i64, String);

#[derive(Default)]
struct Inner {
    records: BTreeMap<i64, LeadRecord>,
    tokens: HashMap<i64, Vec<String>>,
    dedup: HashMap<DedupKey, i64>,
    next_id: i64,
}

/// In-memory store for testing.
pub struct InMemoryLeadStore {
    inner: RwLock<Inner>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        }
    }
}

impl Default for InMemoryLeadStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn append_batch(&self, batch: &[NewLead]) -> Result<AppendOutcome> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut outcome = AppendOutcome::default();
        for new in batch {
            let key = (
                new.dataset.clone(),
                new.source_file.clone(),
                new.source_row,
                new.lead.text.clone(),
            );
            if let Some(&existing) = inner.dedup.get(&key) {
                outcome.ids.push(existing);
                continue;
            }
            let id = inner.next_id;
            inner.next_id += 1;
            inner.dedup.insert(key, id);
            inner.tokens.insert(id, query_terms(&new.lead.text));
            inner.records.insert(id, LeadRecord::from_new(id, new));
            outcome.ids.push(id);
            outcome.inserted += 1;
        }
        Ok(outcome)
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        datasets: Option<&[String]>,
    ) -> Result<Vec<LexicalHit>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().map_err(poisoned)?;
        let mut hits: Vec<LexicalHit> = Vec::new();
        for (id, record) in &inner.records {
            if let Some(ds) = datasets {
                if !ds.contains(&record.dataset) {
                    continue;
                }
            }
            let tokens = match inner.tokens.get(id) {
                Some(t) => t,
                None => continue,
            };
            let mut occurrences = 0usize;
            let mut all = true;
            for term in &terms {
                let n = tokens.iter().filter(|t| *t == term).count();
                if n == 0 {
                    all = false;
                    break;
                }
                occurrences += n;
            }
            if all {
                hits.push(LexicalHit {
                    id: *id,
                    rank: -(occurrences as f64),
                });
            }
        }
        hits.sort_by(|a, b| a.rank.total_cmp(&b.rank).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch(&self, ids: &[i64]) -> Result<HashMap<i64, LeadRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.records.get(id).map(|r| (*id, r.clone())))
            .collect())
    }

    async fn filter_datasets(&self, ids: &[i64], datasets: &[String]) -> Result<HashSet<i64>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| {
                inner
                    .records
                    .get(id)
                    .is_some_and(|r| datasets.contains(&r.dataset))
            })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.records.len() as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.inner.read().is_ok())
    }
}

//! Hybrid query engine.
//!
//! Operates entirely through the [`LeadStore`] trait plus an optional
//! [`VectorIndex`] and [`Embedder`]; the caller decides where those come
//! from.
//!
//! # Algorithm
//!
//! 1. Vector weight `α`, lexical weight `1 − α`. With no usable vector
//!    index (absent, empty, or no embedder) the lexical weight is 1.
//! 2. Vector side (weight > 0): embed the query, fetch `max(5k, 100)`
//!    nearest ids, drop ids outside the dataset filter.
//! 3. Lexical side (weight > 0): fetch `5k` ids from the shadow index.
//! 4. Fuse with [`fuse`](crate::fusion::fuse): `weight × (source_score + 1/rank)`.
//! 5. Sort by score desc, id asc; keep `k`; hydrate from the store.

use anyhow::{bail, Result};

use crate::embedding::Embedder;
use crate::fusion::fuse;
use crate::models::ScoredLead;
use crate::store::LeadStore;
use crate::vector::VectorIndex;

/// Lexical candidates fetched per requested result.
pub const CANDIDATE_FACTOR: usize = 5;
/// Floor on vector candidates regardless of `k`.
pub const MIN_VECTOR_CANDIDATES: usize = 100;

/// Inputs for one query.
#[derive(Debug, Clone)]
pub struct HybridQuery<'a> {
    pub query: &'a str,
    pub k: usize,
    /// Vector weight in `[0, 1]`; lexical weight is `1 − alpha`.
    pub alpha: f64,
    /// Restrict results to these datasets.
    pub datasets: Option<&'a [String]>,
    /// Attach a [`ScoreBreakdown`](crate::models::ScoreBreakdown) to each result.
    pub explain: bool,
}

/// Run a hybrid query. Returns at most `k` hydrated records, best first.
pub async fn hybrid_search<S: LeadStore + ?Sized>(
    store: &S,
    index: Option<&VectorIndex>,
    embedder: Option<&dyn Embedder>,
    q: &HybridQuery<'_>,
) -> Result<Vec<ScoredLead>> {
    if !(0.0..=1.0).contains(&q.alpha) {
        bail!("alpha must be in [0.0, 1.0], got {}", q.alpha);
    }
    if q.k == 0 || q.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let vector_side = match (index, embedder) {
        (Some(index), Some(embedder)) if !index.is_empty() => Some((index, embedder)),
        (Some(index), None) if !index.is_empty() => {
            tracing::warn!("vector index present but no embedder configured; lexical only");
            None
        }
        _ => None,
    };
    let (vector_weight, lexical_weight) = match vector_side {
        Some(_) => (q.alpha, 1.0 - q.alpha),
        None => (0.0, 1.0),
    };

    let mut vector_hits: Vec<(i64, f64)> = Vec::new();
    if let (Some((index, embedder)), true) = (vector_side, vector_weight > 0.0) {
        let query_vec = embedder
            .embed(&[q.query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for the query"))?;
        let limit = (q.k * CANDIDATE_FACTOR).max(MIN_VECTOR_CANDIDATES);
        let hits = index.search(&query_vec, limit)?;
        vector_hits = match q.datasets {
            Some(datasets) => {
                let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
                let allowed = store.filter_datasets(&ids, datasets).await?;
                hits.into_iter()
                    .filter(|h| allowed.contains(&h.id))
                    .map(|h| (h.id, h.similarity as f64))
                    .collect()
            }
            None => hits
                .into_iter()
                .map(|h| (h.id, h.similarity as f64))
                .collect(),
        };
    }

    let lexical_ids: Vec<i64> = if lexical_weight > 0.0 {
        store
            .lexical_search(q.query, q.k * CANDIDATE_FACTOR, q.datasets)
            .await?
            .into_iter()
            .map(|h| h.id)
            .collect()
    } else {
        Vec::new()
    };

    tracing::debug!(
        vector = vector_hits.len(),
        lexical = lexical_ids.len(),
        vector_weight,
        lexical_weight,
        "fusing candidates"
    );

    let mut fused = fuse(&vector_hits, &lexical_ids, vector_weight, lexical_weight);
    fused.truncate(q.k);

    let ids: Vec<i64> = fused.iter().map(|c| c.id).collect();
    let mut records = store.fetch(&ids).await?;

    Ok(fused
        .into_iter()
        .filter_map(|c| {
            records.remove(&c.id).map(|lead| ScoredLead {
                score: c.score,
                lead,
                explain: q.explain.then_some(c.breakdown),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::NewLead;
    use crate::normalize::normalize_row;
    use crate::store::memory::InMemoryLeadStore;
    use crate::vector::{BackendKind, IndexOptions};

    const DIMS: usize = 128;

    fn lead(dataset: &str, row: i64, username: &str, name: &str, bio: &str) -> NewLead {
        let raw = [("username", username), ("name", name), ("bio", bio)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NewLead {
            dataset: dataset.to_string(),
            source_file: "leads.csv".to_string(),
            source_row: row,
            lead: normalize_row(&raw),
        }
    }

    async fn fixture() -> (InMemoryLeadStore, VectorIndex, HashEmbedder) {
        let store = InMemoryLeadStore::new();
        let batch = vec![
            lead("shops", 1, "user1", "Alpha", "vegan bakery downtown"),
            lead("shops", 2, "user2", "Beta", "motorcycle repair garage"),
            lead("cafes", 3, "user3", "Gamma", "vegan cafe and bakery"),
            lead("cafes", 4, "user4", "Delta", "espresso bar"),
        ];
        let outcome = store.append_batch(&batch).await.unwrap();
        let embedder = HashEmbedder::new(DIMS);
        let texts: Vec<String> = batch.iter().map(|l| l.lead.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        let mut index = VectorIndex::new(
            DIMS,
            &IndexOptions {
                backend: BackendKind::Hnsw,
                ..IndexOptions::default()
            },
        );
        index.add(&vectors, &outcome.ids).unwrap();
        (store, index, embedder)
    }

    fn query<'a>(text: &'a str, alpha: f64) -> HybridQuery<'a> {
        HybridQuery {
            query: text,
            k: 10,
            alpha,
            datasets: None,
            explain: false,
        }
    }

    fn ids(results: &[ScoredLead]) -> Vec<i64> {
        results.iter().map(|r| r.lead.id).collect()
    }

    #[tokio::test]
    async fn test_alpha_zero_matches_lexical_order() {
        let (store, index, embedder) = fixture().await;
        let results = hybrid_search(&store, Some(&index), Some(&embedder), &query("bakery", 0.0))
            .await
            .unwrap();
        let lexical: Vec<i64> = store
            .lexical_search("bakery", 50, None)
            .await
            .unwrap()
            .iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids(&results), lexical);
    }

    #[tokio::test]
    async fn test_alpha_one_matches_vector_order() {
        let (store, index, embedder) = fixture().await;
        let results = hybrid_search(&store, Some(&index), Some(&embedder), &query("vegan", 1.0))
            .await
            .unwrap();
        let qv = embedder.embed_one("vegan");
        let mut expected: Vec<(i64, f64)> = index
            .search(&qv, 100)
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id, h.similarity as f64 + 1.0 / (i + 1) as f64))
            .collect();
        expected.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        assert_eq!(
            ids(&results),
            expected.iter().map(|e| e.0).collect::<Vec<_>>()
        );
        // every stored vector is a candidate, even with no lexical match
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_cold_start_is_lexical_only() {
        let (store, _index, embedder) = fixture().await;
        let results = hybrid_search(&store, None, Some(&embedder), &query("Alpha", 0.5))
            .await
            .unwrap();
        assert_eq!(ids(&results), vec![1]);
        // lexical weight 1: source score 1.0 plus 1/rank
        assert!((results[0].score - 2.0).abs() < 1e-12);
        assert_eq!(results[0].lead.username.as_deref(), Some("user1"));
    }

    #[tokio::test]
    async fn test_dataset_filter_applies_to_both_sides() {
        let (store, index, embedder) = fixture().await;
        let cafes = vec!["cafes".to_string()];
        let q = HybridQuery {
            datasets: Some(cafes.as_slice()),
            ..query("vegan bakery", 0.5)
        };
        let results = hybrid_search(&store, Some(&index), Some(&embedder), &q)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.lead.dataset == "cafes"));
        assert_eq!(results[0].lead.id, 3);
    }

    #[tokio::test]
    async fn test_k_truncates_and_explain_populates() {
        let (store, index, embedder) = fixture().await;
        let q = HybridQuery {
            k: 2,
            explain: true,
            ..query("vegan bakery", 0.5)
        };
        let results = hybrid_search(&store, Some(&index), Some(&embedder), &q)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        let explain = results[0].explain.as_ref().unwrap();
        assert_eq!(explain.vector_weight, 0.5);
        assert!(explain.lexical_rank.is_some() || explain.vector_rank.is_some());
    }

    #[tokio::test]
    async fn test_degenerate_inputs() {
        let (store, index, embedder) = fixture().await;
        assert!(hybrid_search(&store, Some(&index), Some(&embedder), &query("   ", 0.5))
            .await
            .unwrap()
            .is_empty());
        assert!(hybrid_search(&store, Some(&index), Some(&embedder), &query("x", 1.5))
            .await
            .is_err());
        let wrong_dims = HashEmbedder::new(DIMS / 2);
        assert!(
            hybrid_search(&store, Some(&index), Some(&wrong_dims), &query("vegan", 0.5))
                .await
                .is_err()
        );
    }
}

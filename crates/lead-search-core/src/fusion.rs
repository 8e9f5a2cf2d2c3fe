//! Weighted rank fusion.
//!
//! Each candidate list contributes `weight × (source_score + 1/rank)` to
//! every id it contains, with 1-based ranks in list order:
//!
//! | Source | `source_score` | weight |
//! |--------|----------------|--------|
//! | vector | cosine similarity | `alpha` |
//! | lexical | 1 (no native score) | `1 - alpha` |
//!
//! A list with weight 0 contributes nothing and is skipped entirely, so at
//! `alpha = 0` only lexical hits appear and at `alpha = 1` only vector hits
//! do. Final order: score descending, then id ascending.

use std::collections::HashMap;

use crate::models::ScoreBreakdown;

/// One id's accumulated score and per-source provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: i64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Fuse a vector list `(id, similarity)` and a lexical list of ids.
pub fn fuse(
    vector: &[(i64, f64)],
    lexical: &[i64],
    vector_weight: f64,
    lexical_weight: f64,
) -> Vec<FusedCandidate> {
    let mut scores: HashMap<i64, FusedCandidate> = HashMap::new();
    let blank = ScoreBreakdown {
        vector_weight,
        lexical_weight,
        ..ScoreBreakdown::default()
    };

    if vector_weight > 0.0 {
        for (i, &(id, similarity)) in vector.iter().enumerate() {
            let rank = i + 1;
            let c = entry(&mut scores, id, &blank);
            if c.breakdown.vector_rank.is_none() {
                c.score += vector_weight * (similarity + 1.0 / rank as f64);
                c.breakdown.vector_rank = Some(rank);
                c.breakdown.vector_similarity = Some(similarity);
            }
        }
    }
    if lexical_weight > 0.0 {
        for (i, &id) in lexical.iter().enumerate() {
            let rank = i + 1;
            let c = entry(&mut scores, id, &blank);
            if c.breakdown.lexical_rank.is_none() {
                c.score += lexical_weight * (1.0 + 1.0 / rank as f64);
                c.breakdown.lexical_rank = Some(rank);
            }
        }
    }

    let mut fused: Vec<FusedCandidate> = scores.into_values().collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    fused
}

fn entry<'a>(
    scores: &'a mut HashMap<i64, FusedCandidate>,
    id: i64,
    blank: &ScoreBreakdown,
) -> &'a mut FusedCandidate {
    scores.entry(id).or_insert_with(|| FusedCandidate {
        id,
        score: 0.0,
        breakdown: blank.clone(),
    })
}

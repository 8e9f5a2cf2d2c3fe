//! Core data models for lead-search.
//!
//! | Type | Produced by | Consumed by |
//! |------|-------------|-------------|
//! | [`NormalizedLead`] | [`normalize_row`](crate::normalize::normalize_row) | ingestion |
//! | [`NewLead`] | ingestion | [`LeadStore::append_batch`](crate::store::LeadStore::append_batch) |
//! | [`LeadRecord`] | the store | search hydration |
//! | [`ScoredLead`] | [`hybrid_search`](crate::search::hybrid_search) | CLI / callers |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A raw tabular row: column header → cell text.
pub type RawRow = HashMap<String, String>;

/// Canonical lead fields produced from one raw row.
///
/// Every optional field is either absent or a non-empty trimmed string.
/// `text` is the searchable blob: the present string fields joined with
/// `" | "` in canonical order. It is the only thing ever embedded or
/// lexically indexed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLead {
    pub username: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub category: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub text: String,
}

/// A lead waiting to be appended to the store.
///
/// `source_file` and `source_row` (1-based, header excluded) identify the
/// row inside its archive member and feed the store's dedup key.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub dataset: String,
    pub source_file: String,
    pub source_row: i64,
    pub lead: NormalizedLead,
}

/// A persisted lead with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: i64,
    pub dataset: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub category: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub text: String,
}

impl LeadRecord {
    pub fn from_new(id: i64, new: &NewLead) -> Self {
        let lead = &new.lead;
        Self {
            id,
            dataset: new.dataset.clone(),
            username: lead.username.clone(),
            name: lead.name.clone(),
            bio: lead.bio.clone(),
            category: lead.category.clone(),
            follower_count: lead.follower_count,
            following_count: lead.following_count,
            website: lead.website.clone(),
            email: lead.email.clone(),
            phone: lead.phone.clone(),
            text: lead.text.clone(),
        }
    }
}

/// Result of appending one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Store id for every input row, in input order. Rows that were
    /// already present resolve to their existing id.
    pub ids: Vec<i64>,
    /// Number of rows actually inserted by this call.
    pub inserted: usize,
}

/// A lexical candidate: record id plus the backend's raw rank
/// (BM25 rank, lower is better).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    pub id: i64,
    pub rank: f64,
}

/// Per-source contribution to a fused score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_rank: Option<usize>,
    pub vector_weight: f64,
    pub lexical_weight: f64,
}

/// A hydrated search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredLead {
    pub score: f64,
    #[serde(flatten)]
    pub lead: LeadRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreBreakdown>,
}

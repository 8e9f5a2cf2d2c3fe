//! # lead-search-core
//!
//! Runtime-agnostic core of lead-search: everything that does not need a
//! SQLite connection or an archive on disk.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Lead records, scored results, lexical hits |
//! | [`normalize`] | Raw row → canonical lead + searchable text blob |
//! | [`store`] | [`LeadStore`](store::LeadStore) trait + in-memory implementation |
//! | [`embedding`] | [`Embedder`](embedding::Embedder) trait, hash embedder, vector math |
//! | [`vector`] | Approximate nearest-neighbour index (IVF-SQ8 and HNSW backends) |
//! | [`fusion`] | Weighted reciprocal-rank fusion of candidate lists |
//! | [`search`] | Hybrid query algorithm over a store + optional vector index |
//! | [`error`] | Typed vector index errors |
//!
//! The application crate (`lead-search`) provides the SQLite-backed store,
//! the checkpoint ledger and the ingestion controller on top of these types.

pub mod embedding;
pub mod error;
pub mod fusion;
pub mod models;
pub mod normalize;
pub mod search;
pub mod store;
pub mod vector;

//! # Lead Search
//!
//! Hybrid lexical + vector retrieval over large lead exports.
//!
//! Zip archives of CSV/XLSX exports are normalized into lead records,
//! stored in SQLite with an FTS5 shadow, embedded into an approximate
//! nearest-neighbour index, and queried with weighted reciprocal-rank
//! fusion of both sides.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Zip archive │──▶│  Ingestion   │──▶│ SQLite + FTS5  │
//! │  CSV / XLSX │   │  controller  │   │ checkpoints    │
//! └─────────────┘   └──────┬───────┘   └───────┬────────┘
//!                          │                   │
//!                          ▼                   ▼
//!                   ┌──────────────┐   ┌────────────────┐
//!                   │ Vector index │──▶│  Hybrid query  │
//!                   │  IVF / HNSW  │   │    engine      │
//!                   └──────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! leads init
//! leads ingest --zip exports.zip --pattern '*.csv' --dataset instagram
//! leads search "specialty coffee roaster" --k 10
//! leads status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Connection, integrity check, corrupt-store recovery |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite content store with FTS5 lexical shadow |
//! | [`checkpoint`] | Per-file completion ledger |
//! | [`archive`] | Member selection and CSV/TSV/XLSX row decoding |
//! | [`sheet`] | XLSX worksheet reader |
//! | [`embedding`] | Embedder construction from config |
//! | [`ingest`] | Ingestion controller |
//! | [`progress`] | Stderr progress and the throttled status document |
//! | [`search`] | Search entry point |
//! | [`stats`] | `status`, `checkpoints` and `repair` commands |
//!
//! Store-independent logic (normalization, vector index, fusion, the query
//! algorithm) lives in the `lead-search-core` crate.

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sheet;
pub mod sqlite_store;
pub mod stats;

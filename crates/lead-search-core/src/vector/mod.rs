//! Approximate nearest-neighbour index over lead embeddings.
//!
//! [`VectorIndex`] owns one [`AnnBackend`] plus the mapping from backend
//! slot (insertion order) to store id. Every slot has exactly one id.
//!
//! # Backends
//!
//! | Kind | Type | Notes |
//! |------|------|-------|
//! | `ivf` | [`IvfIndex`] | trained on the first batch, SQ8 codes, partitioned lists |
//! | `hnsw` | [`HnswIndex`] | exact incremental insertion, bounded capacity |
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/meta.json        {"dims", "backend", "count"}
//! <dir>/id_mapping.bin   count × i64 little-endian
//! <dir>/ivf.bin          backend blob (bincode + CRC32 footer)
//! <dir>/hnsw.bin
//! ```
//!
//! `meta.json` is written last. A directory without it holds no index.

mod hnsw;
mod ivf;
mod persist;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub use hnsw::HnswIndex;
pub use ivf::IvfIndex;

const META_FILE: &str = "meta.json";
const IDS_FILE: &str = "id_mapping.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ivf,
    Hnsw,
}

impl BackendKind {
    fn blob_file(self) -> &'static str {
        match self {
            BackendKind::Ivf => "ivf.bin",
            BackendKind::Hnsw => "hnsw.bin",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ivf => write!(f, "ivf"),
            BackendKind::Hnsw => write!(f, "hnsw"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ivf" => Ok(BackendKind::Ivf),
            "hnsw" => Ok(BackendKind::Hnsw),
            other => Err(format!(
                "Unknown index backend: '{}'. Must be ivf or hnsw.",
                other
            )),
        }
    }
}

/// Construction and search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    pub backend: BackendKind,
    /// IVF: upper bound on inverted lists.
    pub nlist: usize,
    /// IVF: minimum lists probed per query.
    pub nprobe: usize,
    /// HNSW: links per node on upper layers (layer 0 gets twice this).
    pub hnsw_m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// HNSW: nodes pre-allocated by a fresh graph.
    pub initial_capacity: usize,
    /// HNSW: headroom added on top of `len + batch` when growing.
    pub growth_slack: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ivf,
            nlist: 1024,
            nprobe: 16,
            hnsw_m: 16,
            ef_construction: 200,
            ef_search: 64,
            initial_capacity: 10_000,
            growth_slack: 10_000,
        }
    }
}

/// Operations every ANN backend provides. Slots are assigned densely in
/// insertion order starting at 0; distances are cosine distances
/// (`1 - dot` on unit vectors), ascending.
pub trait AnnBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;
    fn len(&self) -> usize;
    fn is_trained(&self) -> bool;
    fn train(&mut self, sample: &[Vec<f32>]);
    /// `None` for unbounded backends.
    fn capacity(&self) -> Option<usize>;
    fn reserve(&mut self, capacity: usize);
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError>;
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;
    fn apply_search_options(&mut self, options: &IndexOptions);
    fn encode(&self) -> Result<Vec<u8>, IndexError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMeta {
    dims: usize,
    backend: BackendKind,
    count: usize,
}

/// A vector hit: store id and cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub id: i64,
    pub similarity: f32,
}

#[derive(Debug)]
pub struct VectorIndex {
    dims: usize,
    backend: Box<dyn AnnBackend>,
    ids: Vec<i64>,
    id_set: HashSet<i64>,
    growth_slack: usize,
}

impl VectorIndex {
    /// Create an empty index with the backend named in `options`.
    pub fn new(dims: usize, options: &IndexOptions) -> Self {
        let backend: Box<dyn AnnBackend> = match options.backend {
            BackendKind::Ivf => Box::new(IvfIndex::new(dims, options)),
            BackendKind::Hnsw => Box::new(HnswIndex::new(dims, options)),
        };
        Self {
            dims,
            backend,
            ids: Vec::new(),
            id_set: HashSet::new(),
            growth_slack: options.growth_slack,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.id_set.contains(&id)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.backend.capacity()
    }

    /// Add vectors with their store ids.
    ///
    /// Validates everything before touching the backend: a dimension
    /// mismatch, a length mismatch, or an id already present leaves the
    /// index unchanged. Untrained backends train on this batch; bounded
    /// backends grow to `len + batch + growth_slack` when needed.
    pub fn add(&mut self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<(), IndexError> {
        if vectors.len() != ids.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: bad.len(),
            });
        }
        let mut batch_ids = HashSet::with_capacity(ids.len());
        for &id in ids {
            if self.id_set.contains(&id) || !batch_ids.insert(id) {
                return Err(IndexError::DuplicateId(id));
            }
        }

        if !self.backend.is_trained() {
            self.backend.train(vectors);
        }
        if let Some(capacity) = self.backend.capacity() {
            let needed = self.len() + vectors.len();
            if needed > capacity {
                self.backend.reserve(needed + self.growth_slack);
            }
        }

        self.backend.add(vectors)?;
        self.ids.extend_from_slice(ids);
        self.id_set.extend(ids.iter().copied());
        Ok(())
    }

    /// Up to `k` nearest ids by cosine similarity, best first. Returns all
    /// stored vectors when fewer than `k` exist. Similarities are clamped to
    /// `[-1, 1]`; quantized distances can overshoot it slightly.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }
        Ok(self
            .backend
            .search(query, k)
            .into_iter()
            .filter_map(|(slot, distance)| {
                self.ids.get(slot).map(|&id| VectorHit {
                    id,
                    similarity: (1.0 - distance).clamp(-1.0, 1.0),
                })
            })
            .collect())
    }

    /// Persist to `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(dir)?;
        let kind = self.backend.kind();
        persist::write_blob(&dir.join(kind.blob_file()), &self.backend.encode()?)?;
        persist::atomic_write(&dir.join(IDS_FILE), &persist::encode_ids(&self.ids))?;
        let meta = IndexMeta {
            dims: self.dims,
            backend: kind,
            count: self.ids.len(),
        };
        persist::atomic_write(&dir.join(META_FILE), &serde_json::to_vec_pretty(&meta)?)?;
        tracing::info!(
            dir = %dir.display(),
            backend = %kind,
            count = self.ids.len(),
            "saved vector index"
        );
        Ok(())
    }

    /// Load from `dir`. `Ok(None)` when no index has been saved there.
    ///
    /// The saved backend kind wins over `options.backend`; search widths and
    /// growth slack come from `options`.
    pub fn load(dir: &Path, options: &IndexOptions) -> Result<Option<Self>, IndexError> {
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: IndexMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;

        let ids_path = dir.join(IDS_FILE);
        let ids = persist::decode_ids(&ids_path, &std::fs::read(&ids_path)?)?;

        let blob_path = dir.join(meta.backend.blob_file());
        let payload = persist::read_blob(&blob_path)?;
        let mut backend: Box<dyn AnnBackend> = match meta.backend {
            BackendKind::Ivf => Box::new(IvfIndex::decode(&payload)?),
            BackendKind::Hnsw => Box::new(HnswIndex::decode(&payload)?),
        };

        if ids.len() != meta.count || backend.len() != meta.count {
            return Err(IndexError::corrupt(
                dir.display(),
                format!(
                    "count mismatch: meta {}, ids {}, backend {}",
                    meta.count,
                    ids.len(),
                    backend.len()
                ),
            ));
        }
        if meta.backend != options.backend {
            tracing::info!(
                saved = %meta.backend,
                configured = %options.backend,
                "using saved index backend"
            );
        }
        backend.apply_search_options(options);

        let id_set: HashSet<i64> = ids.iter().copied().collect();
        if id_set.len() != ids.len() {
            return Err(IndexError::corrupt(ids_path.display(), "duplicate ids"));
        }
        Ok(Some(Self {
            dims: meta.dims,
            backend,
            ids,
            id_set,
            growth_slack: options.growth_slack,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn options(backend: BackendKind) -> IndexOptions {
        IndexOptions {
            backend,
            initial_capacity: 8,
            growth_slack: 4,
            hnsw_m: 8,
            ef_construction: 32,
            ..IndexOptions::default()
        }
    }

    fn vectors(texts: &[&str], dims: usize) -> Vec<Vec<f32>> {
        let e = HashEmbedder::new(dims);
        texts.iter().map(|t| e.embed_one(t)).collect()
    }

    #[test]
    fn test_dimension_mismatch_is_hard_error() {
        let mut idx = VectorIndex::new(16, &options(BackendKind::Hnsw));
        let err = idx.add(&[vec![0.0; 8]], &[1]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 16,
                got: 8
            }
        ));
        assert!(idx.is_empty());
        assert!(idx.search(&[0.0; 4], 1).is_err());
    }

    #[test]
    fn test_duplicate_and_length_checks() {
        let mut idx = VectorIndex::new(16, &options(BackendKind::Ivf));
        let v = vectors(&["a", "b"], 16);
        assert!(matches!(
            idx.add(&v, &[1]),
            Err(IndexError::LengthMismatch { .. })
        ));
        assert!(matches!(
            idx.add(&v, &[3, 3]),
            Err(IndexError::DuplicateId(3))
        ));
        idx.add(&v, &[1, 2]).unwrap();
        assert!(matches!(
            idx.add(&v[..1], &[2]),
            Err(IndexError::DuplicateId(2))
        ));
        assert_eq!(idx.len(), 2);
        assert!(idx.contains(1) && idx.contains(2) && !idx.contains(3));
    }

    #[test]
    fn test_graph_grows_past_initial_capacity() {
        let mut idx = VectorIndex::new(32, &options(BackendKind::Hnsw));
        assert_eq!(idx.capacity(), Some(8));
        let texts: Vec<String> = (0..20).map(|i| format!("lead number {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let v = vectors(&refs, 32);
        let ids: Vec<i64> = (1..=20).collect();

        idx.add(&v[..6], &ids[..6]).unwrap();
        assert_eq!(idx.capacity(), Some(8));
        idx.add(&v[6..], &ids[6..]).unwrap();
        // 6 + 14 + slack 4
        assert_eq!(idx.capacity(), Some(24));
        assert_eq!(idx.len(), 20);
    }

    #[test]
    fn test_similarity_stays_in_cosine_range() {
        let texts: Vec<String> = (0..200)
            .map(|i| format!("lead {} shop {} city {}", i, i % 7, i % 13))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let v = vectors(&refs, 64);
        let ids: Vec<i64> = (1..=200).collect();
        for kind in [BackendKind::Ivf, BackendKind::Hnsw] {
            let mut idx = VectorIndex::new(64, &IndexOptions {
                backend: kind,
                ..IndexOptions::default()
            });
            idx.add(&v, &ids).unwrap();
            for q in &v {
                for hit in idx.search(q, 5).unwrap() {
                    assert!(
                        (-1.0..=1.0).contains(&hit.similarity),
                        "{kind}: similarity {} out of range",
                        hit.similarity
                    );
                }
            }
        }
    }

    #[test]
    fn test_search_maps_slots_to_ids() {
        for kind in [BackendKind::Ivf, BackendKind::Hnsw] {
            let mut idx = VectorIndex::new(64, &options(kind));
            let v = vectors(&["vegan bakery", "motorcycle repair", "coffee roaster"], 64);
            idx.add(&v, &[10, 20, 30]).unwrap();
            let hits = idx.search(&v[1], 10).unwrap();
            assert_eq!(hits.len(), 3, "{kind}");
            assert_eq!(hits[0].id, 20, "{kind}");
            assert!((hits[0].similarity - 1.0).abs() < 0.02, "{kind}");
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        for kind in [BackendKind::Ivf, BackendKind::Hnsw] {
            let dir = tmp.path().join(kind.to_string());
            let mut idx = VectorIndex::new(32, &options(kind));
            let v = vectors(&["alpha one", "beta two", "gamma three"], 32);
            idx.add(&v, &[5, 6, 7]).unwrap();
            idx.save(&dir).unwrap();

            let loaded = VectorIndex::load(&dir, &options(BackendKind::Ivf))
                .unwrap()
                .expect("index present");
            assert_eq!(loaded.len(), 3);
            assert_eq!(loaded.kind(), kind);
            assert_eq!(loaded.dims(), 32);
            assert_eq!(
                loaded.search(&v[2], 1).unwrap()[0].id,
                idx.search(&v[2], 1).unwrap()[0].id
            );
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(VectorIndex::load(tmp.path(), &IndexOptions::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_detects_count_mismatch() {
        let tmp = TempDir::new().unwrap();
        let mut idx = VectorIndex::new(16, &options(BackendKind::Hnsw));
        idx.add(&vectors(&["x", "y"], 16), &[1, 2]).unwrap();
        idx.save(tmp.path()).unwrap();
        std::fs::write(tmp.path().join(IDS_FILE), persist::encode_ids(&[1])).unwrap();
        assert!(matches!(
            VectorIndex::load(tmp.path(), &IndexOptions::default()),
            Err(IndexError::Corrupt { .. })
        ));
    }
}

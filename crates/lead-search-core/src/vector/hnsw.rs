//! Hierarchical navigable small-world graph with bounded capacity.
//!
//! Vectors are stored raw (f32, unit length) and inserted incrementally, so
//! no training is needed. The graph is pre-allocated for `capacity` nodes
//! and refuses inserts past it; the owning [`VectorIndex`](super::VectorIndex)
//! grows it before each batch.
//!
//! Insertion follows the HNSW paper: greedy descent on upper layers,
//! `ef_construction`-wide search per layer, heuristic neighbour selection
//! (Algorithm 4) and bidirectional links with pruning.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_distance;
use crate::error::IndexError;

use super::{AnnBackend, BackendKind, IndexOptions};

const MAX_LAYERS: usize = 16;

/// Search frontier entry; max-heap on negated distance pops the closest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result set entry; max-heap on distance keeps the worst on top for pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    dims: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    capacity: usize,
    /// Contiguous `len * dims` arena.
    vectors: Vec<f32>,
    /// `neighbors[node][layer]`.
    neighbors: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_layer: usize,
}

impl HnswIndex {
    pub fn new(dims: usize, options: &IndexOptions) -> Self {
        let m = options.hnsw_m.max(2);
        let capacity = options.initial_capacity.max(1);
        Self {
            dims,
            m,
            m_max0: m * 2,
            ef_construction: options.ef_construction.max(m),
            ef_search: options.ef_search.max(1),
            capacity,
            vectors: Vec::with_capacity(capacity * dims),
            neighbors: Vec::with_capacity(capacity),
            entry_point: None,
            max_layer: 0,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
        Ok(bincode::deserialize(bytes)?)
    }

    #[inline]
    fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dims;
        &self.vectors[start..start + self.dims]
    }

    #[inline]
    fn distance(&self, query: &[f32], id: u32) -> f32 {
        cosine_distance(query, self.vector(id))
    }

    fn random_level(&self) -> usize {
        let ml = 1.0 / (self.m as f64).ln();
        let r: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(MAX_LAYERS - 1)
    }

    fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Best-first search of one layer. Returns up to `ef` nodes sorted by
    /// ascending distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<(f32, u32)> {
        let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 4);
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
        let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);

        for &ep in entry_points {
            if visited.insert(ep) {
                let dist = self.distance(query, ep);
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: ep,
                });
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: ep,
                });
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(candidate) = candidates.pop() {
            let c_dist = -candidate.neg_distance.0;
            let worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            if results.len() >= ef && c_dist > worst {
                break;
            }

            let node = &self.neighbors[candidate.id as usize];
            if layer >= node.len() {
                continue;
            }
            for &next in &node[layer] {
                if !visited.insert(next) {
                    continue;
                }
                let dist = self.distance(query, next);
                let worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                if results.len() < ef || dist < worst {
                    candidates.push(Candidate {
                        neg_distance: OrderedFloat(-dist),
                        id: next,
                    });
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: next,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(f32, u32)> = results
            .into_iter()
            .map(|r| (r.distance.0, r.id))
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        out
    }

    /// Prefer candidates closer to the base than to any already selected
    /// neighbour; top up with the nearest rejects if that leaves gaps.
    fn select_neighbors(&self, candidates: &[(f32, u32)], m: usize) -> Vec<u32> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut selected: Vec<u32> = Vec::with_capacity(m);
        let mut rejected: Vec<u32> = Vec::new();
        for &(dist_to_base, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            let c = self.vector(cid);
            let diverse = selected
                .iter()
                .all(|&sid| dist_to_base <= cosine_distance(c, self.vector(sid)));
            if diverse {
                selected.push(cid);
            } else {
                rejected.push(cid);
            }
        }
        for cid in rejected {
            if selected.len() >= m {
                break;
            }
            selected.push(cid);
        }
        selected
    }

    fn insert(&mut self, vector: &[f32]) {
        let id = self.neighbors.len() as u32;
        let level = self.random_level();
        self.vectors.extend_from_slice(vector);

        let Some(entry_point) = self.entry_point else {
            self.neighbors.push(vec![Vec::new(); level + 1]);
            self.entry_point = Some(id);
            self.max_layer = level;
            return;
        };

        let mut current = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            if let Some(&(_, nearest)) = self
                .search_layer(vector, std::slice::from_ref(&current), 1, layer)
                .first()
            {
                current = nearest;
            }
        }

        let top = level.min(self.max_layer);
        let mut own: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut eps = vec![current];
        for layer in (0..=top).rev() {
            let found = self.search_layer(vector, &eps, self.ef_construction, layer);
            own[layer] = self.select_neighbors(&found, self.m_max(layer));
            eps = found.iter().map(|&(_, n)| n).collect();
            if eps.is_empty() {
                eps.push(entry_point);
            }
        }
        self.neighbors.push(own);

        for layer in 0..=top {
            let m_max = self.m_max(layer);
            let linked = self.neighbors[id as usize][layer].clone();
            for n in linked {
                let nid = n as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(id);
                if self.neighbors[nid][layer].len() > m_max {
                    let base = self.vector(n).to_vec();
                    let scored: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&c| (cosine_distance(&base, self.vector(c)), c))
                        .collect();
                    self.neighbors[nid][layer] = self.select_neighbors(&scored, m_max);
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
    }

    fn exhaustive(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut all: Vec<(usize, f32)> = (0..self.neighbors.len())
            .map(|i| (i, self.distance(query, i as u32)))
            .collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        all.truncate(k);
        all
    }
}

impl AnnBackend for HnswIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Hnsw
    }

    fn len(&self) -> usize {
        self.neighbors.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, _sample: &[Vec<f32>]) {}

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let extra = capacity - self.len();
        self.vectors.reserve(extra * self.dims);
        self.neighbors.reserve(extra);
        tracing::debug!(from = self.capacity, to = capacity, "grew graph capacity");
        self.capacity = capacity;
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        let requested = self.len() + vectors.len();
        if requested > self.capacity {
            return Err(IndexError::CapacityExceeded {
                capacity: self.capacity,
                requested,
            });
        }
        for v in vectors {
            self.insert(v);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let n = self.len();
        if k == 0 || n == 0 {
            return Vec::new();
        }
        let ef = self.ef_search.max(k);
        if n <= ef {
            return self.exhaustive(query, k);
        }
        let Some(entry_point) = self.entry_point else {
            return Vec::new();
        };

        let mut current = entry_point;
        for layer in (1..=self.max_layer).rev() {
            if let Some(&(_, nearest)) = self
                .search_layer(query, std::slice::from_ref(&current), 1, layer)
                .first()
            {
                current = nearest;
            }
        }
        let mut hits: Vec<(usize, f32)> = self
            .search_layer(query, &[current], ef, 0)
            .into_iter()
            .map(|(d, id)| (id as usize, d))
            .collect();
        hits.truncate(k);
        if hits.len() < k.min(n) {
            return self.exhaustive(query, k);
        }
        hits
    }

    fn apply_search_options(&mut self, options: &IndexOptions) {
        self.ef_search = options.ef_search.max(1);
    }

    fn encode(&self) -> Result<Vec<u8>, IndexError> {
        Ok(bincode::serialize(self)?)
    }
}

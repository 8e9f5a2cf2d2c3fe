//! Inverted-file index with 8-bit scalar quantization (IVF-SQ8).
//!
//! Training runs spherical k-means (k-means++ seeding) over the first batch
//! it sees. Each vector is then assigned to its nearest centroid's inverted
//! list and stored as u8 codes with a per-vector `min`/`scale`.
//!
//! Search ranks centroids by inner product and probes lists in that order:
//! at least `nprobe` lists, and more until `k` candidates have been seen or
//! every list has been probed. So a query always returns `min(k, len)`
//! results.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::embedding::{dot, sq_dist};
use crate::error::IndexError;

use super::{AnnBackend, BackendKind, IndexOptions};

/// Fewer training points per list than this gives degenerate centroids.
const MIN_POINTS_PER_LIST: usize = 39;
const KMEANS_ITERATIONS: usize = 20;
const KMEANS_SEED: u64 = 0x1ead_5eed;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvertedList {
    slots: Vec<u32>,
    codes: Vec<u8>,
    mins: Vec<f32>,
    scales: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    dims: usize,
    nlist: usize,
    nprobe: usize,
    /// `lists.len() * dims` floats; empty until trained.
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
    len: usize,
}

impl IvfIndex {
    pub fn new(dims: usize, options: &IndexOptions) -> Self {
        Self {
            dims,
            nlist: options.nlist.max(1),
            nprobe: options.nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
            len: 0,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    fn centroid(&self, list: usize) -> &[f32] {
        &self.centroids[list * self.dims..(list + 1) * self.dims]
    }

    fn nearest_list(&self, v: &[f32]) -> usize {
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for list in 0..self.lists.len() {
            let score = dot(v, self.centroid(list));
            if score > best_score {
                best_score = score;
                best = list;
            }
        }
        best
    }
}

impl AnnBackend for IvfIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Ivf
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_trained(&self) -> bool {
        !self.lists.is_empty()
    }

    fn train(&mut self, sample: &[Vec<f32>]) {
        if sample.is_empty() {
            return;
        }
        let k = (sample.len() / MIN_POINTS_PER_LIST).clamp(1, self.nlist);
        let mut flat = Vec::with_capacity(sample.len() * self.dims);
        for v in sample {
            flat.extend_from_slice(v);
        }
        self.centroids = spherical_kmeans(&flat, self.dims, k);
        self.lists = vec![InvertedList::default(); k];
        tracing::debug!(
            lists = k,
            sample = sample.len(),
            "trained IVF centroids"
        );
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn reserve(&mut self, _capacity: usize) {}

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if !self.is_trained() {
            self.train(vectors);
        }
        for v in vectors {
            let list = self.nearest_list(v);
            let (codes, min, scale) = quantize(v);
            let slot = self.len as u32;
            let entry = &mut self.lists[list];
            entry.slots.push(slot);
            entry.codes.extend_from_slice(&codes);
            entry.mins.push(min);
            entry.scales.push(scale);
            self.len += 1;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.len == 0 {
            return Vec::new();
        }

        let mut order: Vec<(usize, f32)> = (0..self.lists.len())
            .map(|l| (l, dot(query, self.centroid(l))))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let query_sum: f32 = query.iter().sum();
        let mut hits: Vec<(usize, f32)> = Vec::new();
        for (probed, &(list, _)) in order.iter().enumerate() {
            if probed >= self.nprobe && hits.len() >= k {
                break;
            }
            let entry = &self.lists[list];
            for (i, &slot) in entry.slots.iter().enumerate() {
                let codes = &entry.codes[i * self.dims..(i + 1) * self.dims];
                let code_dot: f32 = query
                    .iter()
                    .zip(codes)
                    .map(|(q, &c)| q * c as f32)
                    .sum();
                let sim = entry.mins[i] * query_sum + entry.scales[i] * code_dot;
                hits.push((slot as usize, 1.0 - sim));
            }
        }

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        hits
    }

    fn apply_search_options(&mut self, options: &IndexOptions) {
        self.nprobe = options.nprobe.max(1);
    }

    fn encode(&self) -> Result<Vec<u8>, IndexError> {
        Ok(bincode::serialize(self)?)
    }
}

/// Min-max scalar quantization of one vector to u8 codes.
fn quantize(v: &[f32]) -> (Vec<u8>, f32, f32) {
    let (min, max) = v
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    if v.is_empty() {
        return (Vec::new(), 0.0, 0.0);
    }
    let range = max - min;
    if range < f32::EPSILON {
        return (vec![0; v.len()], min, 0.0);
    }
    let inv = 255.0 / range;
    let codes = v
        .iter()
        .map(|&x| ((x - min) * inv).round().clamp(0.0, 255.0) as u8)
        .collect();
    (codes, min, range / 255.0)
}

/// k-means over unit vectors: k-means++ seeding on squared distance,
/// assignment by inner product, centroids re-normalized each round.
fn spherical_kmeans(data: &[f32], dims: usize, k: usize) -> Vec<f32> {
    let n = data.len() / dims;
    let point = |i: usize| &data[i * dims..(i + 1) * dims];
    let mut centroids = vec![0.0f32; k * dims];
    if n <= k {
        for i in 0..k {
            centroids[i * dims..(i + 1) * dims].copy_from_slice(point(i % n));
        }
        return centroids;
    }

    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let first = rng.gen_range(0..n);
    centroids[..dims].copy_from_slice(point(first));

    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = centroids[(ci - 1) * dims..ci * dims].to_vec();
        let mut total = 0.0f64;
        for (i, d) in min_dists.iter_mut().enumerate() {
            let dist = sq_dist(point(i), &last);
            if dist < *d {
                *d = dist;
            }
            total += *d as f64;
        }
        let chosen = if total < 1e-30 {
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in min_dists.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids[ci * dims..(ci + 1) * dims].copy_from_slice(point(chosen));
    }

    let mut assignments = vec![usize::MAX; n];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, slot) in assignments.iter_mut().enumerate() {
            let p = point(i);
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..k {
                let score = dot(p, &centroids[c * dims..(c + 1) * dims]);
                if score > best_score {
                    best_score = score;
                    best = c;
                }
            }
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0f32; k * dims];
        let mut counts = vec![0usize; k];
        for (i, &c) in assignments.iter().enumerate() {
            counts[c] += 1;
            for (s, x) in sums[c * dims..(c + 1) * dims].iter_mut().zip(point(i)) {
                *s += x;
            }
        }
        for c in 0..k {
            // Empty clusters keep their previous centroid.
            if counts[c] == 0 {
                continue;
            }
            let centroid = &mut sums[c * dims..(c + 1) * dims];
            crate::embedding::l2_normalize(centroid);
            centroids[c * dims..(c + 1) * dims].copy_from_slice(centroid);
        }
    }
    centroids
}

//! IVF-Flat index: k-means coarse quantizer, exact scan inside probed lists.
//!
//! Training runs a fixed number of seeded k-means iterations so rebuilds are
//! reproducible. Rows keep their insertion order as ids; each row is filed
//! under its best centroid at `add` time and the same assignment rule picks
//! the `nprobe` probed lists at search time, so the two sides agree for both
//! metrics.
//!
//! Body layout after the container header:
//!   nlist: u32
//!   nprobe: u32
//!   count: u32
//!   centroids: nlist * dim * f32
//!   assignments: count * u32 (list of each row)
//!   vectors: count * dim * f32

use std::io::{self, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{fill_slots, read_f32s, read_u32, read_u32s, score, write_f32s, write_u32s, Metric};
use crate::error::{Error, Result};

const TRAIN_ITERATIONS: usize = 10;
const TRAIN_SEED: u64 = 0x1d03_5f2c;

/// Probed lists per query until a tuning string overrides it.
const DEFAULT_NPROBE: usize = 8;

pub struct IvfIndex {
    dim: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    /// `nlist * dim` once trained, empty before.
    centroids: Vec<f32>,
    /// Row ids per list.
    lists: Vec<Vec<u32>>,
    /// List of each row, parallel to insertion order.
    assignments: Vec<u32>,
    /// Flat row storage in insertion order.
    vectors: Vec<f32>,
}

impl IvfIndex {
    pub fn new(dim: usize, metric: Metric, nlist: usize) -> Self {
        Self {
            dim,
            metric,
            nlist,
            nprobe: DEFAULT_NPROBE,
            centroids: Vec::new(),
            lists: Vec::new(),
            assignments: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn count(&self) -> usize {
        self.vectors.len() / self.dim
    }

    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe;
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn centroid(&self, list: usize) -> &[f32] {
        &self.centroids[list * self.dim..(list + 1) * self.dim]
    }

    fn row(&self, num: usize) -> &[f32] {
        &self.vectors[num * self.dim..(num + 1) * self.dim]
    }

    /// Best list for `v` under the declared metric.
    fn assign(&self, v: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_score = score(self.metric, v, self.centroid(0));
        for list in 1..self.nlist {
            let s = score(self.metric, v, self.centroid(list));
            if self.metric.is_better(s, best_score) {
                best = list;
                best_score = s;
            }
        }
        best
    }

    /// K-means over the training rows. The effective list count is clamped
    /// to the number of training rows; empty clusters are reseeded from a
    /// random row so every centroid stays meaningful.
    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        if self.is_trained() || self.count() > 0 {
            return Err(Error::Kernel("index is already trained".into()));
        }
        let nt = vectors.len() / self.dim;
        if nt == 0 {
            return Err(Error::Kernel("cannot train on an empty set".into()));
        }
        let dim = self.dim;
        let k = self.nlist.min(nt);
        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);

        let mut centroids = Vec::with_capacity(k * dim);
        for pick in rand::seq::index::sample(&mut rng, nt, k) {
            centroids.extend_from_slice(&vectors[pick * dim..(pick + 1) * dim]);
        }
        self.centroids = centroids;
        self.nlist = k;

        let mut members = vec![0usize; nt];
        for _ in 0..TRAIN_ITERATIONS {
            for (num, row) in vectors.chunks_exact(dim).enumerate() {
                members[num] = self.assign(row);
            }
            let mut sums = vec![0.0f64; k * dim];
            let mut counts = vec![0usize; k];
            for (num, row) in vectors.chunks_exact(dim).enumerate() {
                let list = members[num];
                counts[list] += 1;
                for (d, &x) in row.iter().enumerate() {
                    sums[list * dim + d] += x as f64;
                }
            }
            for list in 0..k {
                if counts[list] == 0 {
                    let pick = rng.gen_range(0..nt);
                    self.centroids[list * dim..(list + 1) * dim]
                        .copy_from_slice(&vectors[pick * dim..(pick + 1) * dim]);
                } else {
                    for d in 0..dim {
                        self.centroids[list * dim + d] =
                            (sums[list * dim + d] / counts[list] as f64) as f32;
                    }
                }
            }
        }

        self.lists = vec![Vec::new(); k];
        Ok(())
    }

    /// File each row under its best list. Ids continue from `count()`.
    pub fn add(&mut self, vectors: &[f32]) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::Kernel("cannot add to an untrained index".into()));
        }
        debug_assert_eq!(vectors.len() % self.dim, 0);
        for row in vectors.chunks_exact(self.dim) {
            let num = self.count() as u32;
            let list = self.assign(row);
            self.lists[list].push(num);
            self.assignments.push(list as u32);
            self.vectors.extend_from_slice(row);
        }
        Ok(())
    }

    /// Approximate top-k: exact scan of the `nprobe` best lists per query.
    pub fn search(&self, queries: &[f32], k: usize, distances: &mut [f32], ids: &mut [i64]) {
        for (qi, q) in queries.chunks_exact(self.dim).enumerate() {
            let mut hits: Vec<(f32, usize)> = Vec::new();
            if self.is_trained() && self.count() > 0 {
                let mut order: Vec<(f32, usize)> = (0..self.nlist)
                    .map(|list| (score(self.metric, q, self.centroid(list)), list))
                    .collect();
                order.sort_unstable_by(|a, b| self.metric.order(a.0, b.0));
                for &(_, list) in order.iter().take(self.nprobe.min(self.nlist)) {
                    for &num in &self.lists[list] {
                        hits.push((score(self.metric, q, self.row(num as usize)), num as usize));
                    }
                }
                hits.sort_unstable_by(|a, b| self.metric.order(a.0, b.0));
                hits.truncate(k);
            }
            fill_slots(
                self.metric,
                &hits,
                k,
                &mut distances[qi * k..(qi + 1) * k],
                &mut ids[qi * k..(qi + 1) * k],
            );
        }
    }

    pub(super) fn write_body(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(&(self.nlist as u32).to_le_bytes())?;
        w.write_all(&(self.nprobe as u32).to_le_bytes())?;
        w.write_all(&(self.count() as u32).to_le_bytes())?;
        write_f32s(w, &self.centroids)?;
        write_u32s(w, &self.assignments)?;
        write_f32s(w, &self.vectors)
    }

    pub(super) fn read_body(body: &[u8], dim: usize, metric: Metric) -> Result<Self> {
        let mut offset = 0;
        let nlist = read_u32(body, &mut offset)? as usize;
        let nprobe = read_u32(body, &mut offset)? as usize;
        let count = read_u32(body, &mut offset)? as usize;
        let centroids = read_f32s(body, &mut offset, nlist * dim)?;
        let assignments = read_u32s(body, &mut offset, count)?;
        let vectors = read_f32s(body, &mut offset, count * dim)?;

        let mut lists = vec![Vec::new(); nlist];
        for (num, &list) in assignments.iter().enumerate() {
            let Some(list) = lists.get_mut(list as usize) else {
                return Err(Error::Kernel(format!(
                    "row {num} assigned to out-of-range list {list}"
                )));
            };
            list.push(num as u32);
        }
        Ok(Self {
            dim,
            metric,
            nlist,
            nprobe,
            centroids,
            lists,
            assignments,
            vectors,
        })
    }
}

//! Exact linear-scan index.
//!
//! Body layout after the container header:
//!   count: u32
//!   vectors: count * dim * f32

use std::io::{self, Write};

use super::{fill_slots, read_f32s, read_u32, score, write_f32s, Metric};
use crate::error::Result;

pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
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

    /// Append whole rows. `vectors.len()` must be a multiple of `dim`.
    pub fn add(&mut self, vectors: &[f32]) {
        debug_assert_eq!(vectors.len() % self.dim, 0);
        self.vectors.extend_from_slice(vectors);
    }

    fn row(&self, num: usize) -> &[f32] {
        &self.vectors[num * self.dim..(num + 1) * self.dim]
    }

    /// True nearest neighbors per query, best-first, -1 padding.
    pub fn search(&self, queries: &[f32], k: usize, distances: &mut [f32], ids: &mut [i64]) {
        let n = self.count();
        for (qi, q) in queries.chunks_exact(self.dim).enumerate() {
            let mut hits: Vec<(f32, usize)> = (0..n)
                .map(|row| (score(self.metric, q, self.row(row)), row))
                .collect();
            hits.sort_unstable_by(|a, b| self.metric.order(a.0, b.0));
            hits.truncate(k);
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
        w.write_all(&(self.count() as u32).to_le_bytes())?;
        write_f32s(w, &self.vectors)
    }

    pub(super) fn read_body(body: &[u8], dim: usize, metric: Metric) -> Result<Self> {
        let mut offset = 0;
        let count = read_u32(body, &mut offset)? as usize;
        let vectors = read_f32s(body, &mut offset, count * dim)?;
        Ok(Self {
            dim,
            metric,
            vectors,
        })
    }
}

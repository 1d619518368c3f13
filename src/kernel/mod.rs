//! Index kernel: the ANN capability the database core builds on.
//!
//! The core only ever asks the kernel to construct from a factory string,
//! train, add, search top-k, persist, restore, and report whether it is an
//! exact scan. Two kinds are provided:
//!
//! - `"Flat"`: exact linear scan (`flat.rs`)
//! - `"IVF<nlist>,Flat"`: inverted-file index with a k-means coarse
//!   quantizer and exact scan inside probed lists (`ivf.rs`)
//!
//! On-disk container (little-endian, 16-byte header):
//!   magic: "VIDX" (4 bytes)
//!   version: u32 (=1)
//!   kind: u8 (0=Flat, 1=IVF)
//!   metric: u8
//!   _pad: [u8; 2]
//!   dim: u32
//! followed by a kind-specific body.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};

mod flat;
mod ivf;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;

pub(crate) const MAGIC: &[u8; 4] = b"VIDX";
pub(crate) const VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 16;

const KIND_FLAT: u8 = 0;
const KIND_IVF: u8 = 1;

// ==================
// Metric
// ==================

/// Distance metric. Codes follow the external API: 0 is inner product
/// (larger is better), 1 is squared L2 (smaller is better).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    InnerProduct,
    L2,
}

impl Metric {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Metric::InnerProduct),
            1 => Ok(Metric::L2),
            other => Err(Error::InvalidArgument(format!("unknown metric {other}"))),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    /// True iff score `a` beats score `b`.
    pub(crate) fn is_better(self, a: f32, b: f32) -> bool {
        match self {
            Metric::InnerProduct => a > b,
            Metric::L2 => a < b,
        }
    }

    /// Best-first ordering for sorting candidate lists.
    pub(crate) fn order(self, a: f32, b: f32) -> Ordering {
        match self {
            Metric::InnerProduct => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
            Metric::L2 => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        }
    }

    /// Padding value for unfilled result slots.
    pub(crate) fn worst(self) -> f32 {
        match self {
            Metric::InnerProduct => f32::NEG_INFINITY,
            Metric::L2 => f32::INFINITY,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Metric::InnerProduct => write!(f, "IP"),
            Metric::L2 => write!(f, "L2"),
        }
    }
}

pub(crate) fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

pub(crate) fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Score of `b` against query `a` under `metric`.
pub(crate) fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::InnerProduct => inner_product(a, b),
        Metric::L2 => l2_distance(a, b),
    }
}

// ==================
// Factory / tuning strings
// ==================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexSpec {
    Flat,
    Ivf { nlist: usize },
}

/// Parse a factory string: `"Flat"` or `"IVF<nlist>,Flat"`.
pub(crate) fn parse_index_key(index_key: &str) -> Result<IndexSpec> {
    if index_key == "Flat" {
        return Ok(IndexSpec::Flat);
    }
    if let Some(rest) = index_key.strip_prefix("IVF") {
        if let Some((nlist, tail)) = rest.split_once(',') {
            if tail == "Flat" {
                if let Ok(nlist) = nlist.parse::<usize>() {
                    if nlist > 0 {
                        return Ok(IndexSpec::Ivf { nlist });
                    }
                }
            }
        }
    }
    Err(Error::Kernel(format!(
        "unsupported index key '{index_key}'"
    )))
}

#[derive(Debug, Default)]
pub(crate) struct QueryParams {
    pub nprobe: Option<usize>,
}

/// Parse a tuning string: empty, or comma-separated `key=value` pairs.
/// `nprobe` is the only recognized key.
pub(crate) fn parse_query_params(params: &str) -> Result<QueryParams> {
    let mut out = QueryParams::default();
    for part in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            return Err(Error::Kernel(format!(
                "malformed query parameter '{part}'"
            )));
        };
        match key.trim() {
            "nprobe" => {
                let nprobe: usize = value.trim().parse().map_err(|_| {
                    Error::Kernel(format!("bad nprobe value '{value}'"))
                })?;
                if nprobe == 0 {
                    return Err(Error::Kernel("nprobe must be positive".into()));
                }
                out.nprobe = Some(nprobe);
            }
            other => {
                return Err(Error::Kernel(format!(
                    "unsupported query parameter '{other}'"
                )));
            }
        }
    }
    Ok(out)
}

// ==================
// Dispatch
// ==================

/// Unified index handle over the supported kinds.
pub enum KernelIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl KernelIndex {
    /// Produce a fresh, empty index for the factory string.
    pub fn factory(dim: usize, index_key: &str, metric: Metric) -> Result<Self> {
        match parse_index_key(index_key)? {
            IndexSpec::Flat => Ok(KernelIndex::Flat(FlatIndex::new(dim, metric))),
            IndexSpec::Ivf { nlist } => Ok(KernelIndex::Ivf(IvfIndex::new(dim, metric, nlist))),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            KernelIndex::Flat(idx) => idx.dim(),
            KernelIndex::Ivf(idx) => idx.dim(),
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            KernelIndex::Flat(idx) => idx.metric(),
            KernelIndex::Ivf(idx) => idx.metric(),
        }
    }

    /// Rows covered by the index.
    pub fn count(&self) -> usize {
        match self {
            KernelIndex::Flat(idx) => idx.count(),
            KernelIndex::Ivf(idx) => idx.count(),
        }
    }

    /// True iff the index is a pure exact scan.
    pub fn is_exact(&self) -> bool {
        matches!(self, KernelIndex::Flat(_))
    }

    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        match self {
            KernelIndex::Flat(_) => Ok(()),
            KernelIndex::Ivf(idx) => idx.train(vectors),
        }
    }

    pub fn add(&mut self, vectors: &[f32]) -> Result<()> {
        match self {
            KernelIndex::Flat(idx) => {
                idx.add(vectors);
                Ok(())
            }
            KernelIndex::Ivf(idx) => idx.add(vectors),
        }
    }

    /// Apply a tuning string. Keys that do not apply to the kind are ignored.
    pub fn apply_params(&mut self, params: &str) -> Result<()> {
        let parsed = parse_query_params(params)?;
        if let (KernelIndex::Ivf(idx), Some(nprobe)) = (self, parsed.nprobe) {
            idx.set_nprobe(nprobe);
        }
        Ok(())
    }

    /// Fill `k` slots per query, best-first; empty slots carry id -1.
    pub fn search(&self, queries: &[f32], k: usize, distances: &mut [f32], ids: &mut [i64]) {
        match self {
            KernelIndex::Flat(idx) => idx.search(queries, k, distances, ids),
            KernelIndex::Ivf(idx) => idx.search(queries, k, distances, ids),
        }
    }

    /// Persist to `path` in the container format.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        let kind = match self {
            KernelIndex::Flat(_) => KIND_FLAT,
            KernelIndex::Ivf(_) => KIND_IVF,
        };
        w.write_all(&[kind, self.metric().code() as u8])?;
        w.write_all(&[0u8; 2])?;
        w.write_all(&(self.dim() as u32).to_le_bytes())?;
        match self {
            KernelIndex::Flat(idx) => idx.write_body(&mut w)?,
            KernelIndex::Ivf(idx) => idx.write_body(&mut w)?,
        }
        w.flush()?;
        Ok(())
    }

    /// Restore from `path`, checking the header against the expected
    /// dimension and metric.
    pub fn read(path: &Path, dim: usize, metric: Metric) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < HEADER_SIZE {
            return Err(Error::Kernel("index file too small for header".into()));
        }
        if &map[..4] != MAGIC {
            return Err(Error::Kernel("bad index file magic".into()));
        }
        let version = u32::from_le_bytes(map[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(Error::Kernel(format!(
                "unsupported index file version {version}"
            )));
        }
        let kind = map[8];
        let metric_code = map[9] as u32;
        let file_dim = u32::from_le_bytes(map[12..16].try_into().unwrap()) as usize;
        if file_dim != dim {
            return Err(Error::Kernel(format!(
                "index file dimension {file_dim} does not match {dim}"
            )));
        }
        if metric_code != metric.code() {
            return Err(Error::Kernel(format!(
                "index file metric {metric_code} does not match {}",
                metric.code()
            )));
        }
        let body = &map[HEADER_SIZE..];
        match kind {
            KIND_FLAT => Ok(KernelIndex::Flat(FlatIndex::read_body(body, dim, metric)?)),
            KIND_IVF => Ok(KernelIndex::Ivf(IvfIndex::read_body(body, dim, metric)?)),
            other => Err(Error::Kernel(format!("unknown index kind {other}"))),
        }
    }
}

// ==================
// Body I/O helpers
// ==================

pub(crate) fn write_f32s(w: &mut dyn Write, data: &[f32]) -> io::Result<()> {
    let bytes: &[u8] =
        unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len() * 4) };
    w.write_all(bytes)
}

pub(crate) fn write_u32s(w: &mut dyn Write, data: &[u32]) -> io::Result<()> {
    let bytes: &[u8] =
        unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len() * 4) };
    w.write_all(bytes)
}

/// Take `count` little-endian f32 values starting at `*offset`, advancing it.
pub(crate) fn read_f32s(body: &[u8], offset: &mut usize, count: usize) -> Result<Vec<f32>> {
    let end = *offset + count * 4;
    if body.len() < end {
        return Err(Error::Kernel("index file truncated".into()));
    }
    let out = body[*offset..end]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    *offset = end;
    Ok(out)
}

pub(crate) fn read_u32s(body: &[u8], offset: &mut usize, count: usize) -> Result<Vec<u32>> {
    let end = *offset + count * 4;
    if body.len() < end {
        return Err(Error::Kernel("index file truncated".into()));
    }
    let out = body[*offset..end]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    *offset = end;
    Ok(out)
}

pub(crate) fn read_u32(body: &[u8], offset: &mut usize) -> Result<u32> {
    let end = *offset + 4;
    if body.len() < end {
        return Err(Error::Kernel("index file truncated".into()));
    }
    let out = u32::from_le_bytes(body[*offset..end].try_into().unwrap());
    *offset = end;
    Ok(out)
}

/// Copy sorted `hits` into the per-query result slots, padding with -1.
pub(crate) fn fill_slots(
    metric: Metric,
    hits: &[(f32, usize)],
    k: usize,
    distances: &mut [f32],
    ids: &mut [i64],
) {
    for slot in 0..k {
        if let Some(&(d, row)) = hits.get(slot) {
            distances[slot] = d;
            ids[slot] = row as i64;
        } else {
            distances[slot] = metric.worst();
            ids[slot] = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_key_parsing() {
        assert_eq!(parse_index_key("Flat").unwrap(), IndexSpec::Flat);
        assert_eq!(
            parse_index_key("IVF256,Flat").unwrap(),
            IndexSpec::Ivf { nlist: 256 }
        );
        assert!(parse_index_key("IVF0,Flat").is_err());
        assert!(parse_index_key("IVF256,PQ32").is_err());
        assert!(parse_index_key("HNSW32").is_err());
    }

    #[test]
    fn query_param_parsing() {
        assert_eq!(parse_query_params("").unwrap().nprobe, None);
        assert_eq!(parse_query_params("nprobe=16").unwrap().nprobe, Some(16));
        assert_eq!(
            parse_query_params(" nprobe = 4 ").unwrap().nprobe,
            Some(4)
        );
        assert!(parse_query_params("nprobe=0").is_err());
        assert!(parse_query_params("efSearch=10").is_err());
        assert!(parse_query_params("nprobe").is_err());
    }

    #[test]
    fn metric_ordering() {
        assert!(Metric::L2.is_better(0.5, 1.0));
        assert!(Metric::InnerProduct.is_better(1.0, 0.5));
        assert_eq!(Metric::from_code(0).unwrap(), Metric::InnerProduct);
        assert_eq!(Metric::from_code(1).unwrap(), Metric::L2);
        assert!(Metric::from_code(2).is_err());
    }
}

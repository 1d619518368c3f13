//! Two-phase query execution.
//!
//! Phase A asks the active index for `FANOUT` candidates per query and, for
//! approximate indexes, refines them to exact distances through a transient
//! exact index over the candidate rows. Phase B scans the flat tail (rows
//! the active index does not cover yet) with one transient exact index
//! shared by every query of the call. The per-query winners are merged under
//! the metric ordering; a stale approximate hit never beats a closer tail
//! row.
//!
//! Returned ids are base row indices; an empty database yields id -1 with
//! distance 0.

use crate::base::BaseStore;
use crate::kernel::{FlatIndex, KernelIndex, Metric};

/// Candidates fetched per query before refinement and merging.
pub(crate) const FANOUT: usize = 100;

pub(crate) fn search(
    store: &BaseStore,
    index: Option<&KernelIndex>,
    queries: &[f32],
    nq: usize,
    dim: usize,
    metric: Metric,
) -> (Vec<f32>, Vec<i64>) {
    let n = store.len();
    let ntotal = index.map_or(0, |idx| idx.count());
    let k = FANOUT;

    let mut best_d = vec![0.0f32; nq];
    let mut best_i = vec![-1i64; nq];

    // Phase A: the active index over rows [0, ntotal).
    if let Some(index) = index {
        if ntotal > 0 {
            let mut dists = vec![0.0f32; nq * k];
            let mut ids = vec![0i64; nq * k];
            index.search(queries, k, &mut dists, &mut ids);

            for qi in 0..nq {
                let q = &queries[qi * dim..(qi + 1) * dim];
                let cand_d = &dists[qi * k..(qi + 1) * k];
                let cand_i = &ids[qi * k..(qi + 1) * k];
                if index.is_exact() {
                    if cand_i[0] >= 0 {
                        best_d[qi] = cand_d[0];
                        best_i[qi] = cand_i[0];
                    }
                    continue;
                }
                // Refine: exact top-1 among the candidate rows, mapped back
                // to its base row index.
                let mut refine = FlatIndex::new(dim, metric);
                let mut rows = Vec::with_capacity(k);
                for &cand in cand_i {
                    if cand >= 0 {
                        refine.add(store.row(cand as usize));
                        rows.push(cand);
                    }
                }
                if rows.is_empty() {
                    continue;
                }
                let mut rd = vec![0.0f32; k];
                let mut ri = vec![0i64; k];
                refine.search(q, k, &mut rd, &mut ri);
                best_d[qi] = rd[0];
                best_i[qi] = rows[ri[0] as usize];
            }
        }
    }

    // Phase B: the flat tail [ntotal, n), shared across queries.
    if ntotal < n {
        let mut tail = FlatIndex::new(dim, metric);
        tail.add(store.rows_from(ntotal));
        let mut dists = vec![0.0f32; nq * k];
        let mut ids = vec![0i64; nq * k];
        tail.search(queries, k, &mut dists, &mut ids);

        for qi in 0..nq {
            let d = dists[qi * k];
            let id = ids[qi * k];
            if id >= 0 && (best_i[qi] < 0 || metric.is_better(d, best_d[qi])) {
                best_d[qi] = d;
                best_i[qi] = id + ntotal as i64;
            }
        }
    }

    (best_d, best_i)
}

//! Build policy: turn a base-store snapshot into an `(index, ntrain)`
//! candidate without touching live state.
//!
//! The decision and the row copies happen under the caller's read lock;
//! every kernel call runs on the plan's owned data, so writers and searchers
//! are never blocked by training. The extend path re-reads the persisted
//! artifact instead of cloning the live index, leaving in-flight searches
//! undisturbed.

use std::path::Path;

use tracing::debug;

use crate::base::BaseStore;
use crate::error::{Error, Result};
use crate::kernel::{KernelIndex, Metric};
use crate::registry;

/// Training-set ceiling; beyond this, a tenth of the data trains the index.
pub const MAX_NTRAIN: usize = 160_000;

/// `min(n, max(n/10, MAX_NTRAIN))`.
pub(crate) fn training_size(n: usize) -> usize {
    n.min((n / 10).max(MAX_NTRAIN))
}

/// Output of a build cycle, handed to `Db::activate_index`. `index` is
/// absent when the active index already covers the base.
pub struct IndexCandidate {
    pub(crate) index: Option<KernelIndex>,
    pub(crate) ntrain: usize,
}

impl IndexCandidate {
    pub(crate) fn skip(ntrain: usize) -> Self {
        Self {
            index: None,
            ntrain,
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Rows the candidate was trained on; 0 for exact indexes.
    pub fn ntrain(&self) -> usize {
        self.ntrain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildAction {
    /// Index already covers the base; no kernel work.
    Skip,
    /// Flat key: rebuild the exact index over all rows.
    RebuildFlat,
    /// Training still current: extend the persisted copy with the tail.
    Extend,
    /// Training size moved: train from scratch.
    Fresh,
}

/// Pick the action from the snapshot counts. Returns the action and the
/// `ntrain` the cycle will report.
pub(crate) fn decide(
    n: usize,
    ntrain_current: usize,
    ntotal_current: usize,
    flat_key: bool,
) -> (BuildAction, usize) {
    if flat_key {
        return (BuildAction::RebuildFlat, 0);
    }
    let nt = training_size(n);
    if nt == ntrain_current && n == ntotal_current {
        (BuildAction::Skip, nt)
    } else if nt == ntrain_current && n > ntotal_current {
        (BuildAction::Extend, nt)
    } else {
        (BuildAction::Fresh, nt)
    }
}

/// Snapshot of everything a build cycle needs: the chosen action plus owned
/// copies of exactly the rows that action consumes.
pub(crate) struct BuildPlan {
    action: BuildAction,
    nt: usize,
    ntotal: usize,
    rows: Vec<f32>,
}

/// Taken under the read side of the state lock.
pub(crate) fn plan(
    store: &BaseStore,
    ntrain_current: usize,
    ntotal_current: usize,
    flat_key: bool,
) -> BuildPlan {
    let n = store.len();
    let (action, nt) = decide(n, ntrain_current, ntotal_current, flat_key);
    debug!(?action, n, nt, ntotal = ntotal_current, "planned build");
    let rows = match action {
        BuildAction::Skip => Vec::new(),
        BuildAction::Extend => store.rows_from(ntotal_current).to_vec(),
        BuildAction::RebuildFlat | BuildAction::Fresh => store.rows_from(0).to_vec(),
    };
    BuildPlan {
        action,
        nt,
        ntotal: ntotal_current,
        rows,
    }
}

/// Run the kernel work for `plan`. No locks are held here.
pub(crate) fn execute(
    plan: BuildPlan,
    dir: &Path,
    dim: usize,
    metric: Metric,
    index_key: &str,
    query_params: &str,
) -> Result<IndexCandidate> {
    match plan.action {
        BuildAction::Skip => Ok(IndexCandidate::skip(plan.nt)),
        BuildAction::RebuildFlat => {
            let mut index = KernelIndex::factory(dim, index_key, metric)?;
            index.add(&plan.rows)?;
            Ok(IndexCandidate {
                index: Some(index),
                ntrain: 0,
            })
        }
        BuildAction::Extend => {
            let path = registry::index_path(dir, index_key, plan.nt);
            let mut index = KernelIndex::read(&path, dim, metric)?;
            if index.count() != plan.ntotal {
                return Err(Error::Kernel(format!(
                    "persisted index covers {} rows, expected {}",
                    index.count(),
                    plan.ntotal
                )));
            }
            index.add(&plan.rows)?;
            Ok(IndexCandidate {
                index: Some(index),
                ntrain: plan.nt,
            })
        }
        BuildAction::Fresh => {
            let mut index = KernelIndex::factory(dim, index_key, metric)?;
            index.train(&plan.rows[..plan.nt * dim])?;
            index.apply_params(query_params)?;
            index.add(&plan.rows)?;
            Ok(IndexCandidate {
                index: Some(index),
                ntrain: plan.nt,
            })
        }
    }
}

//! Database facade: open/add/build/activate/search over one working
//! directory.
//!
//! All live state (the base store and the active index) sits behind a
//! single `RwLock`. Searches hold the read side for the whole query, so the
//! row count is monotonic and the mirror is never reallocated underneath
//! them; appends and the activation swap take the write side. Builds copy
//! their snapshot under the read side and run every kernel call without any
//! lock held.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::base::BaseStore;
use crate::builder::{self, IndexCandidate};
use crate::error::{Error, Result};
use crate::kernel::{self, IndexSpec, KernelIndex, Metric};
use crate::registry;
use crate::searcher;

/// The active index plus its training size. Rows `[ntotal(), base.len())`
/// are the flat tail.
struct IndexState {
    index: Option<KernelIndex>,
    ntrain: usize,
}

impl IndexState {
    fn ntotal(&self) -> usize {
        self.index.as_ref().map_or(0, |idx| idx.count())
    }
}

struct DbInner {
    store: BaseStore,
    state: IndexState,
}

/// An embeddable vector database over a single working directory.
///
/// `Db` is `Send + Sync`; the supported topology is one writer thread, any
/// number of searcher threads, and a maintenance thread driving
/// `try_build_index` / `activate_index`.
pub struct Db {
    dir: PathBuf,
    dim: usize,
    metric: Metric,
    index_key: String,
    query_params: String,
    spec: IndexSpec,
    inner: RwLock<DbInner>,
}

impl Db {
    /// Open (creating if needed) the database in `work_dir`.
    ///
    /// Restores the newest persisted index whose training size the base can
    /// still support; a `"Flat"` database instead rebuilds its exact index
    /// over all rows, and anything else starts indexless and serves queries
    /// from the flat tail until a build/activate cycle completes.
    pub fn open(
        work_dir: impl AsRef<Path>,
        dim: usize,
        metric: Metric,
        index_key: &str,
        query_params: &str,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument("dim must be positive".into()));
        }
        let spec = kernel::parse_index_key(index_key)?;
        kernel::parse_query_params(query_params)?;

        let dir = work_dir.as_ref().to_path_buf();
        let store = BaseStore::open(&dir, dim)?;
        let n = store.len();

        let ntrain_disk = registry::discover_latest(&dir, index_key)?;
        let state = if ntrain_disk > 0 && n >= ntrain_disk {
            let path = registry::index_path(&dir, index_key, ntrain_disk);
            let index = KernelIndex::read(&path, dim, metric)?;
            if index.count() > n {
                warn!(
                    covered = index.count(),
                    rows = n,
                    path = %path.display(),
                    "ignoring stale index covering more rows than the base"
                );
                IndexState {
                    index: None,
                    ntrain: 0,
                }
            } else {
                IndexState {
                    index: Some(index),
                    ntrain: ntrain_disk,
                }
            }
        } else if spec == IndexSpec::Flat {
            let mut index = KernelIndex::factory(dim, index_key, metric)?;
            index.add(store.rows_from(0))?;
            IndexState {
                index: Some(index),
                ntrain: 0,
            }
        } else {
            IndexState {
                index: None,
                ntrain: 0,
            }
        };

        info!(
            dir = %dir.display(),
            rows = n,
            ntrain = state.ntrain,
            ntotal = state.ntotal(),
            index_key,
            "opened database"
        );
        Ok(Self {
            dir,
            dim,
            metric,
            index_key: index_key.to_string(),
            query_params: query_params.to_string(),
            spec,
            inner: RwLock::new(DbInner { store, state }),
        })
    }

    /// Append `ids.len()` vectors, durable before return. The active index
    /// is untouched; the new rows join the flat tail. An empty batch is a
    /// no-op.
    pub fn add_with_ids(&self, ids: &[i64], vectors: &[f32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if vectors.len() != ids.len() * self.dim {
            return Err(Error::InvalidArgument(format!(
                "expected {} floats for {} rows of dim {}, got {}",
                ids.len() * self.dim,
                ids.len(),
                self.dim,
                vectors.len()
            )));
        }
        let mut inner = self.inner.write();
        inner.store.append(ids, vectors)
    }

    /// Produce a candidate index from the current base snapshot. Kernel work
    /// runs without holding the state lock; live state is not mutated.
    pub fn build_index(&self) -> Result<IndexCandidate> {
        let plan = {
            let inner = self.inner.read();
            builder::plan(
                &inner.store,
                inner.state.ntrain,
                inner.state.ntotal(),
                self.spec == IndexSpec::Flat,
            )
        };
        builder::execute(
            plan,
            &self.dir,
            self.dim,
            self.metric,
            &self.index_key,
            &self.query_params,
        )
    }

    /// `build_index`, but only when the flat tail has outgrown
    /// `exhaust_threshold` rows. Meant for a periodic maintenance loop.
    pub fn try_build_index(&self, exhaust_threshold: usize) -> Result<IndexCandidate> {
        let plan = {
            let inner = self.inner.read();
            let n = inner.store.len();
            let ntotal = inner.state.ntotal();
            if n - ntotal <= exhaust_threshold {
                return Ok(IndexCandidate::skip(inner.state.ntrain));
            }
            builder::plan(
                &inner.store,
                inner.state.ntrain,
                ntotal,
                self.spec == IndexSpec::Flat,
            )
        };
        builder::execute(
            plan,
            &self.dir,
            self.dim,
            self.metric,
            &self.index_key,
            &self.query_params,
        )
    }

    /// Install a candidate: persist it, retire the superseded file, then
    /// swap it in. Persistence strictly precedes the swap, so a crash in
    /// between is recovered at the next open via `discover_latest`. An empty
    /// candidate is a no-op.
    pub fn activate_index(&self, candidate: IndexCandidate) -> Result<()> {
        let Some(index) = candidate.index else {
            return Ok(());
        };
        let new_ntrain = candidate.ntrain;

        if self.spec != IndexSpec::Flat {
            let path = registry::index_path(&self.dir, &self.index_key, new_ntrain);
            if let Err(err) = index.write(&path) {
                // Never leave a partial artifact for discover_latest.
                let _ = fs::remove_file(&path);
                return Err(err);
            }
            let ntrain_old = self.inner.read().state.ntrain;
            if ntrain_old != 0 && ntrain_old != new_ntrain {
                let old = registry::index_path(&self.dir, &self.index_key, ntrain_old);
                if old.exists() {
                    fs::remove_file(&old)?;
                }
            }
            info!(
                ntrain = new_ntrain,
                ntotal = index.count(),
                path = %path.display(),
                "activated index"
            );
        }

        let mut inner = self.inner.write();
        inner.state.index = Some(index);
        inner.state.ntrain = new_ntrain;
        Ok(())
    }

    /// Nearest neighbor of each of the `nq` query rows: `(distances, ids)`.
    /// Ids are base row indices, -1 (with distance 0) when the database is
    /// empty.
    pub fn search(&self, nq: usize, queries: &[f32]) -> Result<(Vec<f32>, Vec<i64>)> {
        if nq == 0 {
            return Err(Error::InvalidArgument("nq must be positive".into()));
        }
        if queries.len() != nq * self.dim {
            return Err(Error::InvalidArgument(format!(
                "expected {} floats for {} queries of dim {}, got {}",
                nq * self.dim,
                nq,
                self.dim,
                queries.len()
            )));
        }
        let inner = self.inner.read();
        Ok(searcher::search(
            &inner.store,
            inner.state.index.as_ref(),
            queries,
            nq,
            self.dim,
            self.metric,
        ))
    }

    /// Total rows in the base store.
    pub fn total(&self) -> usize {
        self.inner.read().store.len()
    }

    /// Rows not yet covered by the active index.
    pub fn flat_size(&self) -> usize {
        let inner = self.inner.read();
        inner.store.len() - inner.state.ntotal()
    }

    /// Training size of the active index; 0 when none is trained.
    pub fn ntrain(&self) -> usize {
        self.inner.read().state.ntrain
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// External id of a row returned by `search`.
    pub fn uid_at(&self, row: usize) -> Option<i64> {
        self.inner.read().store.uid_at(row)
    }

    /// Latest row carrying the external id.
    pub fn row_of(&self, uid: i64) -> Option<usize> {
        self.inner.read().store.row_of(uid)
    }

    /// Remove `base.fvecs` and all index files under `path`. The caller
    /// guarantees no database is open there.
    pub fn clear_work_dir(path: impl AsRef<Path>) -> Result<()> {
        registry::clear_work_dir(path.as_ref())
    }
}

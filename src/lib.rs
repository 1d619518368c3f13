//! Embeddable approximate-nearest-neighbor vector database over a single
//! working directory.
//!
//! Vectors arrive tagged with 64-bit ids and are persisted to an append-only
//! `base.fvecs` mirrored in memory. A trained index covers a prefix of the
//! rows; the remainder, the flat tail, is scanned exactly at query time and
//! fused with the refined index candidates, so answers stay correct while
//! training lags behind writes. Builds run off the hot path and are swapped
//! in atomically by `activate_index`.
//!
//! ```no_run
//! use vecdb::{Db, Metric};
//!
//! let db = Db::open("/tmp/vectors", 128, Metric::L2, "IVF256,Flat", "nprobe=16")?;
//! db.add_with_ids(&[1, 2], &vec![0.0; 256])?;
//! let candidate = db.try_build_index(0)?;
//! db.activate_index(candidate)?;
//! let (distances, ids) = db.search(1, &vec![0.0; 128])?;
//! # Ok::<(), vecdb::Error>(())
//! ```

mod base;
mod builder;
mod db;
mod error;
mod kernel;
mod registry;
mod searcher;

pub use builder::{IndexCandidate, MAX_NTRAIN};
pub use db::Db;
pub use error::{Error, Result};
pub use kernel::Metric;

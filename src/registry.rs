//! Naming, discovery, and cleanup of persisted index files.
//!
//! A trained index lives at `dir/<index_key>.<ntrain>.index`. After each
//! successful activation at most one such file per key remains, so the
//! largest embedded `ntrain` identifies the newest artifact.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::base::BASE_FILE_NAME;
use crate::error::Result;

const INDEX_SUFFIX: &str = ".index";

/// Deterministic path of the index trained on `ntrain` rows.
pub fn index_path(dir: &Path, index_key: &str, ntrain: usize) -> PathBuf {
    dir.join(format!("{index_key}.{ntrain}{INDEX_SUFFIX}"))
}

/// Largest `ntrain` among `<index_key>.<ntrain>.index` files in `dir`,
/// or 0 when none exists. File names that do not parse are skipped.
pub fn discover_latest(dir: &Path, index_key: &str) -> Result<usize> {
    let prefix = format!("{index_key}.");
    let mut latest = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(middle) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(INDEX_SUFFIX))
        else {
            continue;
        };
        if let Ok(ntrain) = middle.parse::<usize>() {
            latest = latest.max(ntrain);
        }
    }
    Ok(latest)
}

/// Remove `base.fvecs` and every `*.index` file in `dir`.
///
/// The caller guarantees no database is open on `dir`. A missing directory
/// counts as already clear.
pub fn clear_work_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let base = dir.join(BASE_FILE_NAME);
    if base.exists() {
        fs::remove_file(&base)?;
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| n.ends_with(INDEX_SUFFIX)) {
            fs::remove_file(entry.path())?;
        }
    }
    info!(dir = %dir.display(), "cleared working directory");
    Ok(())
}

//! Append-only base store: `base.fvecs` plus its in-memory mirror.
//!
//! Record layout (little-endian, no header):
//!   id: i64 (8 bytes)
//!   vector: dim * f32
//!
//! The file is the durable source of truth; the mirror (`base`, `uids`,
//! `uid2num`) is rebuilt from it at open. Appends hit the file before the
//! mirror, so a reader never sees a row that could be lost on crash.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use hashbrown::HashMap;
use memmap2::Mmap;
use tracing::debug;

use crate::error::{Error, Result};

/// File name of the base store inside the working directory.
pub const BASE_FILE_NAME: &str = "base.fvecs";

/// Bytes per record for the given dimension.
pub fn record_size(dim: usize) -> usize {
    8 + 4 * dim
}

#[derive(Debug)]
pub struct BaseStore {
    dim: usize,
    file: File,
    /// Flat contiguous vector storage: row `n` occupies `[n*dim, (n+1)*dim)`.
    base: Vec<f32>,
    /// External ids, parallel to `base` rows.
    uids: Vec<i64>,
    /// External id -> row. Duplicates keep the latest row.
    uid2num: HashMap<i64, usize>,
}

impl BaseStore {
    /// Open (creating if absent) `dir/base.fvecs` and load the mirror.
    ///
    /// A file whose size is not a multiple of the record size is rejected
    /// with `BaseLengthMismatch`; a truncated tail is never silently
    /// accepted.
    pub fn open(dir: &Path, dim: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(BASE_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let record = record_size(dim) as u64;
        let len = file.metadata()?.len();
        if len % record != 0 {
            return Err(Error::BaseLengthMismatch {
                actual: len,
                record,
            });
        }

        let count = (len / record) as usize;
        let mut base = Vec::with_capacity(count * dim);
        let mut uids = Vec::with_capacity(count);
        let mut uid2num = HashMap::with_capacity(count);
        if count > 0 {
            let map = unsafe { Mmap::map(&file)? };
            for (num, rec) in map.chunks_exact(record as usize).enumerate() {
                let uid = i64::from_le_bytes(rec[..8].try_into().unwrap());
                uids.push(uid);
                uid2num.insert(uid, num);
                base.extend(
                    rec[8..]
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes(c.try_into().unwrap())),
                );
            }
        }
        file.seek(SeekFrom::End(0))?;

        debug!(rows = count, path = %path.display(), "opened base store");
        Ok(Self {
            dim,
            file,
            base,
            uids,
            uid2num,
        })
    }

    /// Append `ids.len()` records in one write, then extend the mirror.
    ///
    /// The caller has already validated that `vectors.len() ==
    /// ids.len() * dim`. An empty batch is a no-op. A short write leaves the
    /// mirror untouched; the next open rejects any partial record.
    pub fn append(&mut self, ids: &[i64], vectors: &[f32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        debug_assert_eq!(vectors.len(), ids.len() * self.dim);

        let mut buf = Vec::with_capacity(ids.len() * record_size(self.dim));
        for (uid, row) in ids.iter().zip(vectors.chunks_exact(self.dim)) {
            buf.extend_from_slice(&uid.to_le_bytes());
            let bytes: &[u8] = unsafe {
                std::slice::from_raw_parts(row.as_ptr() as *const u8, self.dim * 4)
            };
            buf.extend_from_slice(bytes);
        }
        self.file.write_all(&buf)?;
        self.file.flush()?;

        for &uid in ids {
            self.uid2num.insert(uid, self.uids.len());
            self.uids.push(uid);
        }
        self.base.extend_from_slice(vectors);
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Row `num` as a `dim`-length slice.
    pub fn row(&self, num: usize) -> &[f32] {
        &self.base[num * self.dim..(num + 1) * self.dim]
    }

    /// Read-only view of rows `[offset, len())`.
    pub fn rows_from(&self, offset: usize) -> &[f32] {
        &self.base[offset * self.dim..]
    }

    /// External id of row `num`.
    pub fn uid_at(&self, num: usize) -> Option<i64> {
        self.uids.get(num).copied()
    }

    /// Latest row carrying external id `uid`.
    pub fn row_of(&self, uid: i64) -> Option<usize> {
        self.uid2num.get(&uid).copied()
    }
}

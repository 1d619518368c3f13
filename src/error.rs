//! Error types for the vector database.
//!
//! One tagged enum covers the whole surface; `thiserror` derives the
//! `Display` and `Error` impls.

use std::io;

use thiserror::Error;

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// `base.fvecs` is not a whole number of records. The store refuses to
    /// open rather than guess where the last intact record ends.
    #[error("base file is {actual} bytes, not a multiple of the {record}-byte record size")]
    BaseLengthMismatch { actual: u64, record: u64 },

    /// Underlying filesystem failure during open, append, or index
    /// persistence.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Propagated from the index kernel: unsupported factory string, bad
    /// tuning parameter, or a malformed index file.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// Caller-supplied argument out of contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

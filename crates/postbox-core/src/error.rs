//! Error types for all postbox operations.

use std::io;
use thiserror::Error;

/// Top-level error type for postbox operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The worker thread is gone; the result of the request was never
    /// delivered.
    #[error("postbox worker disconnected")]
    Disconnected,
}

/// Errors raised by the underlying store's durability layer.
///
/// All in-memory reads are infallible; only opening a store and committing
/// a transaction touch the filesystem.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A fully contained commit log frame failed its checksum or did not
    /// decode. Distinct from an append torn by a crash (a final frame
    /// running past end of file), which replay truncates away without
    /// error.
    #[error("corrupted commit log frame at offset {offset}")]
    CorruptedLog { offset: u64 },

    /// A value failed to serialize for the commit log.
    #[error("value encoding failed: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, Error>;

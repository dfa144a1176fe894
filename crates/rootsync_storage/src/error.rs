//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log contains a record that fails its checksum or framing.
    #[error("store corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Byte offset of the bad record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// Another process holds the store directory.
    #[error("store directory is locked: {0}")]
    Locked(PathBuf),

    /// A write was attempted on a store opened read-only.
    #[error("store is opened read-only")]
    ReadOnly,
}

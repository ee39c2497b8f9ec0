//! Error types for the environment.

use std::io;
use thiserror::Error;

/// Result type for environment operations.
pub type EnvResult<T> = Result<T, EnvError>;

/// Errors raised by the environment.
///
/// Everything except [`EnvError::InvalidKeySize`] and
/// [`EnvError::DbNotFound`] means the active transaction was aborted and the
/// environment may need operator attention.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] proxyrepo_storage::StorageError),

    /// Record or snapshot bytes failed to decode.
    #[error("codec error: {0}")]
    Codec(#[from] proxyrepo_codec::CodecError),

    /// I/O error outside a backend (directory handling, renames).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The write-ahead log is unreadable.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record or snapshot failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Committing would grow the stored data past the map size.
    #[error("map full: commit needs {required} bytes, map size is {map_size}")]
    MapFull {
        /// Bytes the environment would hold after the commit.
        required: u64,
        /// Configured limit.
        map_size: u64,
    },

    /// A key is empty or longer than the supported maximum.
    #[error("invalid key size {len}: keys must be 1..={max} bytes")]
    InvalidKeySize {
        /// Offending key length.
        len: usize,
        /// Longest accepted key.
        max: usize,
    },

    /// Another process holds the environment lock.
    #[error("environment locked: another process has exclusive access")]
    EnvLocked,

    /// Files on disk are not an environment this build understands.
    #[error("invalid environment format: {message}")]
    InvalidFormat {
        /// Description of the problem.
        message: String,
    },

    /// The call is not valid in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was refused.
        message: String,
    },

    /// A database handle does not belong to this environment.
    #[error("database not found: dbi {dbi}")]
    DbNotFound {
        /// Handle id.
        dbi: u32,
    },

    /// The environment has been closed.
    #[error("environment is closed")]
    EnvClosed,
}

impl EnvError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

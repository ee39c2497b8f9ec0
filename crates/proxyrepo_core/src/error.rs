//! Error types for the aggregation pipeline.

use proxyrepo_codec::CodecError;
use proxyrepo_env::EnvError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors raised by queues, DAOs, the aggregator and the forwarder.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Store-level failure. The transaction that hit it was aborted.
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    /// A stored row could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// `add_source` for an id that is already registered.
    #[error("source {file_store_id} already exists")]
    DuplicateSource {
        /// The repeated id.
        file_store_id: u64,
    },

    /// No source row for the id.
    #[error("source {file_store_id} not found")]
    SourceNotFound {
        /// The missing id.
        file_store_id: u64,
    },

    /// The source was already examined, so its items are frozen.
    #[error("source {file_store_id} has already been examined")]
    SourceExamined {
        /// The examined source.
        file_store_id: u64,
    },

    /// No aggregate row for the id.
    #[error("aggregate {aggregate_id} not found")]
    AggregateNotFound {
        /// The missing id.
        aggregate_id: u64,
    },

    /// Items cannot be added to a closed aggregate.
    #[error("aggregate {aggregate_id} is closed")]
    AggregateClosed {
        /// The closed aggregate.
        aggregate_id: u64,
    },

    /// The source still has items that have not been forwarded.
    #[error("source {file_store_id} is still in use: {reason}")]
    SourceInUse {
        /// The source.
        file_store_id: u64,
        /// What still references it.
        reason: String,
    },

    /// The encoded feed name and type do not fit in a store key.
    #[error("feed key {feed} encodes to {len} bytes, limit is {max}")]
    FeedKeyTooLong {
        /// The feed, as `name/type`.
        feed: String,
        /// Encoded length.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },

    /// The forward sink rejected an aggregate.
    #[error("forwarding aggregate {aggregate_id} failed: {message}")]
    Forward {
        /// The aggregate that stays closed for retry.
        aggregate_id: u64,
        /// Sink error.
        message: String,
    },

    /// Configuration is missing a value or holds an unusable one.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },
}

impl RepoError {
    /// Creates a source-in-use error.
    pub fn source_in_use(file_store_id: u64, reason: impl Into<String>) -> Self {
        Self::SourceInUse {
            file_store_id,
            reason: reason.into(),
        }
    }

    /// Creates a forward error.
    pub fn forward(aggregate_id: u64, message: impl Into<String>) -> Self {
        Self::Forward {
            aggregate_id,
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

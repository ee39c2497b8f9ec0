//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while decoding stored bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete field was read.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the field needs.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Bytes were left over after the value was read.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Unread byte count.
        remaining: usize,
    },

    /// A length prefix is larger than allowed.
    #[error("length {len} exceeds maximum {max}")]
    LengthOverflow {
        /// Declared length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// A field decoded to a value outside its domain.
    #[error("invalid value: {message}")]
    InvalidValue {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}

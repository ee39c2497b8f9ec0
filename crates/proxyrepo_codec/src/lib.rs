//! # Proxy Repo Codec
//!
//! Fixed and length-prefixed encodings for keys and values stored in the
//! proxy repository environment.
//!
//! ## Ordering
//!
//! The store compares keys bytewise. Every id that takes part in range
//! queries or ordered consumption is therefore written as fixed-width
//! big-endian, where byte order equals numeric order:
//!
//! ```
//! use proxyrepo_codec::{encode_u64_key, decode_u64_key};
//!
//! assert!(encode_u64_key(255) < encode_u64_key(256));
//! assert_eq!(decode_u64_key(&encode_u64_key(42)).unwrap(), 42);
//! ```
//!
//! Values that are never range-scanned may use [`ByteOrder::Native`].
//!
//! ## Composite encodings
//!
//! ```
//! use bytes::BytesMut;
//! use proxyrepo_codec::{IntSerde, LongSerde, PairSerde, Serde};
//!
//! let serde = PairSerde::new(LongSerde::BIG_ENDIAN, IntSerde::BIG_ENDIAN);
//! let bytes = serde.to_bytes(&(7u64, 3u32));
//! assert_eq!(bytes.len(), 12);
//! assert_eq!(serde.from_bytes(&bytes).unwrap(), (7, 3));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod order;
mod reader;
mod serdes;

pub use error::{CodecError, CodecResult};
pub use order::ByteOrder;
pub use reader::KeyReader;
pub use serdes::{
    decode_u64_key, encode_u64_key, BoolSerde, IntSerde, LongSerde, NullableIdSerde,
    OptionalStringSerde, PairSerde, Serde, StringSerde, MAX_STRING_LEN,
};

//! # Proxy Repo Storage
//!
//! Byte stores that hold the environment's write-ahead log and snapshot.
//!
//! A backend never looks inside what it stores. Record framing, checksums
//! and recovery all live in `proxyrepo_env`; this crate only knows how to
//! append bytes, read them back and make them durable.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral environments and tests
//! - [`FileBackend`] - a single OS file
//!
//! ## Example
//!
//! ```rust
//! use proxyrepo_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"commit").unwrap();
//! assert_eq!(log.read_at(offset, 6).unwrap(), b"commit");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

//! # Proxy Repo Env
//!
//! An embedded, transactional key-value environment.
//!
//! An [`Env`] holds any number of named databases, each an ordered map of
//! byte keys to byte values. It provides:
//!
//! - **Transactions**: one writer at a time, any number of snapshot
//!   readers, all-or-nothing commits
//! - **Durability**: a checksummed write-ahead log, folded into a
//!   snapshot by [`Env::sync`] or when the log outgrows its limit
//! - **Cursors**: ordered traversal with seek, next and prev
//! - **Buffer pooling**: reusable scratch buffers for encoding records
//!
//! ## Quick Start
//!
//! ```rust
//! use proxyrepo_env::{Env, EnvConfig, Txn};
//!
//! let env = Env::open_in_memory(EnvConfig::default()).unwrap();
//! let users = env.open_db("users").unwrap();
//!
//! env.write(|txn| {
//!     txn.put(users, b"alice", b"admin")?;
//!     txn.put(users, b"bob", b"viewer")
//! })
//! .unwrap();
//!
//! let txn = env.begin_read().unwrap();
//! let mut cursor = txn.cursor(users).unwrap();
//! assert_eq!(cursor.first().map(|(k, _)| k), Some(&b"alice"[..]));
//! assert_eq!(cursor.next_entry().map(|(k, _)| k), Some(&b"bob"[..]));
//! ```
//!
//! ## Files
//!
//! A directory environment keeps a `LOCK` file, the log in `wal.log` and
//! the last checkpoint in `data.snap`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod checksum;
mod config;
mod dir;
mod env;
mod error;
mod pool;
mod readers;
mod snapshot;
mod state;
mod stats;
mod txn;
mod types;
mod wal;

pub use batch::BatchingWriteTxn;
pub use config::{EnvConfig, DEFAULT_MAP_SIZE, DEFAULT_MAX_READERS};
pub use dir::{is_env_data_file, EnvDir};
pub use env::{DbInfo, Env, EnvInfo};
pub use error::{EnvError, EnvResult};
pub use pool::{ByteBufferPool, PooledBuffer};
pub use stats::StatsSnapshot;
pub use txn::{Cursor, DbView, Direction, Entries, Entry, ReadTxn, Txn, WriteTxn, MAX_KEY_SIZE};
pub use types::{Dbi, SeqNo, TxnId};
pub use wal::{WalRecord, WalRecordType};

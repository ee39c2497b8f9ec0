//! Write-ahead log.
//!
//! Every committed write transaction is appended as a run of change
//! records closed by a `Commit` record. Each record is framed as:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! All integers are big-endian. The checksum covers everything before it.
//! A record cut short by a crash marks the end of the log; a complete
//! record with a bad checksum is corruption.

mod reader;
pub(crate) mod record;
mod writer;

pub(crate) use reader::WalReader;
pub use record::{WalRecord, WalRecordType};
pub(crate) use writer::WalWriter;

/// Bytes before the payload.
pub(crate) const HEADER_SIZE: usize = 11;

/// Bytes after the payload.
pub(crate) const CRC_SIZE: usize = 4;

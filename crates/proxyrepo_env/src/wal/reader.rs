//! Streaming recovery reader.

use crate::checksum::crc32;
use crate::error::{EnvError, EnvResult};
use crate::wal::record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use crate::wal::{CRC_SIZE, HEADER_SIZE};
use proxyrepo_storage::StorageBackend;

/// Iterates over the records of a log, one `read_at` per field.
///
/// Yields `(offset, record)` pairs. Iteration stops quietly at a record
/// that runs past the end of the log; [`WalReader::torn_at`] then reports
/// where that partial record starts so the caller can cut it off.
pub(crate) struct WalReader<'a> {
    backend: &'a dyn StorageBackend,
    offset: u64,
    size: u64,
    torn_at: Option<u64>,
    finished: bool,
}

impl<'a> WalReader<'a> {
    pub(crate) fn new(backend: &'a dyn StorageBackend) -> EnvResult<Self> {
        Ok(Self {
            backend,
            offset: 0,
            size: backend.size()?,
            torn_at: None,
            finished: false,
        })
    }

    /// Start of a trailing partial record, if iteration hit one.
    pub(crate) fn torn_at(&self) -> Option<u64> {
        self.torn_at
    }

    fn read_next(&mut self) -> EnvResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        if start == self.size {
            return Ok(None);
        }
        if start + HEADER_SIZE as u64 > self.size {
            self.torn_at = Some(start);
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[..4] != WAL_MAGIC {
            return Err(EnvError::wal_corruption(format!(
                "bad record magic at offset {start}"
            )));
        }
        let version = u16::from_be_bytes([header[4], header[5]]);
        if version != WAL_VERSION {
            return Err(EnvError::wal_corruption(format!(
                "unsupported record version {version} at offset {start}"
            )));
        }
        let record_type = WalRecordType::from_byte(header[6]).ok_or_else(|| {
            EnvError::wal_corruption(format!(
                "unknown record type {} at offset {start}",
                header[6]
            ))
        })?;
        let len = u32::from_be_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let body_at = start + HEADER_SIZE as u64;
        let end = body_at + (len + CRC_SIZE) as u64;
        if end > self.size {
            self.torn_at = Some(start);
            return Ok(None);
        }
        let body = self.backend.read_at(body_at, len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(len);

        let mut covered = header;
        covered.extend_from_slice(payload);
        let actual = crc32(&covered);
        let expected = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if expected != actual {
            return Err(EnvError::ChecksumMismatch { expected, actual });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;
        self.offset = end;
        Ok(Some((start, record)))
    }
}

impl Iterator for WalReader<'_> {
    type Item = EnvResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

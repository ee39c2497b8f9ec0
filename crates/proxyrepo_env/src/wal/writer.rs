//! Appending committed transactions to the log.

use crate::checksum::crc32;
use crate::error::{EnvError, EnvResult};
use crate::wal::record::{WalRecord, WAL_MAGIC, WAL_VERSION};
use crate::wal::{CRC_SIZE, HEADER_SIZE};
use bytes::{BufMut, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use proxyrepo_storage::StorageBackend;

/// Serializes and appends WAL records.
///
/// A transaction is framed into one buffer and written with a single
/// append so its `Commit` record can only reach the log after every change
/// record before it.
pub(crate) struct WalWriter {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
}

impl WalWriter {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
        }
    }

    /// Appends the framed form of `record` to `buf`.
    pub(crate) fn frame(record: &WalRecord, buf: &mut BytesMut) -> EnvResult<()> {
        let start = buf.len();
        buf.put_slice(&WAL_MAGIC);
        buf.put_u16(WAL_VERSION);
        buf.put_u8(record.record_type().as_byte());
        let len_at = buf.len();
        buf.put_u32(0);

        let payload_at = buf.len();
        record.encode_payload(buf)?;
        let len = u32::try_from(buf.len() - payload_at)
            .map_err(|_| EnvError::invalid_operation("WAL record payload too large"))?;
        buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());

        let crc = crc32(&buf[start..]);
        buf.put_u32(crc);
        debug_assert_eq!(buf.len() - start, HEADER_SIZE + len as usize + CRC_SIZE);
        Ok(())
    }

    /// Writes one transaction's records and makes them durable.
    ///
    /// If the append fails the log is cut back to where it was, so a
    /// half-written transaction never sits in front of later commits.
    pub(crate) fn append_txn(&self, records: &[WalRecord]) -> EnvResult<u64> {
        let mut buf = BytesMut::with_capacity(64 * records.len());
        for record in records {
            Self::frame(record, &mut buf)?;
        }

        let mut backend = self.backend.lock();
        let start = backend.size()?;
        let result = backend.append(&buf).and_then(|_| {
            if self.sync_on_commit {
                backend.sync()
            } else {
                backend.flush()
            }
        });
        if let Err(err) = result {
            if let Err(cleanup) = backend.truncate(start) {
                tracing::error!(error = %cleanup, offset = start, "failed to cut back torn WAL append");
            }
            return Err(err.into());
        }
        Ok(buf.len() as u64)
    }

    pub(crate) fn size(&self) -> EnvResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    pub(crate) fn truncate(&self, size: u64) -> EnvResult<()> {
        self.backend.lock().truncate(size)?;
        Ok(())
    }

    pub(crate) fn flush(&self) -> EnvResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    pub(crate) fn sync(&self) -> EnvResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Locks the backend for reading records back.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn StorageBackend>> {
        self.backend.lock()
    }
}

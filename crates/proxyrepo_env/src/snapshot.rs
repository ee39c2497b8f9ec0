//! Checkpoint snapshots.
//!
//! Layout (big-endian):
//!
//! ```text
//! | magic "PRSN" | version u16 | seq u64 | next_txid u64 | db_count u32 |
//! |   per db: name (u32 len + utf8) | entry_count u64 |
//! |     per entry: key (u32 len + bytes) | value (u32 len + bytes) |
//! | crc32 u32 |
//! ```

use crate::checksum::crc32;
use crate::dir::EnvDir;
use crate::error::{EnvError, EnvResult};
use crate::state::{DbTable, EnvState};
use crate::types::SeqNo;
use crate::wal::record::{put_blob, read_blob};
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use proxyrepo_codec::{ByteOrder, KeyReader, Serde, StringSerde};
use proxyrepo_storage::StorageBackend;
use std::path::Path;
use std::sync::Arc;

const SNAPSHOT_MAGIC: [u8; 4] = *b"PRSN";
const SNAPSHOT_VERSION: u16 = 1;

/// Serializes `state`.
pub(crate) fn encode(state: &EnvState, next_txid: u64) -> EnvResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(64 + state.used_bytes() as usize);
    buf.put_slice(&SNAPSHOT_MAGIC);
    buf.put_u16(SNAPSHOT_VERSION);
    buf.put_u64(state.seq.as_u64());
    buf.put_u64(next_txid);
    buf.put_u32(state.dbs.len() as u32);
    for table in &state.dbs {
        StringSerde.write(&table.name, &mut buf);
        buf.put_u64(table.entries.len() as u64);
        for (key, value) in &table.entries {
            put_blob(&mut buf, key)?;
            put_blob(&mut buf, value)?;
        }
    }
    let crc = crc32(&buf);
    buf.put_u32(crc);
    Ok(buf.to_vec())
}

/// Parses a snapshot, returning the state and the next transaction id.
pub(crate) fn decode(data: &[u8]) -> EnvResult<(EnvState, u64)> {
    if data.len() < SNAPSHOT_MAGIC.len() + 4 {
        return Err(EnvError::invalid_format("snapshot too short"));
    }
    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let expected = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = crc32(body);
    if expected != actual {
        return Err(EnvError::ChecksumMismatch { expected, actual });
    }

    let mut reader = KeyReader::new(body);
    if reader.read_array::<4>()? != SNAPSHOT_MAGIC {
        return Err(EnvError::invalid_format("bad snapshot magic"));
    }
    let version = u16::from_be_bytes(reader.read_array()?);
    if version != SNAPSHOT_VERSION {
        return Err(EnvError::invalid_format(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let seq = SeqNo::new(reader.read_u64(ByteOrder::BigEndian)?);
    let next_txid = reader.read_u64(ByteOrder::BigEndian)?;
    let db_count = reader.read_u32(ByteOrder::BigEndian)?;
    let mut dbs = Vec::with_capacity(db_count as usize);
    for _ in 0..db_count {
        let mut table = DbTable::new(StringSerde.read(&mut reader)?);
        let entries = reader.read_u64(ByteOrder::BigEndian)?;
        for _ in 0..entries {
            let key = read_blob(&mut reader)?;
            let value = read_blob(&mut reader)?;
            table.put(key, value);
        }
        dbs.push(Arc::new(table));
    }
    reader.finish()?;

    Ok((EnvState { seq, dbs }, next_txid))
}

/// Where checkpoints are written.
pub(crate) enum SnapshotStore {
    /// `data.snap` inside a locked environment directory.
    Dir(EnvDir),
    /// Any backend; replaced in place.
    Backend(Mutex<Box<dyn StorageBackend>>),
}

impl SnapshotStore {
    pub(crate) fn load(&self) -> EnvResult<Option<Vec<u8>>> {
        match self {
            Self::Dir(dir) => dir.load_snapshot(),
            Self::Backend(backend) => {
                let data = backend.lock().read_all()?;
                Ok((!data.is_empty()).then_some(data))
            }
        }
    }

    pub(crate) fn save(&self, data: &[u8]) -> EnvResult<()> {
        match self {
            Self::Dir(dir) => dir.save_snapshot(data),
            Self::Backend(backend) => Ok(backend.lock().replace(data)?),
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Self::Dir(dir) => Some(dir.path()),
            Self::Backend(_) => None,
        }
    }

    pub(crate) fn dir(&self) -> Option<&EnvDir> {
        match self {
            Self::Dir(dir) => Some(dir),
            Self::Backend(_) => None,
        }
    }

    pub(crate) fn size(&self) -> EnvResult<u64> {
        match self {
            Self::Dir(dir) => match std::fs::metadata(dir.snapshot_path()) {
                Ok(meta) => Ok(meta.len()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(err) => Err(err.into()),
            },
            Self::Backend(backend) => Ok(backend.lock().size()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> EnvState {
        let mut feeds = DbTable::new("feed");
        feeds.put(b"a".to_vec(), vec![0, 0, 0, 1]);
        feeds.put(b"b".to_vec(), vec![0, 0, 0, 2]);
        EnvState {
            seq: SeqNo::new(9),
            dbs: vec![Arc::new(feeds), Arc::new(DbTable::new("empty"))],
        }
    }

    #[test]
    fn snapshot_restores_tables_and_counters() {
        let data = encode(&sample_state(), 17).unwrap();
        let (state, next_txid) = decode(&data).unwrap();

        assert_eq!(next_txid, 17);
        assert_eq!(state.seq, SeqNo::new(9));
        assert_eq!(state.dbs.len(), 2);
        assert_eq!(state.dbs[0].entries.len(), 2);
        assert_eq!(state.dbs[0].bytes, 10);
        assert_eq!(state.dbs[1].name, "empty");
    }

    #[test]
    fn damaged_snapshot_is_rejected() {
        let mut data = encode(&sample_state(), 1).unwrap();
        data[12] ^= 0xff;
        assert!(matches!(
            decode(&data),
            Err(EnvError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            decode(b"PR"),
            Err(EnvError::InvalidFormat { .. })
        ));
    }
}

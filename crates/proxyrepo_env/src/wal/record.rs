//! WAL record types and payload encoding.

use crate::error::{EnvError, EnvResult};
use crate::types::{SeqNo, TxnId};
use bytes::{BufMut, BytesMut};
use proxyrepo_codec::{ByteOrder, KeyReader, Serde, StringSerde};

/// Magic bytes opening every record.
pub const WAL_MAGIC: [u8; 4] = *b"PRWL";

/// Record format version.
pub const WAL_VERSION: u16 = 1;

/// Type tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// A named database was created.
    CreateDb = 1,
    /// A key was written.
    Put = 2,
    /// A key was removed.
    Delete = 3,
    /// Every key of a database was removed.
    Clear = 4,
    /// The transaction's records are complete.
    Commit = 5,
}

impl WalRecordType {
    /// Converts a tag byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::CreateDb),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Clear),
            5 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Returns the tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logged change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Database `dbi` was created with `name`.
    CreateDb {
        /// Owning transaction.
        txid: TxnId,
        /// Handle assigned to the database.
        dbi: u32,
        /// Database name.
        name: String,
    },
    /// `key` in `dbi` was set to `value`.
    Put {
        /// Owning transaction.
        txid: TxnId,
        /// Target database.
        dbi: u32,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// `key` was removed from `dbi`.
    Delete {
        /// Owning transaction.
        txid: TxnId,
        /// Target database.
        dbi: u32,
        /// Key bytes.
        key: Vec<u8>,
    },
    /// `dbi` was emptied.
    Clear {
        /// Owning transaction.
        txid: TxnId,
        /// Target database.
        dbi: u32,
    },
    /// Transaction `txid` committed as `seq`.
    Commit {
        /// Committed transaction.
        txid: TxnId,
        /// Assigned commit sequence.
        seq: SeqNo,
    },
}

impl WalRecord {
    /// Returns the type tag.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::CreateDb { .. } => WalRecordType::CreateDb,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Clear { .. } => WalRecordType::Clear,
            Self::Commit { .. } => WalRecordType::Commit,
        }
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn txid(&self) -> TxnId {
        match self {
            Self::CreateDb { txid, .. }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Clear { txid, .. }
            | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Appends the payload (no envelope) to `buf`.
    pub fn encode_payload(&self, buf: &mut BytesMut) -> EnvResult<()> {
        buf.put_u64(self.txid().as_u64());
        match self {
            Self::CreateDb { dbi, name, .. } => {
                buf.put_u32(*dbi);
                StringSerde.write(name, buf);
            }
            Self::Put {
                dbi, key, value, ..
            } => {
                buf.put_u32(*dbi);
                put_blob(buf, key)?;
                put_blob(buf, value)?;
            }
            Self::Delete { dbi, key, .. } => {
                buf.put_u32(*dbi);
                put_blob(buf, key)?;
            }
            Self::Clear { dbi, .. } => buf.put_u32(*dbi),
            Self::Commit { seq, .. } => buf.put_u64(seq.as_u64()),
        }
        Ok(())
    }

    /// Decodes a payload of the given type.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> EnvResult<Self> {
        let mut reader = KeyReader::new(payload);
        let txid = TxnId::new(reader.read_u64(ByteOrder::BigEndian)?);
        let record = match record_type {
            WalRecordType::CreateDb => Self::CreateDb {
                txid,
                dbi: reader.read_u32(ByteOrder::BigEndian)?,
                name: StringSerde.read(&mut reader)?,
            },
            WalRecordType::Put => Self::Put {
                txid,
                dbi: reader.read_u32(ByteOrder::BigEndian)?,
                key: read_blob(&mut reader)?,
                value: read_blob(&mut reader)?,
            },
            WalRecordType::Delete => Self::Delete {
                txid,
                dbi: reader.read_u32(ByteOrder::BigEndian)?,
                key: read_blob(&mut reader)?,
            },
            WalRecordType::Clear => Self::Clear {
                txid,
                dbi: reader.read_u32(ByteOrder::BigEndian)?,
            },
            WalRecordType::Commit => Self::Commit {
                txid,
                seq: SeqNo::new(reader.read_u64(ByteOrder::BigEndian)?),
            },
        };
        if !reader.is_empty() {
            return Err(EnvError::wal_corruption(format!(
                "{} trailing bytes in {:?} record",
                reader.remaining(),
                record_type
            )));
        }
        Ok(record)
    }
}

pub(crate) fn put_blob(buf: &mut BytesMut, data: &[u8]) -> EnvResult<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| EnvError::invalid_operation("value larger than 4 GiB"))?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

pub(crate) fn read_blob(reader: &mut KeyReader<'_>) -> EnvResult<Vec<u8>> {
    let len = reader.read_u32(ByteOrder::BigEndian)? as usize;
    Ok(reader.read_bytes(len)?.to_vec())
}

//! Committed state shared by readers.

use crate::error::{EnvError, EnvResult};
use crate::types::{Dbi, SeqNo};
use crate::wal::WalRecord;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One named database: a sorted map of byte keys to byte values.
#[derive(Debug, Clone, Default)]
pub(crate) struct DbTable {
    pub(crate) name: String,
    pub(crate) entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Sum of key and value lengths.
    pub(crate) bytes: u64,
}

impl DbTable {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let added = (key.len() + value.len()) as u64;
        let key_len = key.len() as u64;
        if let Some(old) = self.entries.insert(key, value) {
            self.bytes -= key_len + old.len() as u64;
        }
        self.bytes += added;
    }

    pub(crate) fn delete(&mut self, key: &[u8]) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.bytes -= (key.len() + old.len()) as u64;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }
}

/// An immutable view of every database as of one commit.
///
/// Readers hold an `Arc` of this; the committing writer copies a table only
/// if a reader still shares it.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvState {
    pub(crate) seq: SeqNo,
    pub(crate) dbs: Vec<Arc<DbTable>>,
}

impl EnvState {
    pub(crate) fn table(&self, dbi: Dbi) -> Option<&DbTable> {
        self.dbs.get(dbi.index()).map(Arc::as_ref)
    }

    pub(crate) fn table_mut(&mut self, dbi: u32) -> EnvResult<&mut DbTable> {
        self.dbs
            .get_mut(dbi as usize)
            .map(Arc::make_mut)
            .ok_or(EnvError::DbNotFound { dbi })
    }

    pub(crate) fn find(&self, name: &str) -> Option<Dbi> {
        self.dbs
            .iter()
            .position(|t| t.name == name)
            .map(|i| Dbi(i as u32))
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        self.dbs.iter().map(|t| t.bytes).sum()
    }

    /// Re-applies one logged change during recovery.
    pub(crate) fn replay(&mut self, record: WalRecord) -> EnvResult<()> {
        match record {
            WalRecord::CreateDb { dbi, name, .. } => {
                let next = self.dbs.len() as u32;
                match self.dbs.get(dbi as usize) {
                    Some(existing) if existing.name == name => {}
                    None if dbi == next => self.dbs.push(Arc::new(DbTable::new(name))),
                    _ => {
                        return Err(EnvError::wal_corruption(format!(
                            "database '{name}' logged as dbi {dbi}, {next} databases known"
                        )))
                    }
                }
            }
            WalRecord::Put {
                dbi, key, value, ..
            } => self.table_mut(dbi)?.put(key, value),
            WalRecord::Delete { dbi, key, .. } => {
                self.table_mut(dbi)?.delete(&key);
            }
            WalRecord::Clear { dbi, .. } => self.table_mut(dbi)?.clear(),
            WalRecord::Commit { seq, .. } => self.seq = seq,
        }
        Ok(())
    }
}

//! Read and write transactions.
//!
//! Both kinds implement [`Txn`]. A read transaction pins the committed
//! state it started on and never blocks or is blocked by the writer. A
//! write transaction holds the environment's single writer lock from
//! `begin_write` until it commits, aborts or is dropped, and buffers its
//! changes in a per-database overlay that its own reads see.

use crate::env::Env;
use crate::error::{EnvError, EnvResult};
use crate::readers::ReadPermit;
use crate::state::{DbTable, EnvState};
use crate::types::{Dbi, SeqNo, TxnId};
use crate::wal::WalRecord;
use parking_lot::MutexGuard;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::Arc;

/// Longest accepted key, in bytes.
pub const MAX_KEY_SIZE: usize = 511;

/// A key and value borrowed from a transaction.
pub type Entry<'t> = (&'t [u8], &'t [u8]);

/// Iteration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Backward,
}

/// Uncommitted changes to one database.
#[derive(Debug, Default)]
pub(crate) struct DbOverlay {
    /// Every committed key is hidden.
    pub(crate) cleared: bool,
    /// `None` marks a deleted key.
    pub(crate) entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl DbOverlay {
    fn is_empty(&self) -> bool {
        !self.cleared && self.entries.is_empty()
    }
}

/// One database as a transaction sees it: committed entries with the
/// transaction's own changes layered on top.
#[derive(Debug, Clone, Copy)]
pub struct DbView<'t> {
    base: Option<&'t DbTable>,
    overlay: Option<&'t DbOverlay>,
}

impl<'t> DbView<'t> {
    fn committed(&self) -> Option<&'t DbTable> {
        match self.overlay {
            Some(overlay) if overlay.cleared => None,
            _ => self.base,
        }
    }

    fn shadowed(&self, key: &[u8]) -> bool {
        self.overlay
            .map_or(false, |overlay| overlay.entries.contains_key(key))
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&'t [u8]> {
        if let Some(entry) = self.overlay.and_then(|o| o.entries.get(key)) {
            return entry.as_deref();
        }
        self.committed()?.entries.get(key).map(Vec::as_slice)
    }

    /// Number of visible keys.
    #[must_use]
    pub fn len(&self) -> u64 {
        let committed = self.committed();
        let mut count = committed.map_or(0, |t| t.entries.len() as u64);
        if let Some(overlay) = self.overlay {
            for (key, value) in &overlay.entries {
                let existed = committed.map_or(false, |t| t.entries.contains_key(key));
                match (value.is_some(), existed) {
                    (true, false) => count += 1,
                    (false, true) => count -= 1,
                    _ => {}
                }
            }
        }
        count
    }

    /// Returns true if no key is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seek(Unbounded, Direction::Forward).is_none()
    }

    /// Nearest visible entry from `from` in `direction`.
    fn seek(&self, from: Bound<&[u8]>, direction: Direction) -> Option<Entry<'t>> {
        let range = match direction {
            Direction::Forward => (from, Unbounded),
            Direction::Backward => (Unbounded, from),
        };

        let committed = self.committed().and_then(|table| {
            let mut iter = table.entries.range::<[u8], _>(range);
            let mut step = || match direction {
                Direction::Forward => iter.next(),
                Direction::Backward => iter.next_back(),
            };
            std::iter::from_fn(|| step())
                .find(|(key, _)| !self.shadowed(key))
                .map(|(key, value)| (key.as_slice(), value.as_slice()))
        });

        let pending = self.overlay.and_then(|overlay| {
            let mut iter = overlay.entries.range::<[u8], _>(range);
            let mut step = || match direction {
                Direction::Forward => iter.next(),
                Direction::Backward => iter.next_back(),
            };
            std::iter::from_fn(|| step())
                .find_map(|(key, value)| value.as_deref().map(|v| (key.as_slice(), v)))
        });

        let wanted = match direction {
            Direction::Forward => Ordering::Less,
            Direction::Backward => Ordering::Greater,
        };
        match (committed, pending) {
            (Some(a), Some(b)) => Some(if a.0.cmp(b.0) == wanted { a } else { b }),
            (a, b) => a.or(b),
        }
    }
}

/// A positioned cursor over one database.
///
/// Mirrors the usual B-tree cursor operations. A move that finds nothing
/// leaves the position unchanged.
#[derive(Debug, Clone)]
pub struct Cursor<'t> {
    view: DbView<'t>,
    position: Option<&'t [u8]>,
}

impl<'t> Cursor<'t> {
    fn settle(&mut self, entry: Option<Entry<'t>>) -> Option<Entry<'t>> {
        if let Some((key, _)) = entry {
            self.position = Some(key);
        }
        entry
    }

    /// Moves to the smallest key.
    pub fn first(&mut self) -> Option<Entry<'t>> {
        let entry = self.view.seek(Unbounded, Direction::Forward);
        self.settle(entry)
    }

    /// Moves to the largest key.
    pub fn last(&mut self) -> Option<Entry<'t>> {
        let entry = self.view.seek(Unbounded, Direction::Backward);
        self.settle(entry)
    }

    /// Moves to the smallest key `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> Option<Entry<'t>> {
        let entry = self.view.seek(Included(key), Direction::Forward);
        self.settle(entry)
    }

    /// Moves to the following key, or the first key if unpositioned.
    pub fn next_entry(&mut self) -> Option<Entry<'t>> {
        let entry = match self.position {
            Some(at) => self.view.seek(Excluded(at), Direction::Forward),
            None => return self.first(),
        };
        self.settle(entry)
    }

    /// Moves to the preceding key, or the last key if unpositioned.
    pub fn prev_entry(&mut self) -> Option<Entry<'t>> {
        let entry = match self.position {
            Some(at) => self.view.seek(Excluded(at), Direction::Backward),
            None => return self.last(),
        };
        self.settle(entry)
    }

    /// Entry at the current position.
    #[must_use]
    pub fn current(&self) -> Option<Entry<'t>> {
        let key = self.position?;
        self.view.get(key).map(|value| (key, value))
    }
}

/// Iterator over entries of one database.
#[derive(Debug, Clone)]
pub struct Entries<'t> {
    view: DbView<'t>,
    next: Option<Entry<'t>>,
    direction: Direction,
    prefix: Option<Vec<u8>>,
}

impl<'t> Entries<'t> {
    fn new(
        view: DbView<'t>,
        start: Bound<&[u8]>,
        direction: Direction,
        prefix: Option<Vec<u8>>,
    ) -> Self {
        Self {
            next: view.seek(start, direction),
            view,
            direction,
            prefix,
        }
    }
}

impl<'t> Iterator for Entries<'t> {
    type Item = Entry<'t>;

    fn next(&mut self) -> Option<Entry<'t>> {
        let entry = self.next.take()?;
        if let Some(prefix) = &self.prefix {
            if !entry.0.starts_with(prefix) {
                return None;
            }
        }
        self.next = self.view.seek(Excluded(entry.0), self.direction);
        Some(entry)
    }
}

/// Read operations shared by every transaction.
pub trait Txn {
    /// The database `dbi` as this transaction sees it.
    fn view(&self, dbi: Dbi) -> EnvResult<DbView<'_>>;

    /// Sequence of the commit this transaction reads from.
    fn seq(&self) -> SeqNo;

    /// Value stored under `key`.
    fn get(&self, dbi: Dbi, key: &[u8]) -> EnvResult<Option<&[u8]>> {
        Ok(self.view(dbi)?.get(key))
    }

    /// Returns true if `key` is present.
    fn contains(&self, dbi: Dbi, key: &[u8]) -> EnvResult<bool> {
        Ok(self.view(dbi)?.get(key).is_some())
    }

    /// Opens an unpositioned cursor.
    fn cursor(&self, dbi: Dbi) -> EnvResult<Cursor<'_>> {
        Ok(Cursor {
            view: self.view(dbi)?,
            position: None,
        })
    }

    /// Number of keys.
    fn count(&self, dbi: Dbi) -> EnvResult<u64> {
        Ok(self.view(dbi)?.len())
    }

    /// Entry with the smallest key.
    fn first(&self, dbi: Dbi) -> EnvResult<Option<Entry<'_>>> {
        Ok(self.view(dbi)?.seek(Unbounded, Direction::Forward))
    }

    /// Entry with the largest key.
    fn last(&self, dbi: Dbi) -> EnvResult<Option<Entry<'_>>> {
        Ok(self.view(dbi)?.seek(Unbounded, Direction::Backward))
    }

    /// Every entry in key order.
    fn iter(&self, dbi: Dbi) -> EnvResult<Entries<'_>> {
        self.iter_from(dbi, Unbounded, Direction::Forward)
    }

    /// Entries from `start` onwards in `direction`.
    fn iter_from(
        &self,
        dbi: Dbi,
        start: Bound<&[u8]>,
        direction: Direction,
    ) -> EnvResult<Entries<'_>> {
        Ok(Entries::new(self.view(dbi)?, start, direction, None))
    }

    /// Entries whose key starts with `prefix`, ascending.
    fn scan_prefix(&self, dbi: Dbi, prefix: &[u8]) -> EnvResult<Entries<'_>> {
        Ok(Entries::new(
            self.view(dbi)?,
            Included(prefix),
            Direction::Forward,
            Some(prefix.to_vec()),
        ))
    }
}

/// A snapshot-isolated read transaction.
pub struct ReadTxn<'env> {
    state: Arc<EnvState>,
    _permit: ReadPermit<'env>,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn new(state: Arc<EnvState>, permit: ReadPermit<'env>) -> Self {
        Self {
            state,
            _permit: permit,
        }
    }
}

impl Txn for ReadTxn<'_> {
    fn view(&self, dbi: Dbi) -> EnvResult<DbView<'_>> {
        let table = self
            .state
            .table(dbi)
            .ok_or(EnvError::DbNotFound { dbi: dbi.id() })?;
        Ok(DbView {
            base: Some(table),
            overlay: None,
        })
    }

    fn seq(&self) -> SeqNo {
        self.state.seq
    }
}

impl std::fmt::Debug for ReadTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTxn").field("seq", &self.state.seq).finish()
    }
}

/// The environment's single write transaction.
///
/// Dropping it without [`WriteTxn::commit`] discards every change.
pub struct WriteTxn<'env> {
    env: &'env Env,
    _guard: MutexGuard<'env, ()>,
    txid: TxnId,
    base: Arc<EnvState>,
    created: Vec<String>,
    overlays: BTreeMap<u32, DbOverlay>,
    finished: bool,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn new(
        env: &'env Env,
        guard: MutexGuard<'env, ()>,
        txid: TxnId,
        base: Arc<EnvState>,
    ) -> Self {
        Self {
            env,
            _guard: guard,
            txid,
            base,
            created: Vec::new(),
            overlays: BTreeMap::new(),
            finished: false,
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.txid
    }

    /// Returns the handle for `name`, creating the database on commit if
    /// it does not exist yet.
    pub fn open_db(&mut self, name: &str) -> EnvResult<Dbi> {
        if let Some(dbi) = self.base.find(name) {
            return Ok(dbi);
        }
        let known = self.base.dbs.len();
        if let Some(pos) = self.created.iter().position(|n| n == name) {
            return Ok(Dbi((known + pos) as u32));
        }
        let id = u32::try_from(known + self.created.len())
            .map_err(|_| EnvError::invalid_operation("too many databases"))?;
        self.created.push(name.to_string());
        tracing::debug!(db = name, dbi = id, "creating database");
        Ok(Dbi(id))
    }

    fn check_dbi(&self, dbi: Dbi) -> EnvResult<()> {
        if dbi.index() < self.base.dbs.len() + self.created.len() {
            Ok(())
        } else {
            Err(EnvError::DbNotFound { dbi: dbi.id() })
        }
    }

    fn check_key(key: &[u8]) -> EnvResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(EnvError::InvalidKeySize {
                len: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }

    fn overlay(&mut self, dbi: Dbi) -> &mut DbOverlay {
        self.overlays.entry(dbi.id()).or_default()
    }

    fn committed_has(&self, dbi: Dbi, key: &[u8]) -> bool {
        let cleared = self.overlays.get(&dbi.id()).map_or(false, |o| o.cleared);
        !cleared
            && self
                .base
                .table(dbi)
                .map_or(false, |t| t.entries.contains_key(key))
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&mut self, dbi: Dbi, key: &[u8], value: &[u8]) -> EnvResult<()> {
        self.check_dbi(dbi)?;
        Self::check_key(key)?;
        self.overlay(dbi)
            .entries
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Stores `value` only if `key` is absent. Returns whether it stored.
    pub fn put_if_absent(&mut self, dbi: Dbi, key: &[u8], value: &[u8]) -> EnvResult<bool> {
        if self.contains(dbi, key)? {
            return Ok(false);
        }
        self.put(dbi, key, value)?;
        Ok(true)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&mut self, dbi: Dbi, key: &[u8]) -> EnvResult<bool> {
        if !self.contains(dbi, key)? {
            return Ok(false);
        }
        if self.committed_has(dbi, key) {
            self.overlay(dbi).entries.insert(key.to_vec(), None);
        } else {
            // Only ever written by this transaction
            self.overlay(dbi).entries.remove(key);
        }
        Ok(true)
    }

    /// Removes every key of `dbi`.
    pub fn clear(&mut self, dbi: Dbi) -> EnvResult<()> {
        self.check_dbi(dbi)?;
        *self.overlay(dbi) = DbOverlay {
            cleared: true,
            entries: BTreeMap::new(),
        };
        Ok(())
    }

    /// Returns true if the transaction has changes to commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.created.is_empty() || self.overlays.values().any(|o| !o.is_empty())
    }

    fn projected_bytes(&self) -> u64 {
        let mut total = self.base.used_bytes();
        for (&dbi, overlay) in &self.overlays {
            let table = self.base.table(Dbi(dbi));
            if overlay.cleared {
                total -= table.map_or(0, |t| t.bytes);
            }
            for (key, value) in &overlay.entries {
                let old = if overlay.cleared {
                    None
                } else {
                    table.and_then(|t| t.entries.get(key))
                };
                if let Some(old) = old {
                    total -= (key.len() + old.len()) as u64;
                }
                if let Some(new) = value {
                    total += (key.len() + new.len()) as u64;
                }
            }
        }
        total
    }

    fn records(&self, seq: SeqNo) -> Vec<WalRecord> {
        let txid = self.txid;
        let known = self.base.dbs.len();
        let mut records = Vec::new();
        for (i, name) in self.created.iter().enumerate() {
            records.push(WalRecord::CreateDb {
                txid,
                dbi: (known + i) as u32,
                name: name.clone(),
            });
        }
        for (&dbi, overlay) in &self.overlays {
            if overlay.cleared {
                records.push(WalRecord::Clear { txid, dbi });
            }
            for (key, value) in &overlay.entries {
                records.push(match value {
                    Some(value) => WalRecord::Put {
                        txid,
                        dbi,
                        key: key.clone(),
                        value: value.clone(),
                    },
                    None => WalRecord::Delete {
                        txid,
                        dbi,
                        key: key.clone(),
                    },
                });
            }
        }
        records.push(WalRecord::Commit { txid, seq });
        records
    }

    /// Logs and applies the changes, returning the commit sequence.
    ///
    /// A transaction without changes writes nothing and returns the
    /// sequence it read from.
    ///
    /// # Errors
    ///
    /// [`EnvError::MapFull`] if the data would outgrow the map size, or any
    /// WAL error. On error nothing of the transaction is visible.
    pub fn commit(mut self) -> EnvResult<SeqNo> {
        self.finished = true;
        let env = self.env;
        if !self.is_dirty() {
            return Ok(self.base.seq);
        }
        if let Err(err) = env.ensure_open() {
            env.stats().record_abort();
            return Err(err);
        }

        let required = self.projected_bytes();
        let map_size = env.config().map_size;
        if required > map_size {
            env.stats().record_abort();
            return Err(EnvError::MapFull { required, map_size });
        }

        let seq = self.base.seq.next();
        let records = self.records(seq);
        let wal_bytes = match env.wal().append_txn(&records) {
            Ok(bytes) => bytes,
            Err(err) => {
                env.stats().record_abort();
                return Err(err);
            }
        };

        // Release our pin so the apply can mutate tables in place
        drop(std::mem::take(&mut self.base));
        let created = std::mem::take(&mut self.created);
        let overlays = std::mem::take(&mut self.overlays);
        let (puts, deletes) = env.apply(seq, created, overlays)?;
        env.stats().record_commit(puts, deletes, wal_bytes);
        tracing::trace!(txid = %self.txid, %seq, puts, deletes, "committed");

        env.maybe_checkpoint();
        Ok(seq)
    }

    /// Discards every change.
    pub fn abort(mut self) {
        self.finished = true;
        self.env.stats().record_abort();
    }
}

impl Txn for WriteTxn<'_> {
    fn view(&self, dbi: Dbi) -> EnvResult<DbView<'_>> {
        self.check_dbi(dbi)?;
        Ok(DbView {
            base: self.base.table(dbi),
            overlay: self.overlays.get(&dbi.id()),
        })
    }

    fn seq(&self) -> SeqNo {
        self.base.seq
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(txid = %self.txid, "write transaction dropped without commit");
            self.env.stats().record_abort();
        }
    }
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("txid", &self.txid)
            .field("base_seq", &self.base.seq)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_of<'a>(base: &'a DbTable, overlay: &'a DbOverlay) -> DbView<'a> {
        DbView {
            base: Some(base),
            overlay: Some(overlay),
        }
    }

    fn table(keys: &[&[u8]]) -> DbTable {
        let mut table = DbTable::new("t");
        for key in keys {
            table.put(key.to_vec(), b"base".to_vec());
        }
        table
    }

    #[test]
    fn overlay_shadows_committed_entries() {
        let base = table(&[b"a", b"b", b"c"]);
        let mut overlay = DbOverlay::default();
        overlay.entries.insert(b"b".to_vec(), None);
        overlay.entries.insert(b"bb".to_vec(), Some(b"new".to_vec()));
        let view = view_of(&base, &overlay);

        let keys: Vec<&[u8]> = Entries::new(view, Unbounded, Direction::Forward, None)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![&b"a"[..], b"bb", b"c"]);
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(b"b"), None);
        assert_eq!(view.get(b"bb"), Some(&b"new"[..]));
    }

    #[test]
    fn cleared_overlay_hides_base() {
        let base = table(&[b"a", b"b"]);
        let mut overlay = DbOverlay {
            cleared: true,
            ..DbOverlay::default()
        };
        overlay.entries.insert(b"z".to_vec(), Some(vec![]));
        let view = view_of(&base, &overlay);

        assert_eq!(view.len(), 1);
        assert_eq!(view.get(b"a"), None);
        assert_eq!(
            view.seek(Unbounded, Direction::Forward).map(|e| e.0),
            Some(&b"z"[..])
        );
    }

    #[test]
    fn backward_seek_merges_both_sides() {
        let base = table(&[b"a", b"c"]);
        let mut overlay = DbOverlay::default();
        overlay.entries.insert(b"b".to_vec(), Some(vec![1]));
        overlay.entries.insert(b"c".to_vec(), None);
        let view = view_of(&base, &overlay);

        let keys: Vec<&[u8]> = Entries::new(view, Unbounded, Direction::Backward, None)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![&b"b"[..], b"a"]);
    }

    #[test]
    fn cursor_walks_and_stays_at_end() {
        let base = table(&[b"1", b"2"]);
        let overlay = DbOverlay::default();
        let mut cursor = Cursor {
            view: view_of(&base, &overlay),
            position: None,
        };

        assert_eq!(cursor.next_entry().map(|e| e.0), Some(&b"1"[..]));
        assert_eq!(cursor.next_entry().map(|e| e.0), Some(&b"2"[..]));
        assert!(cursor.next_entry().is_none());
        assert_eq!(cursor.current().map(|e| e.0), Some(&b"2"[..]));
        assert_eq!(cursor.prev_entry().map(|e| e.0), Some(&b"1"[..]));
        assert_eq!(cursor.seek(b"15").map(|e| e.0), Some(&b"2"[..]));
    }

    #[test]
    fn prefix_scan_stops_at_prefix_end() {
        let base = table(&[b"a1", b"a2", b"b1"]);
        let overlay = DbOverlay::default();
        let view = view_of(&base, &overlay);

        let count = Entries::new(view, Included(b"a"), Direction::Forward, Some(b"a".to_vec()))
            .count();
        assert_eq!(count, 2);
    }
}

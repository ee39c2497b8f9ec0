//! The environment handle.

use crate::batch::BatchingWriteTxn;
use crate::config::EnvConfig;
use crate::dir::EnvDir;
use crate::error::{EnvError, EnvResult};
use crate::pool::ByteBufferPool;
use crate::readers::ReadPermits;
use crate::snapshot::{self, SnapshotStore};
use crate::state::{DbTable, EnvState};
use crate::stats::{EnvStats, StatsSnapshot};
use crate::txn::{DbOverlay, ReadTxn, Txn, WriteTxn, MAX_KEY_SIZE};
use crate::types::{Dbi, SeqNo, TxnId};
use crate::wal::{WalReader, WalRecord, WalWriter};
use parking_lot::{Mutex, RwLock};
use proxyrepo_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Summary of one database, as reported by [`Env::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInfo {
    /// Database name.
    pub name: String,
    /// Handle.
    pub dbi: Dbi,
    /// Number of keys.
    pub entries: u64,
    /// Sum of key and value lengths.
    pub bytes: u64,
}

/// Environment-wide figures, as reported by [`Env::info`].
#[derive(Debug, Clone)]
pub struct EnvInfo {
    /// Directory, for file-backed environments.
    pub path: Option<PathBuf>,
    /// Sequence of the last commit.
    pub committed_seq: SeqNo,
    /// Logical data size across all databases.
    pub used_bytes: u64,
    /// Configured upper bound on `used_bytes`.
    pub map_size: u64,
    /// Current WAL length.
    pub wal_size: u64,
    /// Reader slots.
    pub max_readers: usize,
    /// Reader slots currently held.
    pub readers_in_use: usize,
    /// Per-database figures in handle order.
    pub databases: Vec<DbInfo>,
}

/// A transactional key-value environment of named, ordered databases.
///
/// One writer at a time, any number of readers up to
/// [`EnvConfig::max_readers`]. Readers see the state as of the last commit
/// before they began and never block the writer.
///
/// Every commit is appended to a write-ahead log before it becomes
/// visible. [`Env::sync`] folds the log into a snapshot; it also runs on
/// its own once the log passes [`EnvConfig::max_wal_size`].
///
/// # Example
///
/// ```rust
/// use proxyrepo_env::{Env, EnvConfig, Txn};
///
/// let env = Env::open_in_memory(EnvConfig::default()).unwrap();
/// let names = env.open_db("names").unwrap();
///
/// env.write(|txn| txn.put(names, b"k", b"v")).unwrap();
///
/// let txn = env.begin_read().unwrap();
/// assert_eq!(txn.get(names, b"k").unwrap(), Some(&b"v"[..]));
/// ```
pub struct Env {
    config: EnvConfig,
    wal: WalWriter,
    snapshots: SnapshotStore,
    state: RwLock<Arc<EnvState>>,
    write_lock: Mutex<()>,
    next_txid: AtomicU64,
    readers: ReadPermits,
    pool: ByteBufferPool,
    stats: EnvStats,
    is_open: RwLock<bool>,
}

impl Env {
    /// Opens the environment stored in directory `path`.
    ///
    /// # Errors
    ///
    /// - [`EnvError::EnvLocked`] if another handle has the directory open
    /// - [`EnvError::InvalidFormat`] if the directory is missing and
    ///   `create_if_missing` is off
    /// - corruption errors if the snapshot or log fail their checks
    pub fn open(path: &Path, config: EnvConfig) -> EnvResult<Self> {
        let dir = EnvDir::open(path, config.create_if_missing)?;
        let wal_backend = FileBackend::open_with_create_dirs(&dir.wal_path())?;
        let env = Self::recover(config, Box::new(wal_backend), SnapshotStore::Dir(dir))?;
        tracing::info!(
            path = %path.display(),
            seq = %env.committed_seq(),
            databases = env.db_names().len(),
            "environment opened"
        );
        Ok(env)
    }

    /// Opens an environment over caller-supplied backends.
    pub fn open_with_backends(
        config: EnvConfig,
        wal_backend: Box<dyn StorageBackend>,
        snapshot_backend: Box<dyn StorageBackend>,
    ) -> EnvResult<Self> {
        Self::recover(
            config,
            wal_backend,
            SnapshotStore::Backend(Mutex::new(snapshot_backend)),
        )
    }

    /// Opens a fresh environment that lives only in memory.
    pub fn open_in_memory(config: EnvConfig) -> EnvResult<Self> {
        Self::open_with_backends(
            config,
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Loads the snapshot and replays the commits logged after it.
    fn recover(
        config: EnvConfig,
        wal_backend: Box<dyn StorageBackend>,
        snapshots: SnapshotStore,
    ) -> EnvResult<Self> {
        let (mut state, mut next_txid) = match snapshots.load()? {
            Some(data) => snapshot::decode(&data)?,
            None => (EnvState::default(), 1),
        };
        let snapshot_seq = state.seq;

        let wal = WalWriter::new(wal_backend, config.sync_on_commit);
        let mut pending: HashMap<TxnId, Vec<WalRecord>> = HashMap::new();
        let mut replayed = 0u64;
        let torn_at = {
            let backend = wal.lock();
            let mut reader = WalReader::new(&**backend)?;
            for item in &mut reader {
                let (offset, record) = item?;
                next_txid = next_txid.max(record.txid().as_u64() + 1);
                match record {
                    WalRecord::Commit { txid, seq } => {
                        let records = pending.remove(&txid).unwrap_or_default();
                        if seq <= state.seq {
                            // Already folded into the snapshot
                            continue;
                        }
                        if seq != state.seq.next() {
                            return Err(EnvError::wal_corruption(format!(
                                "commit {seq} at offset {offset} follows {}",
                                state.seq
                            )));
                        }
                        for change in records {
                            state.replay(change)?;
                        }
                        state.seq = seq;
                        replayed += 1;
                    }
                    change => pending.entry(change.txid()).or_default().push(change),
                }
            }
            reader.torn_at()
        };

        if !pending.is_empty() {
            tracing::warn!(
                transactions = pending.len(),
                "discarding uncommitted WAL records"
            );
        }
        if let Some(offset) = torn_at {
            tracing::warn!(offset, "truncating torn WAL tail");
            wal.truncate(offset)?;
        }
        if replayed > 0 {
            tracing::info!(
                from = %snapshot_seq,
                to = %state.seq,
                commits = replayed,
                "replayed WAL"
            );
        }

        Ok(Self {
            readers: ReadPermits::new(config.max_readers),
            pool: ByteBufferPool::new(config.pool_buffers_per_class),
            config,
            wal,
            snapshots,
            state: RwLock::new(Arc::new(state)),
            write_lock: Mutex::new(()),
            next_txid: AtomicU64::new(next_txid),
            stats: EnvStats::default(),
            is_open: RwLock::new(true),
        })
    }

    /// Returns the handle of database `name`, creating it if needed.
    pub fn open_db(&self, name: &str) -> EnvResult<Dbi> {
        self.ensure_open()?;
        if let Some(dbi) = self.state.read().find(name) {
            return Ok(dbi);
        }
        self.write(|txn| txn.open_db(name))
    }

    /// Returns the handle of database `name` if it exists.
    #[must_use]
    pub fn find_db(&self, name: &str) -> Option<Dbi> {
        self.state.read().find(name)
    }

    /// Names of every database, in handle order.
    #[must_use]
    pub fn db_names(&self) -> Vec<String> {
        self.state
            .read()
            .dbs
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Starts a read transaction, waiting for a reader slot if all are
    /// taken.
    pub fn begin_read(&self) -> EnvResult<ReadTxn<'_>> {
        self.ensure_open()?;
        let permit = self.readers.acquire();
        let state = Arc::clone(&self.state.read());
        self.stats.record_read_txn();
        Ok(ReadTxn::new(state, permit))
    }

    /// Starts the write transaction, waiting for the current writer to
    /// finish.
    pub fn begin_write(&self) -> EnvResult<WriteTxn<'_>> {
        self.ensure_open()?;
        let guard = self.write_lock.lock();
        let txid = TxnId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let base = Arc::clone(&self.state.read());
        Ok(WriteTxn::new(self, guard, txid, base))
    }

    /// Starts a batching writer that commits every `batch_size` units of
    /// work.
    pub fn begin_batch(&self, batch_size: usize) -> BatchingWriteTxn<'_> {
        BatchingWriteTxn::new(self, batch_size)
    }

    /// Runs `f` in a read transaction.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T, E>,
        E: From<EnvError>,
    {
        let txn = self.begin_read()?;
        f(&txn)
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok` and
    /// aborting otherwise.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T, E>,
        E: From<EnvError>,
    {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort();
                Err(err)
            }
        }
    }

    /// Removes every key of `dbi` in its own transaction.
    pub fn clear(&self, dbi: Dbi) -> EnvResult<()> {
        self.write(|txn| txn.clear(dbi))
    }

    /// Number of keys committed to `dbi`.
    pub fn count(&self, dbi: Dbi) -> EnvResult<u64> {
        self.read(|txn| txn.count(dbi))
    }

    /// Writes a snapshot of the committed state and empties the log.
    pub fn sync(&self) -> EnvResult<()> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock();
        self.checkpoint_locked()
    }

    /// Caller holds the write lock.
    fn checkpoint_locked(&self) -> EnvResult<()> {
        let state = Arc::clone(&self.state.read());
        let data = snapshot::encode(&state, self.next_txid.load(Ordering::SeqCst))?;
        self.snapshots.save(&data)?;
        let wal_size = self.wal.size()?;
        self.wal.truncate(0)?;
        self.wal.sync()?;
        self.stats.record_checkpoint();
        tracing::info!(
            seq = %state.seq,
            snapshot_bytes = data.len(),
            wal_bytes = wal_size,
            "checkpoint written"
        );
        Ok(())
    }

    /// Called by a committing writer that still holds the write lock.
    pub(crate) fn maybe_checkpoint(&self) {
        let limit = self.config.max_wal_size;
        if limit == 0 {
            return;
        }
        match self.wal.size() {
            Ok(size) if size > limit => {
                if let Err(err) = self.checkpoint_locked() {
                    tracing::warn!(error = %err, wal_bytes = size, "automatic checkpoint failed");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "could not read WAL size"),
        }
    }

    /// Publishes a logged commit. Caller holds the write lock.
    pub(crate) fn apply(
        &self,
        seq: SeqNo,
        created: Vec<String>,
        overlays: BTreeMap<u32, DbOverlay>,
    ) -> EnvResult<(u64, u64)> {
        let (mut puts, mut deletes) = (0, 0);
        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        for name in created {
            state.dbs.push(Arc::new(DbTable::new(name)));
        }
        for (dbi, overlay) in overlays {
            let table = state.table_mut(dbi)?;
            if overlay.cleared {
                table.clear();
            }
            for (key, value) in overlay.entries {
                match value {
                    Some(value) => {
                        table.put(key, value);
                        puts += 1;
                    }
                    None => {
                        table.delete(&key);
                        deletes += 1;
                    }
                }
            }
        }
        state.seq = seq;
        Ok((puts, deletes))
    }

    /// Sequence of the last commit.
    #[must_use]
    pub fn committed_seq(&self) -> SeqNo {
        self.state.read().seq
    }

    /// Environment-wide figures.
    pub fn info(&self) -> EnvResult<EnvInfo> {
        let state = Arc::clone(&self.state.read());
        let databases = state
            .dbs
            .iter()
            .enumerate()
            .map(|(i, table)| DbInfo {
                name: table.name.clone(),
                dbi: Dbi(i as u32),
                entries: table.entries.len() as u64,
                bytes: table.bytes,
            })
            .collect();
        Ok(EnvInfo {
            path: self.path().map(Path::to_path_buf),
            committed_seq: state.seq,
            used_bytes: state.used_bytes(),
            map_size: self.config.map_size,
            wal_size: self.wal.size()?,
            max_readers: self.readers.max(),
            readers_in_use: self.readers.max() - self.readers.available(),
            databases,
        })
    }

    /// Bytes held by the log and snapshot.
    pub fn size_on_disk(&self) -> EnvResult<u64> {
        match self.snapshots.dir() {
            Some(dir) => dir.size_on_disk(),
            None => Ok(self.wal.size()? + self.snapshots.size()?),
        }
    }

    /// Longest key accepted by `put`.
    #[must_use]
    pub const fn max_key_size(&self) -> usize {
        MAX_KEY_SIZE
    }

    /// Reader slots free right now.
    #[must_use]
    pub fn available_read_permits(&self) -> usize {
        self.readers.available()
    }

    /// Directory, for file-backed environments.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.snapshots.path()
    }

    /// Configuration the environment was opened with.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Pool of scratch buffers for encoding keys and values.
    #[must_use]
    pub fn buffer_pool(&self) -> &ByteBufferPool {
        &self.pool
    }

    pub(crate) fn stats(&self) -> &EnvStats {
        &self.stats
    }

    /// Transaction counters.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn wal(&self) -> &WalWriter {
        &self.wal
    }

    /// Flushes the log and refuses further transactions.
    ///
    /// Waits for a running write transaction to finish. Closing twice is a
    /// no-op.
    pub fn close(&self) -> EnvResult<()> {
        let _guard = self.write_lock.lock();
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        if self.config.sync_on_commit {
            self.wal.sync()?;
        } else {
            self.wal.flush()?;
        }
        *is_open = false;
        tracing::debug!(seq = %self.committed_seq(), "environment closed");
        Ok(())
    }

    /// Closes the environment and removes its files.
    pub fn delete(self) -> EnvResult<()> {
        let path = self.path().map(Path::to_path_buf);
        self.close()?;
        // Releases the directory lock
        drop(self);
        if let Some(path) = path {
            std::fs::remove_dir_all(&path)?;
            tracing::info!(path = %path.display(), "environment deleted");
        }
        Ok(())
    }

    /// Returns true until [`Env::close`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    pub(crate) fn ensure_open(&self) -> EnvResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(EnvError::EnvClosed)
        }
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("path", &self.path())
            .field("seq", &self.committed_seq())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::Direction;
    use proxyrepo_storage::StorageBackend;
    use std::ops::Bound;
    use std::thread;
    use tempfile::tempdir;

    fn memory_env() -> Env {
        Env::open_in_memory(EnvConfig::default()).unwrap()
    }

    #[test]
    fn committed_writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env");
        {
            let env = Env::open(&path, EnvConfig::default()).unwrap();
            let db = env.open_db("items").unwrap();
            env.write(|txn| {
                txn.put(db, b"a", b"1")?;
                txn.put(db, b"b", b"2")
            })
            .unwrap();
            env.write(|txn| txn.delete(db, b"a").map(drop)).unwrap();
        }

        let env = Env::open(&path, EnvConfig::default()).unwrap();
        let db = env.find_db("items").unwrap();
        let txn = env.begin_read().unwrap();
        assert_eq!(txn.get(db, b"a").unwrap(), None);
        assert_eq!(txn.get(db, b"b").unwrap(), Some(&b"2"[..]));
        assert_eq!(env.committed_seq(), SeqNo::new(3));
    }

    #[test]
    fn state_after_checkpoint_and_more_commits_is_recovered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env");
        {
            let env = Env::open(&path, EnvConfig::default()).unwrap();
            let db = env.open_db("items").unwrap();
            env.write(|txn| txn.put(db, b"before", b"x")).unwrap();
            env.sync().unwrap();
            assert_eq!(env.info().unwrap().wal_size, 0);
            env.write(|txn| txn.put(db, b"after", b"y")).unwrap();
        }

        let env = Env::open(&path, EnvConfig::default()).unwrap();
        let db = env.find_db("items").unwrap();
        assert_eq!(env.count(db).unwrap(), 2);
    }

    #[test]
    fn torn_wal_tail_is_dropped_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env");
        {
            let env = Env::open(&path, EnvConfig::default()).unwrap();
            let db = env.open_db("items").unwrap();
            env.write(|txn| txn.put(db, b"kept", b"1")).unwrap();
        }
        {
            let mut wal = FileBackend::open(&path.join("wal.log")).unwrap();
            wal.append(b"PRWL\x00\x01\x02").unwrap();
        }

        let env = Env::open(&path, EnvConfig::default()).unwrap();
        let db = env.find_db("items").unwrap();
        assert_eq!(env.count(db).unwrap(), 1);
        let db2 = env.open_db("more").unwrap();
        env.write(|txn| txn.put(db2, b"k", b"v")).unwrap();
        drop(env);

        let env = Env::open(&path, EnvConfig::default()).unwrap();
        assert_eq!(env.db_names(), vec!["items".to_string(), "more".to_string()]);
    }

    #[test]
    fn second_handle_on_same_directory_is_refused() {
        let dir = tempdir().unwrap();
        let _env = Env::open(dir.path(), EnvConfig::default()).unwrap();
        let second = Env::open(dir.path(), EnvConfig::default());
        assert!(matches!(second, Err(EnvError::EnvLocked)));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();
        env.write(|txn| txn.put(db, b"k", b"old")).unwrap();

        let reader = env.begin_read().unwrap();
        env.write(|txn| {
            txn.put(db, b"k", b"new")?;
            txn.put(db, b"k2", b"x")
        })
        .unwrap();

        assert_eq!(reader.get(db, b"k").unwrap(), Some(&b"old"[..]));
        assert_eq!(reader.count(db).unwrap(), 1);
        let fresh = env.begin_read().unwrap();
        assert_eq!(fresh.get(db, b"k").unwrap(), Some(&b"new"[..]));
    }

    #[test]
    fn writer_sees_its_own_changes_and_abort_discards_them() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();

        let mut txn = env.begin_write().unwrap();
        txn.put(db, b"k", b"v").unwrap();
        assert_eq!(txn.get(db, b"k").unwrap(), Some(&b"v"[..]));
        txn.abort();

        assert_eq!(env.count(db).unwrap(), 0);
        assert_eq!(env.stats_snapshot().aborts, 1);
    }

    #[test]
    fn failing_closure_aborts() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();
        let result: EnvResult<()> = env.write(|txn| {
            txn.put(db, b"k", b"v")?;
            Err(EnvError::invalid_operation("stop"))
        });
        assert!(result.is_err());
        assert_eq!(env.count(db).unwrap(), 0);
    }

    #[test]
    fn key_size_limits() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();
        let long = vec![7u8; MAX_KEY_SIZE + 1];
        let mut txn = env.begin_write().unwrap();
        assert!(matches!(
            txn.put(db, &long, b""),
            Err(EnvError::InvalidKeySize { len: 512, max: 511 })
        ));
        assert!(matches!(
            txn.put(db, b"", b""),
            Err(EnvError::InvalidKeySize { len: 0, .. })
        ));
        txn.put(db, &long[..MAX_KEY_SIZE], b"").unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn map_size_bounds_data() {
        let env = Env::open_in_memory(EnvConfig::default().map_size(64)).unwrap();
        let db = env.open_db("items").unwrap();
        env.write(|txn| txn.put(db, b"k", &[0u8; 40])).unwrap();

        let result = env.write(|txn| txn.put(db, b"k2", &[0u8; 40]));
        assert!(matches!(result, Err(EnvError::MapFull { .. })));

        // Overwriting shrinks, so it fits
        env.write(|txn| txn.put(db, b"k", &[0u8; 10])).unwrap();
        env.write(|txn| txn.put(db, b"k2", &[0u8; 40])).unwrap();
    }

    #[test]
    fn clear_and_count() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();
        env.write(|txn| {
            for i in 0u8..10 {
                txn.put(db, &[i + 1], b"v")?;
            }
            Ok::<_, EnvError>(())
        })
        .unwrap();
        assert_eq!(env.count(db).unwrap(), 10);
        env.clear(db).unwrap();
        assert_eq!(env.count(db).unwrap(), 0);
    }

    #[test]
    fn iteration_follows_byte_order() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();
        env.write(|txn| {
            for key in [&b"b"[..], b"a", b"ab", b"c"] {
                txn.put(db, key, key)?;
            }
            Ok::<_, EnvError>(())
        })
        .unwrap();

        let txn = env.begin_read().unwrap();
        let keys: Vec<&[u8]> = txn.iter(db).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"a"[..], b"ab", b"b", b"c"]);

        let back: Vec<&[u8]> = txn
            .iter_from(db, Bound::Excluded(&b"b"[..]), Direction::Backward)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(back, vec![&b"ab"[..], b"a"]);
        assert_eq!(txn.scan_prefix(db, b"a").unwrap().count(), 2);
    }

    #[test]
    fn unknown_dbi_is_rejected() {
        let env = memory_env();
        let db = env.open_db("items").unwrap();
        let other = Env::open_in_memory(EnvConfig::default()).unwrap();
        let txn = other.begin_read().unwrap();
        assert!(matches!(
            txn.get(db, b"k"),
            Err(EnvError::DbNotFound { dbi: 0 })
        ));
    }

    #[test]
    fn wal_growth_triggers_checkpoint() {
        let env = Env::open_in_memory(EnvConfig::default().max_wal_size(256)).unwrap();
        let db = env.open_db("items").unwrap();
        for i in 0u32..20 {
            env.write(|txn| txn.put(db, &i.to_be_bytes(), &[1u8; 32]))
                .unwrap();
        }
        assert!(env.stats_snapshot().checkpoints > 0);
        assert!(env.info().unwrap().wal_size <= 256);
        assert_eq!(env.count(db).unwrap(), 20);
    }

    #[test]
    fn writers_serialize_across_threads() {
        let env = Arc::new(memory_env());
        let db = env.open_db("counter").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let env = Arc::clone(&env);
                thread::spawn(move || {
                    for _ in 0..50 {
                        env.write(|txn| {
                            let current = txn
                                .get(db, b"n")?
                                .map(|v| u64::from_be_bytes(v.try_into().unwrap()))
                                .unwrap_or(0);
                            txn.put(db, b"n", &(current + 1).to_be_bytes())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let txn = env.begin_read().unwrap();
        let value = txn.get(db, b"n").unwrap().unwrap();
        assert_eq!(u64::from_be_bytes(value.try_into().unwrap()), 200);
    }

    #[test]
    fn closed_env_refuses_transactions() {
        let env = memory_env();
        env.close().unwrap();
        assert!(matches!(env.begin_read(), Err(EnvError::EnvClosed)));
        assert!(matches!(env.begin_write(), Err(EnvError::EnvClosed)));
        env.close().unwrap();
    }

    #[test]
    fn delete_removes_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env");
        let env = Env::open(&path, EnvConfig::default()).unwrap();
        env.open_db("items").unwrap();
        env.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn info_reports_databases() {
        let env = memory_env();
        let a = env.open_db("a").unwrap();
        env.open_db("b").unwrap();
        env.write(|txn| txn.put(a, b"key", b"value")).unwrap();

        let info = env.info().unwrap();
        assert_eq!(info.databases.len(), 2);
        assert_eq!(info.databases[0].entries, 1);
        assert_eq!(info.used_bytes, 8);
        assert_eq!(info.readers_in_use, 0);
    }
}

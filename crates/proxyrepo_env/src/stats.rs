//! Environment counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated as transactions run.
#[derive(Debug, Default)]
pub struct EnvStats {
    read_txns: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    wal_bytes: AtomicU64,
    checkpoints: AtomicU64,
}

impl EnvStats {
    pub(crate) fn record_read_txn(&self) {
        self.read_txns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, puts: u64, deletes: u64, wal_bytes: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.puts.fetch_add(puts, Ordering::Relaxed);
        self.deletes.fetch_add(deletes, Ordering::Relaxed);
        self.wal_bytes.fetch_add(wal_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_txns: self.read_txns.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            wal_bytes: self.wal_bytes.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EnvStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Read transactions started.
    pub read_txns: u64,
    /// Write transactions committed with changes.
    pub commits: u64,
    /// Write transactions aborted or dropped.
    pub aborts: u64,
    /// Keys written.
    pub puts: u64,
    /// Keys deleted.
    pub deletes: u64,
    /// Bytes appended to the WAL.
    pub wal_bytes: u64,
    /// Checkpoints taken.
    pub checkpoints: u64,
}

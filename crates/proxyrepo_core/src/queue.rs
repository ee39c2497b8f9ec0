//! Durable FIFO queues of ids over an ordered database.
//!
//! Each queue is one database whose keys are 8-byte big-endian ids with
//! empty values, so the first key is always the oldest id. Taking an id is
//! a single-key delete inside a write transaction; blocking takes wait on a
//! condition variable that every producer signals after it commits.

use crate::error::RepoResult;
use parking_lot::{Condvar, Mutex};
use proxyrepo_codec::{decode_u64_key, encode_u64_key};
use proxyrepo_env::{Dbi, Env, Txn, WriteTxn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A durable, ordered queue of `u64` ids.
///
/// Ids come out in ascending order and each id is delivered once. Putting
/// an id that is already queued is a no-op.
///
/// The `*_in` methods join a caller's write transaction. A caller that
/// queued ids that way must call [`OrderedQueue::notify`] after the commit
/// so blocked consumers wake up. `notify` must never run while a write
/// transaction is open on the same thread.
pub struct OrderedQueue {
    env: Arc<Env>,
    dbi: Dbi,
    name: String,
    signal: Mutex<()>,
    available: Condvar,
}

impl OrderedQueue {
    /// Opens (creating if needed) the queue stored in database `name`.
    pub fn open(env: Arc<Env>, name: &str) -> RepoResult<Self> {
        let dbi = env.open_db(name)?;
        Ok(Self {
            env,
            dbi,
            name: name.to_string(),
            signal: Mutex::new(()),
            available: Condvar::new(),
        })
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database handle.
    #[must_use]
    pub fn dbi(&self) -> Dbi {
        self.dbi
    }

    /// Queues `id`. Returns false if it was already queued.
    pub fn put(&self, id: u64) -> RepoResult<bool> {
        let added = self.env.write(|txn| self.put_in(txn, id))?;
        if added {
            self.notify();
        }
        Ok(added)
    }

    /// Queues every id in one transaction. Returns how many were new.
    pub fn put_all(&self, ids: impl IntoIterator<Item = u64>) -> RepoResult<usize> {
        let added = self.env.write(|txn| {
            let mut added = 0;
            for id in ids {
                if self.put_in(txn, id)? {
                    added += 1;
                }
            }
            Ok::<_, crate::RepoError>(added)
        })?;
        if added > 0 {
            self.notify();
        }
        Ok(added)
    }

    /// Queues `id` inside `txn`.
    pub fn put_in(&self, txn: &mut WriteTxn<'_>, id: u64) -> RepoResult<bool> {
        Ok(txn.put_if_absent(self.dbi, &encode_u64_key(id), &[])?)
    }

    /// Removes `id` inside `txn`. Returns whether it was queued.
    pub fn remove_in(&self, txn: &mut WriteTxn<'_>, id: u64) -> RepoResult<bool> {
        Ok(txn.delete(self.dbi, &encode_u64_key(id))?)
    }

    /// Pops the oldest id inside `txn`.
    pub fn take_in(&self, txn: &mut WriteTxn<'_>) -> RepoResult<Option<u64>> {
        let id = match txn.first(self.dbi)? {
            Some((key, _)) => decode_u64_key(key)?,
            None => return Ok(None),
        };
        txn.delete(self.dbi, &encode_u64_key(id))?;
        Ok(Some(id))
    }

    /// Returns true if `id` is queued as of `txn`.
    pub fn contains_in<T: Txn>(&self, txn: &T, id: u64) -> RepoResult<bool> {
        Ok(txn.contains(self.dbi, &encode_u64_key(id))?)
    }

    /// Every queued id as of `txn`, oldest first.
    pub fn ids_in<T: Txn>(&self, txn: &T) -> RepoResult<Vec<u64>> {
        txn.iter(self.dbi)?
            .map(|(key, _)| decode_u64_key(key).map_err(Into::into))
            .collect()
    }

    /// Wakes consumers blocked in [`OrderedQueue::take`].
    pub fn notify(&self) {
        let _guard = self.signal.lock();
        self.available.notify_all();
    }

    /// Pops the oldest id without waiting.
    pub fn try_take(&self) -> RepoResult<Option<u64>> {
        self.env.write(|txn| self.take_in(txn))
    }

    /// Pops the oldest id, waiting up to `timeout` for one to arrive.
    ///
    /// The emptiness check and the delete happen in the same transaction,
    /// so an id taken by a racing consumer is never returned twice. A
    /// timeout too large to form a deadline waits without one.
    pub fn take(&self, timeout: Duration) -> RepoResult<Option<u64>> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(id) = self.try_take()? {
                return Ok(Some(id));
            }
            let mut guard = self.signal.lock();
            // A put that committed before we took the lock is visible here;
            // one that commits later has to wait for us to sleep to notify.
            if !self.is_empty()? {
                continue;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut guard, deadline).timed_out() {
                        drop(guard);
                        return self.try_take();
                    }
                }
                None => self.available.wait(&mut guard),
            }
        }
    }

    /// Smallest queued id.
    pub fn min_id(&self) -> RepoResult<Option<u64>> {
        let txn = self.env.begin_read()?;
        match txn.first(self.dbi)? {
            Some((key, _)) => Ok(Some(decode_u64_key(key)?)),
            None => Ok(None),
        }
    }

    /// Largest queued id.
    pub fn max_id(&self) -> RepoResult<Option<u64>> {
        let txn = self.env.begin_read()?;
        match txn.last(self.dbi)? {
            Some((key, _)) => Ok(Some(decode_u64_key(key)?)),
            None => Ok(None),
        }
    }

    /// Number of queued ids.
    pub fn count(&self) -> RepoResult<u64> {
        Ok(self.env.count(self.dbi)?)
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> RepoResult<bool> {
        let txn = self.env.begin_read()?;
        Ok(txn.first(self.dbi)?.is_none())
    }

    /// Removes every id.
    pub fn clear(&self) -> RepoResult<()> {
        self.env.clear(self.dbi)?;
        tracing::debug!(queue = %self.name, "queue cleared");
        Ok(())
    }
}

impl std::fmt::Debug for OrderedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedQueue")
            .field("name", &self.name)
            .field("dbi", &self.dbi)
            .finish()
    }
}

//! Batching many small units of work into fewer commits.

use crate::env::Env;
use crate::error::{EnvError, EnvResult};
use crate::txn::WriteTxn;

/// Runs units of work in a shared write transaction, committing after
/// every `batch_size` of them.
///
/// The writer lock is held while a batch is open, so other writers wait
/// until [`BatchingWriteTxn::commit`] or the batch fills. Dropping it
/// discards the open batch.
pub struct BatchingWriteTxn<'env> {
    env: &'env Env,
    txn: Option<WriteTxn<'env>>,
    batch_size: usize,
    pending: usize,
    batches: u64,
}

impl<'env> BatchingWriteTxn<'env> {
    pub(crate) fn new(env: &'env Env, batch_size: usize) -> Self {
        Self {
            env,
            txn: None,
            batch_size: batch_size.max(1),
            pending: 0,
            batches: 0,
        }
    }

    /// Runs `work` in the open batch, starting one if needed.
    ///
    /// If `work` fails the whole open batch is aborted, including earlier
    /// units that succeeded.
    pub fn process<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTxn<'env>) -> Result<T, E>,
        E: From<EnvError>,
    {
        let txn = match self.txn.take() {
            Some(txn) => txn,
            None => self.env.begin_write()?,
        };
        let txn = self.txn.insert(txn);
        match work(txn) {
            Ok(value) => {
                self.pending += 1;
                if self.pending >= self.batch_size {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    /// Commits the open batch, if any.
    pub fn commit(&mut self) -> EnvResult<()> {
        if let Some(txn) = self.txn.take() {
            let units = self.pending;
            self.pending = 0;
            let seq = txn.commit()?;
            self.batches += 1;
            tracing::trace!(%seq, units, "batch committed");
        }
        Ok(())
    }

    /// Discards the open batch, if any.
    pub fn abort(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
        self.pending = 0;
    }

    /// Units of work in the open batch.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Batches committed so far.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches
    }
}

impl std::fmt::Debug for BatchingWriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingWriteTxn")
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending)
            .field("batches", &self.batches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Env, EnvConfig, EnvError, Txn};

    #[test]
    fn commits_every_batch_size_units() {
        let env = Env::open_in_memory(EnvConfig::default()).unwrap();
        let db = env.open_db("items").unwrap();
        let start = env.committed_seq();

        let mut batch = env.begin_batch(4);
        for i in 0u8..10 {
            batch
                .process(|txn| txn.put(db, &[i + 1], b"v"))
                .unwrap();
        }
        assert_eq!(batch.batches(), 2);
        assert_eq!(batch.pending(), 2);
        batch.commit().unwrap();
        drop(batch);

        assert_eq!(env.committed_seq().as_u64(), start.as_u64() + 3);
        assert_eq!(env.count(db).unwrap(), 10);
    }

    #[test]
    fn failed_unit_discards_open_batch() {
        let env = Env::open_in_memory(EnvConfig::default()).unwrap();
        let db = env.open_db("items").unwrap();

        let mut batch = env.begin_batch(100);
        batch.process(|txn| txn.put(db, b"a", b"1")).unwrap();
        let failed: Result<(), EnvError> = batch.process(|txn| {
            txn.put(db, b"b", b"2")?;
            Err(EnvError::invalid_operation("nope"))
        });
        assert!(failed.is_err());
        batch.process(|txn| txn.put(db, b"c", b"3")).unwrap();
        drop(batch);

        let txn = env.begin_read().unwrap();
        assert_eq!(txn.count(db).unwrap(), 0);
    }
}

//! Sources: received files admitted to the repository.
//!
//! A source moves through three queues. `add_source` puts it on the new
//! queue for examination; `set_source_examined` moves it to the examined
//! queue, or straight to the deletable queue when it holds no items; the
//! forwarder pushes it to the deletable queue once every item has been
//! forwarded.

use crate::error::{RepoError, RepoResult};
use crate::queue::OrderedQueue;
use crate::schema::Schema;
use crate::source_item::SourceItemDao;
use bytes::BytesMut;
use proxyrepo_codec::{
    encode_u64_key, BoolSerde, IntSerde, KeyReader, OptionalStringSerde, Serde, StringSerde,
};
use proxyrepo_env::{Env, Txn, WriteTxn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSource {
    /// Primary key, increasing with admission order.
    pub file_store_id: u64,
    /// Feed named by the sender.
    pub feed_name: String,
    /// Original file name, if known.
    pub file_name: Option<String>,
    /// Item count reported at examination.
    pub item_count: u32,
    /// Set once the source has been examined.
    pub examined: bool,
    /// Items whose aggregate has not been forwarded yet.
    pub outstanding: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct SourceRowSerde;

impl Serde<RepoSource> for SourceRowSerde {
    fn write(&self, source: &RepoSource, buf: &mut BytesMut) {
        StringSerde.write(&source.feed_name, buf);
        OptionalStringSerde.write(&source.file_name, buf);
        IntSerde::BIG_ENDIAN.write(&source.item_count, buf);
        BoolSerde.write(&source.examined, buf);
        IntSerde::BIG_ENDIAN.write(&source.outstanding, buf);
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> proxyrepo_codec::CodecResult<RepoSource> {
        Ok(RepoSource {
            file_store_id: 0,
            feed_name: StringSerde.read(reader)?,
            file_name: OptionalStringSerde.read(reader)?,
            item_count: IntSerde::BIG_ENDIAN.read(reader)?,
            examined: BoolSerde.read(reader)?,
            outstanding: IntSerde::BIG_ENDIAN.read(reader)?,
        })
    }
}

pub(crate) fn load_source_in<T: Txn>(
    txn: &T,
    schema: &Schema,
    file_store_id: u64,
) -> RepoResult<Option<RepoSource>> {
    match txn.get(schema.source, &encode_u64_key(file_store_id))? {
        Some(value) => {
            let mut source = SourceRowSerde.from_bytes(value)?;
            source.file_store_id = file_store_id;
            Ok(Some(source))
        }
        None => Ok(None),
    }
}

/// Source rows and the new, examined and deletable queues.
#[derive(Clone)]
pub struct SourceDao {
    env: Arc<Env>,
    schema: Schema,
    items: SourceItemDao,
    new_queue: Arc<OrderedQueue>,
    examined_queue: Arc<OrderedQueue>,
    deletable_queue: Arc<OrderedQueue>,
}

impl SourceDao {
    /// Creates a DAO over the given queues.
    pub fn new(
        env: Arc<Env>,
        schema: Schema,
        items: SourceItemDao,
        new_queue: Arc<OrderedQueue>,
        examined_queue: Arc<OrderedQueue>,
        deletable_queue: Arc<OrderedQueue>,
    ) -> Self {
        Self {
            env,
            schema,
            items,
            new_queue,
            examined_queue,
            deletable_queue,
        }
    }

    /// Writes `source` inside `txn`.
    pub fn put_in(&self, txn: &mut WriteTxn<'_>, source: &RepoSource) -> RepoResult<()> {
        let mut value = self.env.buffer_pool().acquire(32 + source.feed_name.len());
        SourceRowSerde.write(source, &mut value);
        txn.put(
            self.schema.source,
            &encode_u64_key(source.file_store_id),
            &value,
        )?;
        Ok(())
    }

    /// Loads a source as of `txn`.
    pub fn get_in<T: Txn>(&self, txn: &T, file_store_id: u64) -> RepoResult<Option<RepoSource>> {
        load_source_in(txn, &self.schema, file_store_id)
    }

    /// Registers a received file and queues it for examination.
    ///
    /// # Errors
    ///
    /// [`RepoError::DuplicateSource`] if the id is already registered.
    pub fn add_source(
        &self,
        file_store_id: u64,
        feed_name: &str,
        file_name: Option<&str>,
    ) -> RepoResult<RepoSource> {
        let source = RepoSource {
            file_store_id,
            feed_name: feed_name.to_string(),
            file_name: file_name.map(str::to_string),
            item_count: 0,
            examined: false,
            outstanding: 0,
        };
        self.env.write(|txn| -> RepoResult<()> {
            if txn.contains(self.schema.source, &encode_u64_key(file_store_id))? {
                return Err(RepoError::DuplicateSource { file_store_id });
            }
            self.put_in(txn, &source)?;
            self.new_queue.put_in(txn, file_store_id)?;
            Ok(())
        })?;
        self.new_queue.notify();
        tracing::debug!(file_store_id, feed = feed_name, "source added");
        Ok(source)
    }

    /// Loads a source.
    pub fn get_source(&self, file_store_id: u64) -> RepoResult<Option<RepoSource>> {
        let txn = self.env.begin_read()?;
        self.get_in(&txn, file_store_id)
    }

    /// Pops a source from `queue`, skipping ids whose row is gone.
    fn pop_source(&self, queue: &OrderedQueue, timeout: Duration) -> RepoResult<Option<RepoSource>> {
        loop {
            let Some(id) = queue.take(timeout)? else {
                return Ok(None);
            };
            match self.get_source(id)? {
                Some(source) => return Ok(Some(source)),
                None => {
                    tracing::warn!(file_store_id = id, queue = queue.name(), "queued source has no row");
                }
            }
        }
    }

    /// Pops the oldest source awaiting examination without waiting.
    pub fn get_next_source(&self) -> RepoResult<Option<RepoSource>> {
        self.pop_source(&self.new_queue, Duration::ZERO)
    }

    /// Pops the oldest source awaiting examination, waiting up to
    /// `timeout`.
    pub fn get_next_source_timeout(&self, timeout: Duration) -> RepoResult<Option<RepoSource>> {
        self.pop_source(&self.new_queue, timeout)
    }

    /// Records the examination result of a source.
    ///
    /// The source leaves the new queue. A source holding items goes on the
    /// examined queue for aggregation; one with none becomes deletable in
    /// the same commit.
    pub fn set_source_examined(&self, file_store_id: u64, item_count: u32) -> RepoResult<RepoSource> {
        let (source, deletable) = self.env.write(|txn| -> RepoResult<(RepoSource, bool)> {
            let mut source = self
                .get_in(&*txn, file_store_id)?
                .ok_or(RepoError::SourceNotFound { file_store_id })?;
            if source.examined {
                return Err(RepoError::SourceExamined { file_store_id });
            }

            let stored = self.items.items_in(&*txn, file_store_id)?.len() as u32;
            if stored != item_count {
                tracing::warn!(
                    file_store_id,
                    reported = item_count,
                    stored,
                    "item count mismatch"
                );
            }
            source.item_count = item_count;
            source.examined = true;
            source.outstanding = stored;
            self.put_in(txn, &source)?;

            self.new_queue.remove_in(txn, file_store_id)?;
            let deletable = stored == 0;
            if deletable {
                self.deletable_queue.put_in(txn, file_store_id)?;
            } else {
                self.examined_queue.put_in(txn, file_store_id)?;
            }
            Ok((source, deletable))
        })?;

        if deletable {
            self.deletable_queue.notify();
        } else {
            self.examined_queue.notify();
        }
        tracing::debug!(file_store_id, item_count, deletable, "source examined");
        Ok(source)
    }

    /// Takes one from `outstanding` after an aggregate holding one of the
    /// source's items was forwarded. Returns true if the source became
    /// deletable.
    pub fn release_item_in(&self, txn: &mut WriteTxn<'_>, file_store_id: u64) -> RepoResult<bool> {
        let Some(mut source) = self.get_in(&*txn, file_store_id)? else {
            tracing::warn!(file_store_id, "forwarded item belongs to a missing source");
            return Ok(false);
        };
        source.outstanding = source.outstanding.saturating_sub(1);
        self.put_in(txn, &source)?;
        if source.examined && source.outstanding == 0 {
            self.examined_queue.remove_in(txn, file_store_id)?;
            self.deletable_queue.put_in(txn, file_store_id)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Pops the oldest deletable source without waiting.
    pub fn get_deletable_source(&self) -> RepoResult<Option<RepoSource>> {
        self.pop_source(&self.deletable_queue, Duration::ZERO)
    }

    /// Pops the oldest deletable source, waiting up to `timeout`.
    pub fn get_deletable_source_timeout(&self, timeout: Duration) -> RepoResult<Option<RepoSource>> {
        self.pop_source(&self.deletable_queue, timeout)
    }

    /// Deletes a source, its items and its queue memberships.
    ///
    /// Returns `Ok(false)` if the source does not exist. The safety checks
    /// run inside the deleting transaction, so a source that was deletable
    /// when queued but gained references since is refused.
    ///
    /// # Errors
    ///
    /// [`RepoError::SourceInUse`] if the source is unexamined, has
    /// outstanding items, or any item is unclaimed or in an aggregate that
    /// has not been forwarded.
    pub fn delete_source(&self, file_store_id: u64) -> RepoResult<bool> {
        let deleted = self.env.write(|txn| -> RepoResult<Option<usize>> {
            let Some(source) = self.get_in(&*txn, file_store_id)? else {
                self.remove_from_queues_in(txn, file_store_id)?;
                return Ok(None);
            };
            if !source.examined {
                return Err(RepoError::source_in_use(file_store_id, "not examined"));
            }
            if source.outstanding > 0 {
                return Err(RepoError::source_in_use(
                    file_store_id,
                    format!("{} items outstanding", source.outstanding),
                ));
            }
            for item in self.items.items_in(&*txn, file_store_id)? {
                match item.aggregate_id {
                    None => {
                        return Err(RepoError::source_in_use(
                            file_store_id,
                            format!("item {} unclaimed", item.item_index),
                        ))
                    }
                    Some(aggregate_id)
                        if txn.contains(self.schema.aggregate, &encode_u64_key(aggregate_id))? =>
                    {
                        return Err(RepoError::source_in_use(
                            file_store_id,
                            format!("item {} in aggregate {aggregate_id}", item.item_index),
                        ))
                    }
                    Some(_) => {}
                }
            }

            let items = self.items.delete_all_in(txn, file_store_id)?;
            txn.delete(self.schema.source, &encode_u64_key(file_store_id))?;
            self.remove_from_queues_in(txn, file_store_id)?;
            Ok(Some(items))
        })?;

        match deleted {
            Some(items) => {
                tracing::debug!(file_store_id, items, "source deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_from_queues_in(&self, txn: &mut WriteTxn<'_>, file_store_id: u64) -> RepoResult<()> {
        self.new_queue.remove_in(txn, file_store_id)?;
        self.examined_queue.remove_in(txn, file_store_id)?;
        self.deletable_queue.remove_in(txn, file_store_id)?;
        Ok(())
    }

    /// Number of source rows.
    pub fn count_sources(&self) -> RepoResult<u64> {
        Ok(self.env.count(self.schema.source)?)
    }

    /// Number of sources queued for deletion.
    pub fn count_deletable_sources(&self) -> RepoResult<u64> {
        self.deletable_queue.count()
    }
}

impl std::fmt::Debug for SourceDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDao").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedKey;
    use crate::source_item::NewSourceItem;
    use crate::test_support::TestRig;

    #[test]
    fn added_source_is_next_to_examine() {
        let rig = TestRig::new();
        rig.sources.add_source(1, "test", Some("test")).unwrap();

        let source = rig.sources.get_next_source().unwrap().unwrap();
        assert_eq!(source.file_store_id, 1);
        assert_eq!(source.file_name.as_deref(), Some("test"));
        assert_eq!(rig.sources.count_sources().unwrap(), 1);
        assert!(rig.sources.get_next_source().unwrap().is_none());
    }

    #[test]
    fn duplicate_source_is_rejected() {
        let rig = TestRig::new();
        rig.sources.add_source(1, "test", None).unwrap();
        assert!(matches!(
            rig.sources.add_source(1, "test", None),
            Err(RepoError::DuplicateSource { file_store_id: 1 })
        ));
        assert_eq!(rig.sources.count_sources().unwrap(), 1);
    }

    #[test]
    fn empty_source_is_deletable_on_examine() {
        let rig = TestRig::new();
        rig.sources.add_source(4, "test", None).unwrap();
        let source = rig.sources.set_source_examined(4, 0).unwrap();
        assert!(source.examined);
        assert_eq!(rig.sources.count_deletable_sources().unwrap(), 1);

        let deletable = rig.sources.get_deletable_source().unwrap().unwrap();
        assert_eq!(deletable.file_store_id, 4);
        assert!(rig.sources.delete_source(4).unwrap());
        assert_eq!(rig.sources.count_sources().unwrap(), 0);
    }

    #[test]
    fn examined_source_with_items_waits_for_aggregation() {
        let rig = TestRig::new();
        rig.sources.add_source(1, "test", None).unwrap();
        rig.items
            .add_item(1, NewSourceItem::new("a", FeedKey::new("F", "Raw Events"), 5))
            .unwrap();
        let source = rig.sources.set_source_examined(1, 1).unwrap();
        assert_eq!(source.outstanding, 1);
        assert_eq!(rig.sources.count_deletable_sources().unwrap(), 0);
        assert!(rig.sources.get_next_source().unwrap().is_none());
        assert!(matches!(
            rig.sources.set_source_examined(1, 1),
            Err(RepoError::SourceExamined { .. })
        ));
    }

    #[test]
    fn unexamined_source_cannot_be_deleted() {
        let rig = TestRig::new();
        rig.sources.add_source(1, "test", None).unwrap();
        assert!(matches!(
            rig.sources.delete_source(1),
            Err(RepoError::SourceInUse { .. })
        ));
        assert!(!rig.sources.delete_source(2).unwrap());
    }

    #[test]
    fn blocking_get_waits_for_new_source() {
        let rig = TestRig::new();
        let sources = rig.sources.clone();
        let waiter = std::thread::spawn(move || {
            sources
                .get_next_source_timeout(Duration::from_secs(10))
                .unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        rig.sources.add_source(8, "test", None).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap().file_store_id, 8);
    }

    #[test]
    fn blocking_deletable_get_waits_for_examined_empty_source() {
        let rig = TestRig::new();
        assert!(rig
            .sources
            .get_deletable_source_timeout(Duration::from_millis(10))
            .unwrap()
            .is_none());

        rig.sources.add_source(3, "test", None).unwrap();
        let sources = rig.sources.clone();
        let waiter = std::thread::spawn(move || {
            sources
                .get_deletable_source_timeout(Duration::from_secs(10))
                .unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        rig.sources.set_source_examined(3, 0).unwrap();

        let deletable = waiter.join().unwrap().unwrap();
        assert_eq!(deletable.file_store_id, 3);
        assert!(deletable.examined);
        assert_eq!(rig.sources.count_deletable_sources().unwrap(), 0);
    }
}

//! Items: the feed-attributed streams inside a source.

use crate::error::{RepoError, RepoResult};
use crate::feed::{FeedKey, FeedResolver};
use crate::schema::Schema;
use bytes::BytesMut;
use proxyrepo_codec::{
    IntSerde, KeyReader, LongSerde, NullableIdSerde, OptionalStringSerde, PairSerde, Serde,
    StringSerde,
};
use proxyrepo_env::{Direction, Env, Txn, WriteTxn};
use serde::Serialize;
use std::ops::Bound;
use std::sync::Arc;

const ITEM_KEY_SERDE: PairSerde<LongSerde, IntSerde> =
    PairSerde::new(LongSerde::BIG_ENDIAN, IntSerde::BIG_ENDIAN);

pub(crate) fn item_key(file_store_id: u64, item_index: u32) -> BytesMut {
    ITEM_KEY_SERDE.to_bytes(&(file_store_id, item_index))
}

/// One item row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSourceItem {
    /// Owning source.
    pub file_store_id: u64,
    /// Position within the source.
    pub item_index: u32,
    /// Entry name inside the source file.
    pub name: String,
    /// Resolved feed.
    pub feed_id: u32,
    /// Aggregate that claimed the item, `None` while unclaimed.
    pub aggregate_id: Option<u64>,
    /// Uncompressed size.
    pub total_size_bytes: u64,
    /// File extension of the entry, if any.
    pub extension: Option<String>,
}

/// Value layout of an item row.
#[derive(Debug, Clone, Copy, Default)]
struct ItemRowSerde;

impl Serde<RepoSourceItem> for ItemRowSerde {
    fn write(&self, item: &RepoSourceItem, buf: &mut BytesMut) {
        StringSerde.write(&item.name, buf);
        IntSerde::BIG_ENDIAN.write(&item.feed_id, buf);
        NullableIdSerde.write(&item.aggregate_id, buf);
        LongSerde::BIG_ENDIAN.write(&item.total_size_bytes, buf);
        OptionalStringSerde.write(&item.extension, buf);
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> proxyrepo_codec::CodecResult<RepoSourceItem> {
        Ok(RepoSourceItem {
            file_store_id: 0,
            item_index: 0,
            name: StringSerde.read(reader)?,
            feed_id: IntSerde::BIG_ENDIAN.read(reader)?,
            aggregate_id: NullableIdSerde.read(reader)?,
            total_size_bytes: LongSerde::BIG_ENDIAN.read(reader)?,
            extension: OptionalStringSerde.read(reader)?,
        })
    }
}

fn decode_item(key: &[u8], value: &[u8]) -> RepoResult<RepoSourceItem> {
    let (file_store_id, item_index) = ITEM_KEY_SERDE.from_bytes(key)?;
    let mut item = ItemRowSerde.from_bytes(value)?;
    item.file_store_id = file_store_id;
    item.item_index = item_index;
    Ok(item)
}

/// How a new item names its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRef {
    /// Already resolved.
    Id(u32),
    /// Resolved through the feed DAO when the item is added.
    Key(FeedKey),
}

impl From<u32> for FeedRef {
    fn from(id: u32) -> Self {
        Self::Id(id)
    }
}

impl From<FeedKey> for FeedRef {
    fn from(key: FeedKey) -> Self {
        Self::Key(key)
    }
}

/// An item about to be added to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSourceItem {
    /// Entry name.
    pub name: String,
    /// Feed of the entry.
    pub feed: FeedRef,
    /// Uncompressed size.
    pub total_size_bytes: u64,
    /// File extension, if any.
    pub extension: Option<String>,
}

impl NewSourceItem {
    /// Creates an item without an extension.
    pub fn new(name: impl Into<String>, feed: impl Into<FeedRef>, total_size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            feed: feed.into(),
            total_size_bytes,
            extension: None,
        }
    }

    /// Sets the extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }
}

/// Item rows, keyed by `(file_store_id, item_index)`.
#[derive(Clone)]
pub struct SourceItemDao {
    env: Arc<Env>,
    schema: Schema,
    feeds: Arc<dyn FeedResolver>,
}

impl SourceItemDao {
    /// Creates a DAO resolving feeds through `feeds`.
    pub fn new(env: Arc<Env>, schema: Schema, feeds: Arc<dyn FeedResolver>) -> Self {
        Self { env, schema, feeds }
    }

    /// Appends an item to an unexamined source, giving it the next index.
    ///
    /// # Errors
    ///
    /// [`RepoError::SourceNotFound`] or [`RepoError::SourceExamined`].
    pub fn add_item(&self, file_store_id: u64, item: NewSourceItem) -> RepoResult<RepoSourceItem> {
        // Resolving may register the feed in its own transaction
        let feed_id = match item.feed {
            FeedRef::Id(id) => id,
            FeedRef::Key(ref key) => self.feeds.get_id(key)?,
        };

        let added = self.env.write(|txn| -> RepoResult<RepoSourceItem> {
            let source = crate::source::load_source_in(&*txn, &self.schema, file_store_id)?
                .ok_or(RepoError::SourceNotFound { file_store_id })?;
            if source.examined {
                return Err(RepoError::SourceExamined { file_store_id });
            }
            let item_index = match self.last_index_in(&*txn, file_store_id)? {
                Some(last) => last + 1,
                None => 0,
            };
            let row = RepoSourceItem {
                file_store_id,
                item_index,
                name: item.name,
                feed_id,
                aggregate_id: None,
                total_size_bytes: item.total_size_bytes,
                extension: item.extension,
            };
            self.put_in(txn, &row)?;
            Ok(row)
        })?;
        tracing::trace!(
            file_store_id,
            item_index = added.item_index,
            feed_id,
            "added item"
        );
        Ok(added)
    }

    fn last_index_in<T: Txn>(&self, txn: &T, file_store_id: u64) -> RepoResult<Option<u32>> {
        let upper = item_key(file_store_id, u32::MAX);
        let mut entries = txn.iter_from(
            self.schema.source_item,
            Bound::Included(&upper[..]),
            Direction::Backward,
        )?;
        match entries.next() {
            Some((key, _)) => {
                let (owner, index) = ITEM_KEY_SERDE.from_bytes(key)?;
                Ok((owner == file_store_id).then_some(index))
            }
            None => Ok(None),
        }
    }

    /// Writes `item` inside `txn`.
    pub fn put_in(&self, txn: &mut WriteTxn<'_>, item: &RepoSourceItem) -> RepoResult<()> {
        let mut value = self.env.buffer_pool().acquire(64 + item.name.len());
        ItemRowSerde.write(item, &mut value);
        txn.put(
            self.schema.source_item,
            &item_key(item.file_store_id, item.item_index),
            &value,
        )?;
        Ok(())
    }

    /// Loads one item as of `txn`.
    pub fn get_in<T: Txn>(
        &self,
        txn: &T,
        file_store_id: u64,
        item_index: u32,
    ) -> RepoResult<Option<RepoSourceItem>> {
        let key = item_key(file_store_id, item_index);
        match txn.get(self.schema.source_item, &key)? {
            Some(value) => Ok(Some(decode_item(&key, value)?)),
            None => Ok(None),
        }
    }

    /// Every item of a source as of `txn`, in index order.
    pub fn items_in<T: Txn>(&self, txn: &T, file_store_id: u64) -> RepoResult<Vec<RepoSourceItem>> {
        txn.scan_prefix(self.schema.source_item, &file_store_id.to_be_bytes())?
            .map(|(key, value)| decode_item(key, value))
            .collect()
    }

    /// Deletes every item of a source inside `txn`. Returns how many.
    pub fn delete_all_in(&self, txn: &mut WriteTxn<'_>, file_store_id: u64) -> RepoResult<usize> {
        let keys: Vec<Vec<u8>> = txn
            .scan_prefix(self.schema.source_item, &file_store_id.to_be_bytes())?
            .map(|(key, _)| key.to_vec())
            .collect();
        for key in &keys {
            txn.delete(self.schema.source_item, key)?;
        }
        Ok(keys.len())
    }

    /// Loads one item.
    pub fn get_item(&self, file_store_id: u64, item_index: u32) -> RepoResult<Option<RepoSourceItem>> {
        let txn = self.env.begin_read()?;
        self.get_in(&txn, file_store_id, item_index)
    }

    /// Every item of a source, in index order.
    pub fn get_items(&self, file_store_id: u64) -> RepoResult<Vec<RepoSourceItem>> {
        let txn = self.env.begin_read()?;
        self.items_in(&txn, file_store_id)
    }

    /// Number of items across all sources.
    pub fn count_items(&self) -> RepoResult<u64> {
        Ok(self.env.count(self.schema.source_item)?)
    }
}

impl std::fmt::Debug for SourceItemDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceItemDao").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRig;

    #[test]
    fn items_get_consecutive_indexes_per_source() {
        let rig = TestRig::new();
        rig.sources.add_source(1, "FEED", None).unwrap();
        rig.sources.add_source(2, "FEED", None).unwrap();
        let feed = FeedKey::new("FEED", "Raw Events");

        for name in ["a", "b", "c"] {
            rig.items
                .add_item(1, NewSourceItem::new(name, feed.clone(), 10))
                .unwrap();
        }
        let other = rig
            .items
            .add_item(2, NewSourceItem::new("z", feed, 10).with_extension("dat"))
            .unwrap();
        assert_eq!(other.item_index, 0);
        assert_eq!(other.extension.as_deref(), Some("dat"));

        let items = rig.items.get_items(1).unwrap();
        let indexes: Vec<u32> = items.iter().map(|i| i.item_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(items.iter().all(|i| i.aggregate_id.is_none()));
        assert_eq!(rig.items.count_items().unwrap(), 4);
    }

    #[test]
    fn add_item_requires_unexamined_source() {
        let rig = TestRig::new();
        let missing = rig.items.add_item(9, NewSourceItem::new("a", 1u32, 1));
        assert!(matches!(
            missing,
            Err(RepoError::SourceNotFound { file_store_id: 9 })
        ));

        rig.sources.add_source(1, "FEED", None).unwrap();
        rig.sources.set_source_examined(1, 0).unwrap();
        let examined = rig.items.add_item(1, NewSourceItem::new("a", 1u32, 1));
        assert!(matches!(
            examined,
            Err(RepoError::SourceExamined { file_store_id: 1 })
        ));
    }

    #[test]
    fn item_row_keeps_every_field() {
        let rig = TestRig::new();
        rig.sources.add_source(3, "FEED", Some("f.zip")).unwrap();
        let item = rig
            .items
            .add_item(3, NewSourceItem::new("001", 7u32, 1234).with_extension("meta"))
            .unwrap();
        assert_eq!(rig.items.get_item(3, 0).unwrap(), Some(item));
        assert_eq!(rig.items.get_item(3, 1).unwrap(), None);
    }
}

//! Aggregates: bounded groups of same-feed items awaiting forwarding.

use crate::error::{RepoError, RepoResult};
use crate::queue::OrderedQueue;
use crate::schema::{Schema, AGGREGATE_ID_COUNTER};
use bytes::BytesMut;
use proxyrepo_codec::{
    encode_u64_key, BoolSerde, IntSerde, KeyReader, LongSerde, PairSerde, Serde,
};
use proxyrepo_env::{Env, Txn, WriteTxn};
use serde::Serialize;
use std::sync::Arc;

const MEMBER_KEY_SERDE: PairSerde<LongSerde, IntSerde> =
    PairSerde::new(LongSerde::BIG_ENDIAN, IntSerde::BIG_ENDIAN);
const MEMBER_VALUE_SERDE: PairSerde<LongSerde, IntSerde> =
    PairSerde::new(LongSerde::BIG_ENDIAN, IntSerde::BIG_ENDIAN);

/// One aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    /// Primary key, increasing with creation order.
    pub aggregate_id: u64,
    /// Feed shared by every member.
    pub feed_id: u32,
    /// Members so far.
    pub item_count: u32,
    /// Sum of member sizes.
    pub total_size_bytes: u64,
    /// When the first member was claimed.
    pub create_time_ms: u64,
    /// Membership is frozen once set.
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct AggregateRowSerde;

impl Serde<Aggregate> for AggregateRowSerde {
    fn write(&self, aggregate: &Aggregate, buf: &mut BytesMut) {
        IntSerde::BIG_ENDIAN.write(&aggregate.feed_id, buf);
        IntSerde::BIG_ENDIAN.write(&aggregate.item_count, buf);
        LongSerde::BIG_ENDIAN.write(&aggregate.total_size_bytes, buf);
        LongSerde::BIG_ENDIAN.write(&aggregate.create_time_ms, buf);
        BoolSerde.write(&aggregate.closed, buf);
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> proxyrepo_codec::CodecResult<Aggregate> {
        Ok(Aggregate {
            aggregate_id: 0,
            feed_id: IntSerde::BIG_ENDIAN.read(reader)?,
            item_count: IntSerde::BIG_ENDIAN.read(reader)?,
            total_size_bytes: LongSerde::BIG_ENDIAN.read(reader)?,
            create_time_ms: LongSerde::BIG_ENDIAN.read(reader)?,
            closed: BoolSerde.read(reader)?,
        })
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(25)
    }
}

/// Reference from an aggregate to one of its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateMember {
    /// Source of the item.
    pub file_store_id: u64,
    /// Index of the item within its source.
    pub item_index: u32,
}

/// Aggregate rows, open-aggregate index, membership and the closed queue.
#[derive(Clone)]
pub struct AggregateDao {
    env: Arc<Env>,
    schema: Schema,
    closed_queue: Arc<OrderedQueue>,
}

impl AggregateDao {
    /// Creates a DAO that queues closed aggregates on `closed_queue`.
    pub fn new(env: Arc<Env>, schema: Schema, closed_queue: Arc<OrderedQueue>) -> Self {
        Self {
            env,
            schema,
            closed_queue,
        }
    }

    fn put_row_in(&self, txn: &mut WriteTxn<'_>, aggregate: &Aggregate) -> RepoResult<()> {
        let mut value = self.env.buffer_pool().acquire(AggregateRowSerde.fixed_len().unwrap_or(32));
        AggregateRowSerde.write(aggregate, &mut value);
        txn.put(
            self.schema.aggregate,
            &encode_u64_key(aggregate.aggregate_id),
            &value,
        )?;
        Ok(())
    }

    /// Loads an aggregate as of `txn`.
    pub fn get_in<T: Txn>(&self, txn: &T, aggregate_id: u64) -> RepoResult<Option<Aggregate>> {
        match txn.get(self.schema.aggregate, &encode_u64_key(aggregate_id))? {
            Some(value) => {
                let mut aggregate = AggregateRowSerde.from_bytes(value)?;
                aggregate.aggregate_id = aggregate_id;
                Ok(Some(aggregate))
            }
            None => Ok(None),
        }
    }

    /// The open aggregate of `feed_id` as of `txn`.
    pub fn open_for_feed_in<T: Txn>(&self, txn: &T, feed_id: u32) -> RepoResult<Option<Aggregate>> {
        let id = match txn.get(self.schema.aggregate_open, &feed_id.to_be_bytes())? {
            Some(value) => LongSerde::BIG_ENDIAN.from_bytes(value)?,
            None => return Ok(None),
        };
        match self.get_in(txn, id)? {
            Some(aggregate) => Ok(Some(aggregate)),
            None => {
                tracing::warn!(feed_id, aggregate_id = id, "open index names a missing aggregate");
                Ok(None)
            }
        }
    }

    /// Ids of every open aggregate as of `txn`, by feed id.
    pub fn open_ids_in<T: Txn>(&self, txn: &T) -> RepoResult<Vec<u64>> {
        txn.iter(self.schema.aggregate_open)?
            .map(|(_, value)| LongSerde::BIG_ENDIAN.from_bytes(value).map_err(Into::into))
            .collect()
    }

    /// Starts an empty open aggregate for `feed_id`.
    pub fn create_in(&self, txn: &mut WriteTxn<'_>, feed_id: u32, now_ms: u64) -> RepoResult<Aggregate> {
        let aggregate = Aggregate {
            aggregate_id: self.schema.next_id_in(txn, AGGREGATE_ID_COUNTER)?,
            feed_id,
            item_count: 0,
            total_size_bytes: 0,
            create_time_ms: now_ms,
            closed: false,
        };
        self.put_row_in(txn, &aggregate)?;
        txn.put(
            self.schema.aggregate_open,
            &feed_id.to_be_bytes(),
            &encode_u64_key(aggregate.aggregate_id),
        )?;
        tracing::debug!(aggregate_id = aggregate.aggregate_id, feed_id, "aggregate opened");
        Ok(aggregate)
    }

    /// Adds a member, updating `aggregate` and its row.
    ///
    /// # Errors
    ///
    /// [`RepoError::AggregateClosed`] if the aggregate is closed.
    pub fn append_item_in(
        &self,
        txn: &mut WriteTxn<'_>,
        aggregate: &mut Aggregate,
        member: AggregateMember,
        size_bytes: u64,
    ) -> RepoResult<()> {
        if aggregate.closed {
            return Err(RepoError::AggregateClosed {
                aggregate_id: aggregate.aggregate_id,
            });
        }
        let key = MEMBER_KEY_SERDE.to_bytes(&(aggregate.aggregate_id, aggregate.item_count));
        let value = MEMBER_VALUE_SERDE.to_bytes(&(member.file_store_id, member.item_index));
        txn.put(self.schema.aggregate_item, &key, &value)?;
        aggregate.item_count += 1;
        aggregate.total_size_bytes += size_bytes;
        self.put_row_in(txn, aggregate)
    }

    /// Closes `aggregate` and queues it for forwarding.
    ///
    /// The caller must [`OrderedQueue::notify`] the closed queue after
    /// committing.
    pub fn close_in(&self, txn: &mut WriteTxn<'_>, aggregate: &mut Aggregate) -> RepoResult<()> {
        if aggregate.closed {
            return Ok(());
        }
        aggregate.closed = true;
        self.put_row_in(txn, aggregate)?;
        let open_key = aggregate.feed_id.to_be_bytes();
        let indexed = match txn.get(self.schema.aggregate_open, &open_key)? {
            Some(value) => LongSerde::BIG_ENDIAN.from_bytes(value)? == aggregate.aggregate_id,
            None => false,
        };
        if indexed {
            txn.delete(self.schema.aggregate_open, &open_key)?;
        }
        self.closed_queue.put_in(txn, aggregate.aggregate_id)?;
        tracing::debug!(
            aggregate_id = aggregate.aggregate_id,
            items = aggregate.item_count,
            bytes = aggregate.total_size_bytes,
            "aggregate closed"
        );
        Ok(())
    }

    /// Members of an aggregate as of `txn`, in the order they were added.
    pub fn members_in<T: Txn>(&self, txn: &T, aggregate_id: u64) -> RepoResult<Vec<AggregateMember>> {
        txn.scan_prefix(self.schema.aggregate_item, &encode_u64_key(aggregate_id))?
            .map(|(_, value)| -> RepoResult<AggregateMember> {
                let (file_store_id, item_index) = MEMBER_VALUE_SERDE.from_bytes(value)?;
                Ok(AggregateMember {
                    file_store_id,
                    item_index,
                })
            })
            .collect()
    }

    /// Deletes an aggregate with its membership and queue entry. Returns
    /// the members it had, or `None` if it did not exist.
    pub fn delete_in(
        &self,
        txn: &mut WriteTxn<'_>,
        aggregate_id: u64,
    ) -> RepoResult<Option<Vec<AggregateMember>>> {
        let Some(aggregate) = self.get_in(&*txn, aggregate_id)? else {
            return Ok(None);
        };
        let members = self.members_in(&*txn, aggregate_id)?;
        for position in 0..members.len() as u32 {
            let key = MEMBER_KEY_SERDE.to_bytes(&(aggregate_id, position));
            txn.delete(self.schema.aggregate_item, &key)?;
        }
        if !aggregate.closed {
            txn.delete(self.schema.aggregate_open, &aggregate.feed_id.to_be_bytes())?;
        }
        txn.delete(self.schema.aggregate, &encode_u64_key(aggregate_id))?;
        self.closed_queue.remove_in(txn, aggregate_id)?;
        Ok(Some(members))
    }

    /// Ids of closed aggregates as of `txn`, oldest first.
    pub fn closed_ids_in<T: Txn>(&self, txn: &T) -> RepoResult<Vec<u64>> {
        let mut ids = Vec::new();
        for (key, value) in txn.iter(self.schema.aggregate)? {
            let aggregate = AggregateRowSerde.from_bytes(value)?;
            if aggregate.closed {
                ids.push(proxyrepo_codec::decode_u64_key(key)?);
            }
        }
        Ok(ids)
    }

    /// Loads an aggregate.
    pub fn get(&self, aggregate_id: u64) -> RepoResult<Option<Aggregate>> {
        let txn = self.env.begin_read()?;
        self.get_in(&txn, aggregate_id)
    }

    /// Members of an aggregate, in the order they were added.
    pub fn items(&self, aggregate_id: u64) -> RepoResult<Vec<AggregateMember>> {
        let txn = self.env.begin_read()?;
        self.members_in(&txn, aggregate_id)
    }

    /// Every aggregate, oldest first.
    pub fn list(&self) -> RepoResult<Vec<Aggregate>> {
        let txn = self.env.begin_read()?;
        let mut aggregates = Vec::new();
        for (key, value) in txn.iter(self.schema.aggregate)? {
            let mut aggregate = AggregateRowSerde.from_bytes(value)?;
            aggregate.aggregate_id = proxyrepo_codec::decode_u64_key(key)?;
            aggregates.push(aggregate);
        }
        Ok(aggregates)
    }

    /// Number of aggregates not yet forwarded.
    pub fn count_aggregates(&self) -> RepoResult<u64> {
        Ok(self.env.count(self.schema.aggregate)?)
    }

    /// Number of open aggregates.
    pub fn count_open(&self) -> RepoResult<u64> {
        Ok(self.env.count(self.schema.aggregate_open)?)
    }

    /// Number of closed aggregates awaiting forwarding.
    pub fn count_closed(&self) -> RepoResult<u64> {
        let txn = self.env.begin_read()?;
        let total = txn.count(self.schema.aggregate)?;
        let open = txn.count(self.schema.aggregate_open)?;
        Ok(total.saturating_sub(open))
    }

    /// The closed-aggregate queue.
    #[must_use]
    pub fn closed_queue(&self) -> &Arc<OrderedQueue> {
        &self.closed_queue
    }

    /// Re-queues closed aggregates missing from the closed queue. Returns
    /// how many were added.
    pub fn requeue_closed(&self) -> RepoResult<usize> {
        let requeued = self.env.write(|txn| -> RepoResult<usize> {
            let mut requeued = 0;
            for aggregate_id in self.closed_ids_in(&*txn)? {
                if self.closed_queue.put_in(txn, aggregate_id)? {
                    requeued += 1;
                }
            }
            Ok(requeued)
        })?;
        if requeued > 0 {
            self.closed_queue.notify();
            tracing::info!(requeued, "requeued closed aggregates");
        }
        Ok(requeued)
    }
}

impl std::fmt::Debug for AggregateDao {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateDao").finish_non_exhaustive()
    }
}

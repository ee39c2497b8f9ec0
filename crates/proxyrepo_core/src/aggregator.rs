//! Grouping examined items into aggregates.
//!
//! Per feed an aggregate is open, then closed (queued for forwarding),
//! then deleted once forwarded. [`Aggregator::aggregate_all`] claims
//! unclaimed items of examined sources feed by feed, one write transaction
//! per feed. A failing feed leaves its items unclaimed, so rerunning the
//! sweep picks them up again.

use crate::aggregate::{Aggregate, AggregateDao, AggregateMember};
use crate::clock::Clock;
use crate::config::AggregatorConfig;
use crate::error::RepoResult;
use crate::queue::OrderedQueue;
use crate::shutdown::ShutdownSignal;
use crate::source_item::SourceItemDao;
use proxyrepo_env::{Env, WriteTxn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What one [`Aggregator::aggregate_all`] run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Feeds whose items were processed.
    pub feeds: usize,
    /// Items claimed into aggregates.
    pub items_claimed: u64,
    /// Aggregates started.
    pub aggregates_created: u64,
    /// Aggregates closed because a limit was reached.
    pub aggregates_closed: u64,
    /// Sources with every item claimed, removed from the examined queue.
    pub sources_completed: u64,
    /// Set if the run stopped early on shutdown.
    pub interrupted: bool,
}

/// Applies the aggregation limits.
#[derive(Clone)]
pub struct Aggregator {
    env: Arc<Env>,
    items: SourceItemDao,
    aggregates: AggregateDao,
    examined_queue: Arc<OrderedQueue>,
    config: AggregatorConfig,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
}

/// Running state of one feed inside its transaction.
struct FeedBucket<'a> {
    aggregator: &'a Aggregator,
    open: Option<Aggregate>,
    now_ms: u64,
    stats: AggregateStats,
}

impl FeedBucket<'_> {
    fn full(&self, aggregate: &Aggregate) -> bool {
        let config = &self.aggregator.config;
        aggregate.item_count >= config.max_items_per_aggregate
            || aggregate.total_size_bytes >= config.max_uncompressed_byte_size
    }

    fn would_overflow(&self, aggregate: &Aggregate, size_bytes: u64) -> bool {
        let config = &self.aggregator.config;
        aggregate.item_count + 1 > config.max_items_per_aggregate
            || aggregate.total_size_bytes.saturating_add(size_bytes) > config.max_uncompressed_byte_size
    }

    fn claim(
        &mut self,
        txn: &mut WriteTxn<'_>,
        feed_id: u32,
        member: AggregateMember,
    ) -> RepoResult<()> {
        let dao = &self.aggregator.aggregates;
        let Some(mut item) =
            self.aggregator
                .items
                .get_in(&*txn, member.file_store_id, member.item_index)?
        else {
            return Ok(());
        };
        if item.aggregate_id.is_some() {
            // Claimed since the scan
            return Ok(());
        }

        if let Some(mut open) = self.open.take() {
            if self.would_overflow(&open, item.total_size_bytes) {
                dao.close_in(txn, &mut open)?;
                self.stats.aggregates_closed += 1;
            } else {
                self.open = Some(open);
            }
        }
        let mut aggregate = match self.open.take() {
            Some(open) => open,
            None => {
                self.stats.aggregates_created += 1;
                dao.create_in(txn, feed_id, self.now_ms)?
            }
        };

        dao.append_item_in(txn, &mut aggregate, member, item.total_size_bytes)?;
        item.aggregate_id = Some(aggregate.aggregate_id);
        self.aggregator.items.put_in(txn, &item)?;
        self.stats.items_claimed += 1;

        if self.full(&aggregate) {
            dao.close_in(txn, &mut aggregate)?;
            self.stats.aggregates_closed += 1;
        } else {
            self.open = Some(aggregate);
        }
        Ok(())
    }
}

impl Aggregator {
    /// Creates an aggregator.
    pub fn new(
        env: Arc<Env>,
        items: SourceItemDao,
        aggregates: AggregateDao,
        examined_queue: Arc<OrderedQueue>,
        config: AggregatorConfig,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            env,
            items,
            aggregates,
            examined_queue,
            config,
            clock,
            shutdown,
        }
    }

    /// Limits in force.
    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Unclaimed items of examined sources, grouped by feed in source then
    /// index order.
    fn unclaimed_by_feed(&self) -> RepoResult<BTreeMap<u32, Vec<AggregateMember>>> {
        let txn = self.env.begin_read()?;
        let mut buckets: BTreeMap<u32, Vec<AggregateMember>> = BTreeMap::new();
        for file_store_id in self.examined_queue.ids_in(&txn)? {
            for item in self.items.items_in(&txn, file_store_id)? {
                if item.aggregate_id.is_none() {
                    buckets.entry(item.feed_id).or_default().push(AggregateMember {
                        file_store_id,
                        item_index: item.item_index,
                    });
                }
            }
        }
        Ok(buckets)
    }

    /// Claims every unclaimed item of every examined source.
    ///
    /// Items join the open aggregate of their feed. An aggregate closes
    /// before an item that would push it past either limit, and as soon as
    /// it reaches one. An item bigger than the byte limit on its own gets
    /// an aggregate to itself.
    pub fn aggregate_all(&self) -> RepoResult<AggregateStats> {
        let buckets = self.unclaimed_by_feed()?;
        let mut stats = AggregateStats::default();

        for (feed_id, members) in buckets {
            if self.shutdown.is_requested() {
                stats.interrupted = true;
                tracing::info!(feeds_done = stats.feeds, "aggregation interrupted by shutdown");
                break;
            }

            let bucket = self.env.write(|txn| -> RepoResult<AggregateStats> {
                let mut bucket = FeedBucket {
                    aggregator: self,
                    open: self.aggregates.open_for_feed_in(&*txn, feed_id)?,
                    now_ms: self.clock.now_ms(),
                    stats: AggregateStats::default(),
                };
                for member in members {
                    bucket.claim(txn, feed_id, member)?;
                }
                Ok(bucket.stats)
            })?;

            if bucket.aggregates_closed > 0 {
                self.aggregates.closed_queue().notify();
            }
            stats.feeds += 1;
            stats.items_claimed += bucket.items_claimed;
            stats.aggregates_created += bucket.aggregates_created;
            stats.aggregates_closed += bucket.aggregates_closed;
        }

        stats.sources_completed = self.retire_claimed_sources()?;
        if stats.items_claimed > 0 || stats.interrupted {
            tracing::info!(
                feeds = stats.feeds,
                items = stats.items_claimed,
                created = stats.aggregates_created,
                closed = stats.aggregates_closed,
                sources = stats.sources_completed,
                "aggregation pass finished"
            );
        }
        Ok(stats)
    }

    /// Drops examined sources whose items are all claimed from the
    /// examined queue.
    fn retire_claimed_sources(&self) -> RepoResult<u64> {
        self.env.write(|txn| -> RepoResult<u64> {
            let mut retired = 0;
            for file_store_id in self.examined_queue.ids_in(&*txn)? {
                let items = self.items.items_in(&*txn, file_store_id)?;
                if items.iter().all(|item| item.aggregate_id.is_some()) {
                    self.examined_queue.remove_in(txn, file_store_id)?;
                    retired += 1;
                }
            }
            Ok(retired)
        })
    }

    /// Closes open aggregates that hold at least `min_items` items, at
    /// least `min_size_bytes` bytes, or were created more than the
    /// configured maximum age before `now_ms`. Returns how many closed.
    pub fn close_old_aggregates(
        &self,
        min_items: u32,
        min_size_bytes: u64,
        now_ms: u64,
    ) -> RepoResult<usize> {
        let cutoff = now_ms.saturating_sub(self.config.max_aggregate_age_ms);
        let due = |aggregate: &Aggregate| {
            aggregate.item_count >= min_items
                || aggregate.total_size_bytes >= min_size_bytes
                || aggregate.create_time_ms < cutoff
        };

        let open_ids = {
            let txn = self.env.begin_read()?;
            self.aggregates.open_ids_in(&txn)?
        };

        let mut closed = 0;
        for aggregate_id in open_ids {
            if self.shutdown.is_requested() {
                tracing::info!(closed, "age sweep interrupted by shutdown");
                break;
            }
            let did_close = self.env.write(|txn| -> RepoResult<bool> {
                // Re-check: the aggregate may have closed since the scan
                match self.aggregates.get_in(&*txn, aggregate_id)? {
                    Some(mut aggregate) if !aggregate.closed && due(&aggregate) => {
                        self.aggregates.close_in(txn, &mut aggregate)?;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            })?;
            if did_close {
                closed += 1;
            }
        }

        if closed > 0 {
            self.aggregates.closed_queue().notify();
            tracing::info!(closed, now_ms, "closed old aggregates");
        }
        Ok(closed)
    }

    /// [`Aggregator::close_old_aggregates`] with the configured maximums as
    /// minimums and the clock's current time.
    pub fn close_old_aggregates_now(&self) -> RepoResult<usize> {
        self.close_old_aggregates(
            self.config.max_items_per_aggregate,
            self.config.max_uncompressed_byte_size,
            self.clock.now_ms(),
        )
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Hands closed aggregates to a sink and retires them.
//!
//! The forwarder takes the oldest id off the closed-aggregate queue, reads
//! the members and passes them to a [`ForwardSink`] together with a
//! [`SourceContent`] for the item bytes. A successful forward deletes the
//! aggregate and releases one outstanding reference per member on the
//! owning source, which makes a source deletable once its last aggregate
//! is gone. A failed forward puts the id back and reports the failure;
//! retry policy belongs to the caller.

use crate::aggregate::{Aggregate, AggregateDao};
use crate::error::{RepoError, RepoResult};
use crate::feed::{FeedDao, FeedKey};
use crate::queue::OrderedQueue;
use crate::source::SourceDao;
use crate::source_item::{RepoSourceItem, SourceItemDao};
use proxyrepo_env::Env;
use serde::Serialize;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error returned by a sink.
pub type ForwardError = Box<dyn std::error::Error + Send + Sync>;

/// Byte access to the items of stored sources.
pub trait SourceContent: Send + Sync {
    /// Opens the uncompressed content of `item`.
    fn open_item(&self, item: &RepoSourceItem) -> io::Result<Box<dyn Read + '_>>;
}

/// Receives closed aggregates.
pub trait ForwardSink: Send + Sync {
    /// Forwards one aggregate. `items` are in aggregate order.
    fn forward(
        &self,
        aggregate: &Aggregate,
        feed: &FeedKey,
        items: &[RepoSourceItem],
        content: &dyn SourceContent,
    ) -> Result<(), ForwardError>;
}

/// Result of one [`Forwarder::forward_next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Nothing was waiting.
    Idle,
    /// The aggregate was forwarded and deleted.
    Forwarded {
        /// Forwarded aggregate.
        aggregate_id: u64,
        /// Items it held.
        items: usize,
        /// Sources that became deletable.
        sources_released: usize,
    },
    /// The sink failed; the aggregate is queued again.
    Failed {
        /// Aggregate that stays closed.
        aggregate_id: u64,
        /// Sink error text.
        message: String,
    },
    /// The queued id no longer named a closed aggregate.
    Skipped {
        /// The stale id.
        aggregate_id: u64,
    },
}

/// Forwarding counters.
#[derive(Debug, Default)]
pub struct ForwarderStats {
    forwarded: AtomicU64,
    items: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl ForwarderStats {
    fn record(&self, outcome: &ForwardOutcome) {
        match outcome {
            ForwardOutcome::Idle => {}
            ForwardOutcome::Forwarded { items, .. } => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                self.items.fetch_add(*items as u64, Ordering::Relaxed);
            }
            ForwardOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ForwardOutcome::Skipped { .. } => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> ForwarderStatsSnapshot {
        ForwarderStatsSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ForwarderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwarderStatsSnapshot {
    /// Aggregates forwarded.
    pub forwarded: u64,
    /// Items in forwarded aggregates.
    pub items: u64,
    /// Sink failures.
    pub failed: u64,
    /// Stale queue entries dropped.
    pub skipped: u64,
}

/// Drains the closed-aggregate queue into a sink.
#[derive(Clone)]
pub struct Forwarder {
    env: Arc<Env>,
    feeds: Arc<FeedDao>,
    sources: SourceDao,
    items: SourceItemDao,
    aggregates: AggregateDao,
    deletable_queue: Arc<OrderedQueue>,
    sink: Arc<dyn ForwardSink>,
    content: Arc<dyn SourceContent>,
    stats: Arc<ForwarderStats>,
}

impl Forwarder {
    /// Creates a forwarder.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: Arc<Env>,
        feeds: Arc<FeedDao>,
        sources: SourceDao,
        items: SourceItemDao,
        aggregates: AggregateDao,
        deletable_queue: Arc<OrderedQueue>,
        sink: Arc<dyn ForwardSink>,
        content: Arc<dyn SourceContent>,
    ) -> Self {
        Self {
            env,
            feeds,
            sources,
            items,
            aggregates,
            deletable_queue,
            sink,
            content,
            stats: Arc::new(ForwarderStats::default()),
        }
    }

    /// Counters of this forwarder and its clones.
    #[must_use]
    pub fn stats(&self) -> ForwarderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Forwards the oldest closed aggregate, waiting up to `timeout` for
    /// one to appear.
    pub fn forward_next(&self, timeout: Duration) -> RepoResult<ForwardOutcome> {
        let Some(aggregate_id) = self.aggregates.closed_queue().take(timeout)? else {
            return Ok(ForwardOutcome::Idle);
        };
        let outcome = match self.forward_taken(aggregate_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                // The take already committed; put the id back so the
                // aggregate is not stranded.
                if let Err(requeue) = self.aggregates.closed_queue().put(aggregate_id) {
                    tracing::warn!(
                        aggregate_id,
                        error = %requeue,
                        "could not requeue aggregate, recovered at next open"
                    );
                }
                return Err(e);
            }
        };
        self.stats.record(&outcome);
        Ok(outcome)
    }

    fn forward_taken(&self, aggregate_id: u64) -> RepoResult<ForwardOutcome> {
        let loaded = {
            let txn = self.env.begin_read()?;
            match self.aggregates.get_in(&txn, aggregate_id)? {
                Some(aggregate) if aggregate.closed => {
                    let mut items = Vec::with_capacity(aggregate.item_count as usize);
                    for member in self.aggregates.members_in(&txn, aggregate_id)? {
                        match self.items.get_in(&txn, member.file_store_id, member.item_index)? {
                            Some(item) => items.push(item),
                            None => tracing::warn!(
                                aggregate_id,
                                file_store_id = member.file_store_id,
                                item_index = member.item_index,
                                "aggregate member has no item row"
                            ),
                        }
                    }
                    Some((aggregate, items))
                }
                _ => None,
            }
        };
        let Some((aggregate, items)) = loaded else {
            tracing::warn!(aggregate_id, "closed queue names no closed aggregate");
            return Ok(ForwardOutcome::Skipped { aggregate_id });
        };

        let Some(feed) = self.feeds.get_key(aggregate.feed_id)? else {
            return self.fail(aggregate_id, format!("feed {} is not registered", aggregate.feed_id));
        };

        if let Err(e) = self
            .sink
            .forward(&aggregate, &feed, &items, self.content.as_ref())
        {
            return self.fail(aggregate_id, e.to_string());
        }

        let released = self.env.write(|txn| -> RepoResult<Option<usize>> {
            let Some(members) = self.aggregates.delete_in(txn, aggregate_id)? else {
                return Ok(None);
            };
            let mut released = 0;
            for member in members {
                if self.sources.release_item_in(txn, member.file_store_id)? {
                    released += 1;
                }
            }
            Ok(Some(released))
        })?;

        let Some(sources_released) = released else {
            tracing::warn!(aggregate_id, "aggregate vanished while forwarding");
            return Ok(ForwardOutcome::Skipped { aggregate_id });
        };
        if sources_released > 0 {
            self.deletable_queue.notify();
        }
        tracing::debug!(
            aggregate_id,
            feed = %feed,
            items = items.len(),
            sources_released,
            "aggregate forwarded"
        );
        Ok(ForwardOutcome::Forwarded {
            aggregate_id,
            items: items.len(),
            sources_released,
        })
    }

    fn fail(&self, aggregate_id: u64, message: String) -> RepoResult<ForwardOutcome> {
        self.aggregates.closed_queue().put(aggregate_id)?;
        tracing::warn!(aggregate_id, error = %message, "forward failed, aggregate requeued");
        Ok(ForwardOutcome::Failed {
            aggregate_id,
            message,
        })
    }

    /// Forwards closed aggregates until none is waiting. Returns how many
    /// were forwarded.
    ///
    /// # Errors
    ///
    /// [`RepoError::Forward`] on the first sink failure. Aggregates
    /// forwarded before it stay forwarded.
    pub fn forward_all(&self) -> RepoResult<usize> {
        let mut forwarded = 0;
        loop {
            match self.forward_next(Duration::ZERO)? {
                ForwardOutcome::Idle => return Ok(forwarded),
                ForwardOutcome::Forwarded { .. } => forwarded += 1,
                ForwardOutcome::Skipped { .. } => {}
                ForwardOutcome::Failed {
                    aggregate_id,
                    message,
                } => return Err(RepoError::forward(aggregate_id, message)),
            }
        }
    }

    /// Queues closed aggregates missing from the closed queue. Returns how
    /// many were queued.
    pub fn requeue_closed(&self) -> RepoResult<usize> {
        self.aggregates.requeue_closed()
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_item::NewSourceItem;
    use crate::test_support::{MemoryContent, RecordingSink, TestRig};

    fn examined_source(rig: &TestRig, file_store_id: u64, items: &[&str]) {
        rig.sources.add_source(file_store_id, "FEED", None).unwrap();
        for name in items {
            rig.items
                .add_item(
                    file_store_id,
                    NewSourceItem::new(*name, FeedKey::new("FEED", "Raw Events"), name.len() as u64),
                )
                .unwrap();
        }
        rig.sources
            .set_source_examined(file_store_id, items.len() as u32)
            .unwrap();
    }

    fn content_of(file_store_id: u64, items: &[&str]) -> Arc<MemoryContent> {
        let content = MemoryContent::default();
        for (index, name) in items.iter().enumerate() {
            content.insert(file_store_id, index as u32, name.as_bytes());
        }
        Arc::new(content)
    }

    #[test]
    fn forwarding_releases_sources() {
        let rig = TestRig::with_limits(2, 1 << 20, 60_000);
        examined_source(&rig, 1, &["alpha", "beta"]);
        rig.aggregator.aggregate_all().unwrap();

        let content = MemoryContent::default();
        content.insert(1, 0, b"alpha-bytes");
        content.insert(1, 1, b"beta-bytes");
        let sink = Arc::new(RecordingSink::default());
        let forwarder = rig.forwarder(sink.clone(), Arc::new(content));

        let outcome = forwarder.forward_next(Duration::ZERO).unwrap();
        assert_eq!(
            outcome,
            ForwardOutcome::Forwarded {
                aggregate_id: 1,
                items: 2,
                sources_released: 1,
            }
        );
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].feed, FeedKey::new("FEED", "Raw Events"));
        assert_eq!(delivered[0].bodies, vec![b"alpha-bytes".to_vec(), b"beta-bytes".to_vec()]);

        assert_eq!(rig.aggregates.count_aggregates().unwrap(), 0);
        let deletable = rig.sources.get_deletable_source().unwrap().unwrap();
        assert_eq!(deletable.file_store_id, 1);
        assert_eq!(deletable.outstanding, 0);
        assert!(rig.sources.delete_source(1).unwrap());
        assert_eq!(rig.items.count_items().unwrap(), 0);
        assert_eq!(forwarder.forward_next(Duration::ZERO).unwrap(), ForwardOutcome::Idle);
    }

    #[test]
    fn source_in_open_aggregate_cannot_be_deleted() {
        let rig = TestRig::with_limits(100, 1 << 20, 60_000);
        examined_source(&rig, 1, &["only"]);
        rig.aggregator.aggregate_all().unwrap();
        assert_eq!(rig.aggregates.count_open().unwrap(), 1);

        let refused = rig.sources.delete_source(1);
        assert!(matches!(refused, Err(RepoError::SourceInUse { file_store_id: 1, .. })));
        assert_eq!(rig.sources.count_sources().unwrap(), 1);
        assert_eq!(rig.items.count_items().unwrap(), 1);

        // Closed but not yet forwarded is still in use
        rig.aggregator.close_old_aggregates(1, 1, 0).unwrap();
        assert!(rig.sources.delete_source(1).is_err());
    }

    #[test]
    fn failed_forward_keeps_the_aggregate() {
        let rig = TestRig::with_limits(1, 1 << 20, 60_000);
        examined_source(&rig, 1, &["x"]);
        rig.aggregator.aggregate_all().unwrap();

        let sink = Arc::new(RecordingSink::failing("downstream unavailable"));
        let forwarder = rig.forwarder(sink.clone(), content_of(1, &["x"]));
        let outcome = forwarder.forward_next(Duration::ZERO).unwrap();
        assert!(matches!(outcome, ForwardOutcome::Failed { aggregate_id: 1, .. }));
        assert_eq!(rig.aggregates.count_closed().unwrap(), 1);
        assert_eq!(rig.aggregates.closed_queue().count().unwrap(), 1);

        let err = forwarder.forward_all().unwrap_err();
        assert!(matches!(err, RepoError::Forward { aggregate_id: 1, .. }));
        assert_eq!(forwarder.stats().failed, 2);

        sink.recover();
        assert_eq!(forwarder.forward_all().unwrap(), 1);
        assert_eq!(rig.sources.count_deletable_sources().unwrap(), 1);
    }

    #[test]
    fn source_waits_for_every_aggregate() {
        let rig = TestRig::with_limits(1, 1 << 20, 60_000);
        examined_source(&rig, 1, &["a", "b"]);
        rig.aggregator.aggregate_all().unwrap();
        assert_eq!(rig.aggregates.count_closed().unwrap(), 2);

        let forwarder = rig.forwarder(Arc::new(RecordingSink::default()), content_of(1, &["a", "b"]));
        forwarder.forward_next(Duration::ZERO).unwrap();
        assert_eq!(rig.sources.count_deletable_sources().unwrap(), 0);
        assert!(rig.sources.delete_source(1).is_err());

        forwarder.forward_next(Duration::ZERO).unwrap();
        assert_eq!(rig.sources.count_deletable_sources().unwrap(), 1);
        assert!(rig.sources.delete_source(1).unwrap());
    }

    #[test]
    fn requeue_restores_lost_queue_entries() {
        let rig = TestRig::with_limits(1, 1 << 20, 60_000);
        examined_source(&rig, 1, &["a", "b"]);
        rig.aggregator.aggregate_all().unwrap();
        rig.aggregates.closed_queue().clear().unwrap();

        let forwarder = rig.forwarder(Arc::new(RecordingSink::default()), content_of(1, &["a", "b"]));
        assert_eq!(forwarder.forward_next(Duration::ZERO).unwrap(), ForwardOutcome::Idle);
        assert_eq!(forwarder.requeue_closed().unwrap(), 2);
        assert_eq!(forwarder.requeue_closed().unwrap(), 0);
        assert_eq!(forwarder.forward_all().unwrap(), 2);
    }

    #[test]
    fn unreadable_content_fails_the_forward() {
        let rig = TestRig::with_limits(1, 1 << 20, 60_000);
        examined_source(&rig, 1, &["gone"]);
        rig.aggregator.aggregate_all().unwrap();

        let forwarder = rig.forwarder(
            Arc::new(RecordingSink::default()),
            Arc::new(MemoryContent::default()),
        );
        let outcome = forwarder.forward_next(Duration::ZERO).unwrap();
        assert!(matches!(outcome, ForwardOutcome::Failed { aggregate_id: 1, .. }));
        assert_eq!(rig.aggregates.count_aggregates().unwrap(), 1);
    }

    #[test]
    fn stale_queue_entry_is_skipped() {
        let rig = TestRig::with_limits(1, 1 << 20, 60_000);
        rig.aggregates.closed_queue().put(42).unwrap();
        let forwarder = rig.forwarder(
            Arc::new(RecordingSink::default()),
            Arc::new(MemoryContent::default()),
        );
        assert_eq!(
            forwarder.forward_next(Duration::ZERO).unwrap(),
            ForwardOutcome::Skipped { aggregate_id: 42 }
        );
        assert_eq!(forwarder.stats().skipped, 1);
    }
}

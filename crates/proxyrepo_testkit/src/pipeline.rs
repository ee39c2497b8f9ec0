//! End-to-end pipeline helpers.
//!
//! [`MemorySink`] and [`MemoryContent`] stand in for the downstream
//! destination and the source file store. [`PipelineHarness`] runs the
//! aggregate, forward and delete steps the way a proxy's workers would.

use parking_lot::Mutex;
use proxyrepo_core::{
    Aggregate, FeedKey, ForwardError, ForwardSink, Forwarder, ProxyRepo, RepoResult,
    RepoSourceItem, SourceContent,
};
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Item bytes keyed by `(file_store_id, item_index)`.
///
/// Items without stored bytes read as their name.
#[derive(Debug, Default)]
pub struct MemoryContent {
    bodies: Mutex<HashMap<(u64, u32), Vec<u8>>>,
}

impl MemoryContent {
    /// Stores the bytes of one item.
    pub fn insert(&self, file_store_id: u64, item_index: u32, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .insert((file_store_id, item_index), body.into());
    }
}

impl SourceContent for MemoryContent {
    fn open_item(&self, item: &RepoSourceItem) -> io::Result<Box<dyn Read + '_>> {
        let body = self
            .bodies
            .lock()
            .get(&(item.file_store_id, item.item_index))
            .cloned()
            .unwrap_or_else(|| item.name.clone().into_bytes());
        Ok(Box::new(io::Cursor::new(body)))
    }
}

/// An aggregate as the sink received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedAggregate {
    /// Aggregate id.
    pub aggregate_id: u64,
    /// Feed of every item.
    pub feed: FeedKey,
    /// `(file_store_id, item_index)` in delivery order.
    pub members: Vec<(u64, u32)>,
    /// Total bytes read from the content.
    pub bytes: usize,
}

/// Sink that reads every item and records the aggregate.
#[derive(Debug, Default)]
pub struct MemorySink {
    failing: AtomicBool,
    received: Mutex<Vec<ForwardedAggregate>>,
}

impl MemorySink {
    /// Makes every following forward fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything received so far.
    pub fn received(&self) -> Vec<ForwardedAggregate> {
        self.received.lock().clone()
    }
}

impl ForwardSink for MemorySink {
    fn forward(
        &self,
        aggregate: &Aggregate,
        feed: &FeedKey,
        items: &[RepoSourceItem],
        content: &dyn SourceContent,
    ) -> Result<(), ForwardError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("sink is failing".into());
        }
        let mut bytes = 0;
        let mut buf = Vec::new();
        for item in items {
            buf.clear();
            bytes += content.open_item(item)?.read_to_end(&mut buf)?;
        }
        self.received.lock().push(ForwardedAggregate {
            aggregate_id: aggregate.aggregate_id,
            feed: feed.clone(),
            members: items
                .iter()
                .map(|item| (item.file_store_id, item.item_index))
                .collect(),
            bytes,
        });
        Ok(())
    }
}

/// Totals of one [`PipelineHarness::run_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items claimed.
    pub items_claimed: u64,
    /// Aggregates closed by the age sweep.
    pub aged_out: usize,
    /// Aggregates forwarded.
    pub forwarded: usize,
    /// Sources deleted.
    pub deleted: usize,
}

/// Drives a repository through aggregation, forwarding and deletion.
pub struct PipelineHarness<'r> {
    repo: &'r ProxyRepo,
    /// Destination of forwarded aggregates.
    pub sink: Arc<MemorySink>,
    /// Item bytes.
    pub content: Arc<MemoryContent>,
    forwarder: Forwarder,
}

impl<'r> PipelineHarness<'r> {
    /// Creates a harness over `repo`.
    pub fn new(repo: &'r ProxyRepo) -> Self {
        let sink = Arc::new(MemorySink::default());
        let content = Arc::new(MemoryContent::default());
        let forwarder = repo.forwarder(sink.clone(), content.clone());
        Self {
            repo,
            sink,
            content,
            forwarder,
        }
    }

    /// The forwarder in use.
    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Aggregates, sweeps old aggregates, forwards everything closed and
    /// deletes every deletable source.
    pub fn run_cycle(&self) -> RepoResult<CycleReport> {
        let aggregator = self.repo.aggregator();
        let stats = aggregator.aggregate_all()?;
        let aged_out = aggregator.close_old_aggregates_now()?;
        let forwarded = self.forwarder.forward_all()?;

        let mut deleted = 0;
        while let Some(source) = self.repo.sources().get_deletable_source()? {
            if self.repo.sources().delete_source(source.file_store_id)? {
                deleted += 1;
            }
        }
        Ok(CycleReport {
            items_claimed: stats.items_claimed,
            aged_out,
            forwarded,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_examined_source, TestRepo};
    use proxyrepo_core::{AggregatorConfig, RepoError};

    fn limits(max_items: u32, max_bytes: u64, max_age_ms: u64) -> AggregatorConfig {
        AggregatorConfig::new(max_items, max_bytes, max_age_ms).unwrap()
    }

    #[test]
    fn full_cycle_empties_the_repository() {
        let repo = TestRepo::memory_with(limits(3, 1 << 20, 1_000));
        let feed = FeedKey::new("F", "Raw Events");
        add_examined_source(&repo, 1, &feed, &[10, 10, 10, 10]);
        add_examined_source(&repo, 2, &feed, &[10]);

        let harness = PipelineHarness::new(&repo);
        let first = harness.run_cycle().unwrap();
        assert_eq!(first.items_claimed, 5);
        assert_eq!(first.forwarded, 1);
        assert_eq!(first.deleted, 0);

        repo.clock.advance(1_001);
        let second = harness.run_cycle().unwrap();
        assert_eq!(second.aged_out, 1);
        assert_eq!(second.forwarded, 1);
        assert_eq!(second.deleted, 2);

        let health = repo.health().unwrap();
        assert_eq!(health.sources, 0);
        assert_eq!(health.items, 0);
        assert_eq!(health.aggregates, 0);
        assert!(health.queues.iter().all(|q| q.count == 0));

        let received = harness.sink.received();
        assert_eq!(received[0].members, vec![(1, 0), (1, 1), (1, 2)]);
        assert_eq!(received[1].members, vec![(1, 3), (2, 0)]);
    }

    #[test]
    fn sink_outage_holds_sources() {
        let repo = TestRepo::memory_with(limits(1, 1 << 20, 1_000));
        add_examined_source(&repo, 1, &FeedKey::new("F", "Raw Events"), &[5]);

        let harness = PipelineHarness::new(&repo);
        harness.content.insert(1, 0, b"hello".to_vec());
        harness.sink.set_failing(true);
        let err = harness.run_cycle().unwrap_err();
        assert!(matches!(err, RepoError::Forward { .. }));
        assert_eq!(repo.sources().count_sources().unwrap(), 1);

        harness.sink.set_failing(false);
        let report = harness.run_cycle().unwrap();
        assert_eq!(report.forwarded, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(harness.sink.received()[0].bytes, 5);
    }

    #[test]
    fn empty_source_is_deletable_at_once() {
        let repo = TestRepo::memory();
        add_examined_source(&repo, 1, &FeedKey::new("F", "Raw Events"), &[]);
        let report = PipelineHarness::new(&repo).run_cycle().unwrap();
        assert_eq!(report.deleted, 1);
    }
}

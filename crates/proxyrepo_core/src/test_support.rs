//! Shared fixtures for unit tests.
//!
//! Unlike the testkit stand-ins, [`MemoryContent`] fails for items with no
//! stored bytes, which the forwarder tests rely on.

use crate::aggregate::{Aggregate, AggregateDao};
use crate::aggregator::Aggregator;
use crate::clock::ManualClock;
use crate::config::{AggregatorConfig, RepoConfig};
use crate::feed::FeedKey;
use crate::forwarder::{ForwardError, ForwardSink, Forwarder, SourceContent};
use crate::repo::ProxyRepo;
use crate::shutdown::ShutdownSignal;
use crate::source::SourceDao;
use crate::source_item::{RepoSourceItem, SourceItemDao};
use parking_lot::Mutex;
use proxyrepo_env::Env;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

/// An in-memory repository with every DAO at hand.
pub(crate) struct TestRig {
    pub repo: ProxyRepo,
    pub env: Arc<Env>,
    pub sources: SourceDao,
    pub items: SourceItemDao,
    pub aggregates: AggregateDao,
    pub aggregator: Aggregator,
    pub clock: Arc<ManualClock>,
    pub shutdown: ShutdownSignal,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_limits(1_000, 1 << 30, 60_000)
    }

    pub fn with_limits(max_items: u32, max_bytes: u64, max_age_ms: u64) -> Self {
        let limits = AggregatorConfig::new(max_items, max_bytes, max_age_ms).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let repo = ProxyRepo::open_with_clock(RepoConfig::in_memory(limits), clock.clone()).unwrap();
        Self {
            env: Arc::clone(repo.env()),
            sources: repo.sources().clone(),
            items: repo.items().clone(),
            aggregates: repo.aggregates().clone(),
            aggregator: repo.aggregator(),
            shutdown: repo.shutdown_signal().clone(),
            clock,
            repo,
        }
    }

    pub fn forwarder(
        &self,
        sink: Arc<dyn ForwardSink>,
        content: Arc<dyn SourceContent>,
    ) -> Forwarder {
        self.repo.forwarder(sink, content)
    }
}

/// Item bytes keyed by `(file_store_id, item_index)`.
#[derive(Default)]
pub(crate) struct MemoryContent {
    bodies: Mutex<HashMap<(u64, u32), Vec<u8>>>,
}

impl MemoryContent {
    pub fn insert(&self, file_store_id: u64, item_index: u32, body: &[u8]) {
        self.bodies
            .lock()
            .insert((file_store_id, item_index), body.to_vec());
    }
}

impl SourceContent for MemoryContent {
    fn open_item(&self, item: &RepoSourceItem) -> io::Result<Box<dyn Read + '_>> {
        match self.bodies.lock().get(&(item.file_store_id, item.item_index)) {
            Some(body) => Ok(Box::new(io::Cursor::new(body.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no content for {}:{}", item.file_store_id, item.item_index),
            )),
        }
    }
}

/// One aggregate as the sink saw it.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub feed: FeedKey,
    pub bodies: Vec<Vec<u8>>,
}

/// Sink that reads every item and keeps what it read.
#[derive(Default)]
pub(crate) struct RecordingSink {
    failure: Mutex<Option<String>>,
    delivered: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Mutex::new(Some(message.to_string())),
            delivered: Mutex::default(),
        }
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }
}

impl ForwardSink for RecordingSink {
    fn forward(
        &self,
        _aggregate: &Aggregate,
        feed: &FeedKey,
        items: &[RepoSourceItem],
        content: &dyn SourceContent,
    ) -> Result<(), ForwardError> {
        if let Some(message) = self.failure.lock().clone() {
            return Err(message.into());
        }
        let mut bodies = Vec::with_capacity(items.len());
        for item in items {
            let mut body = Vec::new();
            content.open_item(item)?.read_to_end(&mut body)?;
            bodies.push(body);
        }
        self.delivered.lock().push(Delivery {
            feed: feed.clone(),
            bodies,
        });
        Ok(())
    }
}

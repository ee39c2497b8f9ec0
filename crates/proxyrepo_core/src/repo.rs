//! The repository facade.

use crate::aggregate::AggregateDao;
use crate::aggregator::Aggregator;
use crate::clock::{Clock, SystemClock};
use crate::config::RepoConfig;
use crate::error::RepoResult;
use crate::feed::{FeedDao, FeedResolver};
use crate::forwarder::{ForwardSink, Forwarder, SourceContent};
use crate::queue::OrderedQueue;
use crate::schema::{
    Schema, CLOSED_AGGREGATE_QUEUE, DELETABLE_SOURCE_QUEUE, EXAMINED_SOURCE_QUEUE,
    NEW_SOURCE_QUEUE,
};
use crate::shutdown::ShutdownSignal;
use crate::source::SourceDao;
use crate::source_item::SourceItemDao;
use proxyrepo_env::Env;
use serde::Serialize;
use std::sync::Arc;

/// The four pipeline queues.
#[derive(Debug, Clone)]
pub struct RepoQueues {
    /// Sources awaiting examination.
    pub new_source: Arc<OrderedQueue>,
    /// Examined sources with unclaimed items.
    pub examined_source: Arc<OrderedQueue>,
    /// Sources safe to delete.
    pub deletable_source: Arc<OrderedQueue>,
    /// Closed aggregates awaiting forwarding.
    pub closed_aggregate: Arc<OrderedQueue>,
}

impl RepoQueues {
    fn open(env: &Arc<Env>) -> RepoResult<Self> {
        Ok(Self {
            new_source: Arc::new(OrderedQueue::open(Arc::clone(env), NEW_SOURCE_QUEUE)?),
            examined_source: Arc::new(OrderedQueue::open(Arc::clone(env), EXAMINED_SOURCE_QUEUE)?),
            deletable_source: Arc::new(OrderedQueue::open(Arc::clone(env), DELETABLE_SOURCE_QUEUE)?),
            closed_aggregate: Arc::new(OrderedQueue::open(Arc::clone(env), CLOSED_AGGREGATE_QUEUE)?),
        })
    }

    fn all(&self) -> [&Arc<OrderedQueue>; 4] {
        [
            &self.new_source,
            &self.examined_source,
            &self.deletable_source,
            &self.closed_aggregate,
        ]
    }
}

/// Size and id range of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    /// Database name of the queue.
    pub name: String,
    /// Queued ids.
    pub count: u64,
    /// Oldest queued id.
    pub min_id: Option<u64>,
    /// Newest queued id.
    pub max_id: Option<u64>,
}

/// Counts describing where the pipeline stands.
///
/// A growing new-source queue with flat examined and deletable counts
/// means nothing is consuming it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoHealth {
    /// Last committed sequence number.
    pub committed_seq: u64,
    /// Registered feeds.
    pub feeds: u64,
    /// Source rows.
    pub sources: u64,
    /// Item rows.
    pub items: u64,
    /// Aggregates not yet forwarded.
    pub aggregates: u64,
    /// Open aggregates.
    pub open_aggregates: u64,
    /// Closed aggregates awaiting forwarding.
    pub closed_aggregates: u64,
    /// Per-queue figures.
    pub queues: Vec<QueueHealth>,
}

/// An opened repository with its DAOs wired together.
pub struct ProxyRepo {
    env: Arc<Env>,
    config: RepoConfig,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    feeds: Arc<FeedDao>,
    sources: SourceDao,
    items: SourceItemDao,
    aggregates: AggregateDao,
    queues: RepoQueues,
}

impl ProxyRepo {
    /// Opens a repository using the system clock.
    pub fn open(config: RepoConfig) -> RepoResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a repository reading time from `clock`.
    pub fn open_with_clock(config: RepoConfig, clock: Arc<dyn Clock>) -> RepoResult<Self> {
        config.aggregator.validate()?;
        let env_config = config.env.to_env_config();
        let env = Arc::new(match &config.path {
            Some(path) => Env::open(path, env_config)?,
            None => Env::open_in_memory(env_config)?,
        });

        let schema = Schema::open(&env)?;
        let queues = RepoQueues::open(&env)?;
        let feeds = Arc::new(FeedDao::new(Arc::clone(&env), schema));
        let resolver: Arc<dyn FeedResolver> = Arc::clone(&feeds) as Arc<dyn FeedResolver>;
        let items = SourceItemDao::new(Arc::clone(&env), schema, resolver);
        let sources = SourceDao::new(
            Arc::clone(&env),
            schema,
            items.clone(),
            Arc::clone(&queues.new_source),
            Arc::clone(&queues.examined_source),
            Arc::clone(&queues.deletable_source),
        );
        let aggregates =
            AggregateDao::new(Arc::clone(&env), schema, Arc::clone(&queues.closed_aggregate));
        // A forward interrupted after its take leaves a closed aggregate
        // with no queue entry.
        aggregates.requeue_closed()?;

        tracing::info!(
            path = ?config.path,
            committed_seq = env.committed_seq().0,
            "repository opened"
        );
        Ok(Self {
            env,
            config,
            clock,
            shutdown: ShutdownSignal::new(),
            feeds,
            sources,
            items,
            aggregates,
            queues,
        })
    }

    /// The underlying environment.
    #[must_use]
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Configuration the repository was opened with.
    #[must_use]
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Feed ids.
    #[must_use]
    pub fn feeds(&self) -> &Arc<FeedDao> {
        &self.feeds
    }

    /// Sources.
    #[must_use]
    pub fn sources(&self) -> &SourceDao {
        &self.sources
    }

    /// Items.
    #[must_use]
    pub fn items(&self) -> &SourceItemDao {
        &self.items
    }

    /// Aggregates.
    #[must_use]
    pub fn aggregates(&self) -> &AggregateDao {
        &self.aggregates
    }

    /// The pipeline queues.
    #[must_use]
    pub fn queues(&self) -> &RepoQueues {
        &self.queues
    }

    /// Signal checked by long sweeps. Requesting it stops them at the next
    /// feed boundary.
    #[must_use]
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// An aggregator using the configured limits and clock.
    #[must_use]
    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(
            Arc::clone(&self.env),
            self.items.clone(),
            self.aggregates.clone(),
            Arc::clone(&self.queues.examined_source),
            self.config.aggregator,
            Arc::clone(&self.clock),
            self.shutdown.clone(),
        )
    }

    /// A forwarder delivering to `sink`.
    #[must_use]
    pub fn forwarder(
        &self,
        sink: Arc<dyn ForwardSink>,
        content: Arc<dyn SourceContent>,
    ) -> Forwarder {
        Forwarder::new(
            Arc::clone(&self.env),
            Arc::clone(&self.feeds),
            self.sources.clone(),
            self.items.clone(),
            self.aggregates.clone(),
            Arc::clone(&self.queues.deletable_source),
            sink,
            content,
        )
    }

    /// Gathers counts and queue ranges.
    pub fn health(&self) -> RepoResult<RepoHealth> {
        let mut queues = Vec::with_capacity(4);
        for queue in self.queues.all() {
            queues.push(QueueHealth {
                name: queue.name().to_string(),
                count: queue.count()?,
                min_id: queue.min_id()?,
                max_id: queue.max_id()?,
            });
        }
        Ok(RepoHealth {
            committed_seq: self.env.committed_seq().0,
            feeds: self.feeds.count_feeds()?,
            sources: self.sources.count_sources()?,
            items: self.items.count_items()?,
            aggregates: self.aggregates.count_aggregates()?,
            open_aggregates: self.aggregates.count_open()?,
            closed_aggregates: self.aggregates.count_closed()?,
            queues,
        })
    }

    /// Checkpoints the environment.
    pub fn sync(&self) -> RepoResult<()> {
        self.env.sync()?;
        Ok(())
    }

    /// Requests shutdown and closes the environment.
    pub fn close(&self) -> RepoResult<()> {
        self.shutdown.request();
        self.env.close()?;
        Ok(())
    }
}

impl std::fmt::Debug for ProxyRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRepo")
            .field("env", &self.env)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

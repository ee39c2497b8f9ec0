//! # Proxy Repo Core
//!
//! Durable bookkeeping for a receiving proxy.
//!
//! Received files (sources) are admitted, examined for the feed streams
//! (items) they hold, and grouped per feed into aggregates that are
//! forwarded downstream once they are big or old enough. This crate
//! provides:
//!
//! - Ordered id queues with blocking `take`
//! - DAOs for feeds, sources, items and aggregates
//! - The [`Aggregator`] that claims items under size and count limits
//! - The [`Forwarder`] that hands closed aggregates to a sink and frees
//!   their sources for deletion
//!
//! All state lives in one [`proxyrepo_env::Env`]; every state change is a
//! single write transaction.
//!
//! ## Quick Start
//!
//! ```rust
//! use proxyrepo_core::{AggregatorConfig, FeedKey, NewSourceItem, ProxyRepo, RepoConfig};
//!
//! let limits = AggregatorConfig::new(1_000, 64 * 1024 * 1024, 60_000).unwrap();
//! let repo = ProxyRepo::open(RepoConfig::in_memory(limits)).unwrap();
//!
//! repo.sources().add_source(1, "TEST_FEED", Some("batch.zip")).unwrap();
//! let source = repo.sources().get_next_source().unwrap().unwrap();
//! let feed = FeedKey::new("TEST_FEED", "Raw Events");
//! repo.items()
//!     .add_item(source.file_store_id, NewSourceItem::new("001", feed, 512))
//!     .unwrap();
//! repo.sources().set_source_examined(source.file_store_id, 1).unwrap();
//!
//! let stats = repo.aggregator().aggregate_all().unwrap();
//! assert_eq!(stats.items_claimed, 1);
//! assert_eq!(repo.aggregates().count_open().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregate;
mod aggregator;
mod clock;
mod config;
mod error;
mod feed;
mod forwarder;
mod queue;
mod repo;
mod schema;
mod shutdown;
mod source;
mod source_item;

#[cfg(test)]
mod test_support;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use aggregate::{Aggregate, AggregateDao, AggregateMember};
pub use aggregator::{AggregateStats, Aggregator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AggregatorConfig, EnvSettings, RepoConfig};
pub use error::{RepoError, RepoResult};
pub use feed::{FeedDao, FeedKey, FeedResolver};
pub use forwarder::{
    ForwardError, ForwardOutcome, ForwardSink, Forwarder, ForwarderStats, ForwarderStatsSnapshot,
    SourceContent,
};
pub use queue::OrderedQueue;
pub use repo::{ProxyRepo, QueueHealth, RepoHealth, RepoQueues};
pub use schema::{
    Schema, AGGREGATE_DB, AGGREGATE_ITEM_DB, AGGREGATE_OPEN_DB, CLOSED_AGGREGATE_QUEUE,
    DELETABLE_SOURCE_QUEUE, EXAMINED_SOURCE_QUEUE, FEED_DB, FEED_ID_DB, META_DB, NEW_SOURCE_QUEUE,
    SOURCE_DB, SOURCE_ITEM_DB,
};
pub use shutdown::ShutdownSignal;
pub use source::{RepoSource, SourceDao};
pub use source_item::{FeedRef, NewSourceItem, RepoSourceItem, SourceItemDao};

//! Named databases that make up a repository.

use crate::error::RepoResult;
use proxyrepo_codec::{LongSerde, Serde};
use proxyrepo_env::{Dbi, Env, EnvError, Txn, WriteTxn};

/// Counters and other singletons.
pub const META_DB: &str = "meta";
/// Feed key to feed id.
pub const FEED_DB: &str = "feed";
/// Feed id to feed key.
pub const FEED_ID_DB: &str = "feed-id";
/// Source rows by file store id.
pub const SOURCE_DB: &str = "source";
/// Item rows by (file store id, item index).
pub const SOURCE_ITEM_DB: &str = "source-item";
/// Aggregate rows by aggregate id.
pub const AGGREGATE_DB: &str = "aggregate";
/// Feed id to its open aggregate.
pub const AGGREGATE_OPEN_DB: &str = "aggregate-open";
/// Aggregate membership by (aggregate id, position).
pub const AGGREGATE_ITEM_DB: &str = "aggregate-item";
/// Sources waiting to be examined.
pub const NEW_SOURCE_QUEUE: &str = "queue:new-source";
/// Examined sources with items still to aggregate.
pub const EXAMINED_SOURCE_QUEUE: &str = "queue:examined-source";
/// Sources with nothing left outstanding.
pub const DELETABLE_SOURCE_QUEUE: &str = "queue:deletable-source";
/// Closed aggregates waiting to be forwarded.
pub const CLOSED_AGGREGATE_QUEUE: &str = "queue:closed-aggregate";

pub(crate) const FEED_ID_COUNTER: &[u8] = b"next-feed-id";
pub(crate) const AGGREGATE_ID_COUNTER: &[u8] = b"next-aggregate-id";

/// Handles for every table database of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// [`META_DB`]
    pub meta: Dbi,
    /// [`FEED_DB`]
    pub feed: Dbi,
    /// [`FEED_ID_DB`]
    pub feed_id: Dbi,
    /// [`SOURCE_DB`]
    pub source: Dbi,
    /// [`SOURCE_ITEM_DB`]
    pub source_item: Dbi,
    /// [`AGGREGATE_DB`]
    pub aggregate: Dbi,
    /// [`AGGREGATE_OPEN_DB`]
    pub aggregate_open: Dbi,
    /// [`AGGREGATE_ITEM_DB`]
    pub aggregate_item: Dbi,
}

impl Schema {
    /// Opens every table database, creating missing ones in one commit.
    pub fn open(env: &Env) -> RepoResult<Self> {
        let schema = env.write(|txn| {
            Ok::<_, EnvError>(Self {
                meta: txn.open_db(META_DB)?,
                feed: txn.open_db(FEED_DB)?,
                feed_id: txn.open_db(FEED_ID_DB)?,
                source: txn.open_db(SOURCE_DB)?,
                source_item: txn.open_db(SOURCE_ITEM_DB)?,
                aggregate: txn.open_db(AGGREGATE_DB)?,
                aggregate_open: txn.open_db(AGGREGATE_OPEN_DB)?,
                aggregate_item: txn.open_db(AGGREGATE_ITEM_DB)?,
            })
        })?;
        Ok(schema)
    }

    /// Allocates the next id from `counter`. Ids start at 1.
    pub(crate) fn next_id_in(&self, txn: &mut WriteTxn<'_>, counter: &[u8]) -> RepoResult<u64> {
        let last = match txn.get(self.meta, counter)? {
            Some(bytes) => LongSerde::BIG_ENDIAN.from_bytes(bytes)?,
            None => 0,
        };
        let next = last + 1;
        txn.put(self.meta, counter, &LongSerde::BIG_ENDIAN.to_bytes(&next))?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyrepo_env::EnvConfig;

    #[test]
    fn reopening_schema_reuses_handles() {
        let env = Env::open_in_memory(EnvConfig::default()).unwrap();
        let first = Schema::open(&env).unwrap();
        let seq = env.committed_seq();
        let second = Schema::open(&env).unwrap();
        assert_eq!(first, second);
        assert_eq!(env.committed_seq(), seq);
    }

    #[test]
    fn counters_are_independent_and_start_at_one() {
        let env = Env::open_in_memory(EnvConfig::default()).unwrap();
        let schema = Schema::open(&env).unwrap();
        let ids = env
            .write(|txn| {
                Ok::<_, crate::RepoError>((
                    schema.next_id_in(txn, FEED_ID_COUNTER)?,
                    schema.next_id_in(txn, FEED_ID_COUNTER)?,
                    schema.next_id_in(txn, AGGREGATE_ID_COUNTER)?,
                ))
            })
            .unwrap();
        assert_eq!(ids, (1, 2, 1));
    }
}

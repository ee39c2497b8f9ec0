//! Feed keys and their stable ids.

use crate::error::{RepoError, RepoResult};
use crate::schema::{Schema, FEED_ID_COUNTER};
use parking_lot::RwLock;
use proxyrepo_codec::{IntSerde, PairSerde, Serde, StringSerde};
use proxyrepo_env::{Env, EnvError, Txn, MAX_KEY_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const FEED_KEY_SERDE: PairSerde<StringSerde, StringSerde> = PairSerde::new(StringSerde, StringSerde);

/// A logical data stream, identified by name and type.
///
/// The pair is stored as a key, so name and type together are limited to
/// [`MAX_KEY_SIZE`] bytes less an 8-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedKey {
    /// Feed name.
    pub name: String,
    /// Stream type, such as `Raw Events`.
    pub type_name: String,
}

impl FeedKey {
    /// Creates a key.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        FEED_KEY_SERDE
            .to_bytes(&(self.name.clone(), self.type_name.clone()))
            .to_vec()
    }

    fn encode_checked(&self) -> RepoResult<Vec<u8>> {
        let encoded = self.encode();
        if encoded.len() > MAX_KEY_SIZE {
            return Err(RepoError::FeedKeyTooLong {
                feed: self.to_string(),
                len: encoded.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(encoded)
    }

    fn decode(bytes: &[u8]) -> RepoResult<Self> {
        let (name, type_name) = FEED_KEY_SERDE.from_bytes(bytes)?;
        Ok(Self { name, type_name })
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.type_name)
    }
}

/// Maps feed keys to stable integer ids.
///
/// Implementations may open their own write transaction, so `get_id` must
/// not be called while the caller holds one.
pub trait FeedResolver: Send + Sync {
    /// Returns the id for `key`, assigning one on first use.
    fn get_id(&self, key: &FeedKey) -> RepoResult<u32>;
}

/// Store-backed [`FeedResolver`] with an in-process read cache.
///
/// Ids are allocated from a counter in the `meta` database and never
/// reused.
pub struct FeedDao {
    env: Arc<Env>,
    schema: Schema,
    cache: RwLock<HashMap<FeedKey, u32>>,
}

impl FeedDao {
    /// Creates a DAO over an opened schema.
    pub fn new(env: Arc<Env>, schema: Schema) -> Self {
        Self {
            env,
            schema,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn lookup_in<T: Txn>(&self, txn: &T, encoded: &[u8]) -> RepoResult<Option<u32>> {
        match txn.get(self.schema.feed, encoded)? {
            Some(bytes) => Ok(Some(IntSerde::BIG_ENDIAN.from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the key registered under `feed_id`.
    pub fn get_key(&self, feed_id: u32) -> RepoResult<Option<FeedKey>> {
        let txn = self.env.begin_read()?;
        match txn.get(self.schema.feed_id, &feed_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(FeedKey::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of registered feeds.
    pub fn count_feeds(&self) -> RepoResult<u64> {
        Ok(self.env.count(self.schema.feed)?)
    }

    /// Drops the read cache.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

impl FeedResolver for FeedDao {
    fn get_id(&self, key: &FeedKey) -> RepoResult<u32> {
        if let Some(id) = self.cache.read().get(key) {
            return Ok(*id);
        }

        let encoded = key.encode_checked()?;
        let stored = {
            let txn = self.env.begin_read()?;
            self.lookup_in(&txn, &encoded)?
        };
        let id = match stored {
            Some(id) => id,
            None => self.env.write(|txn| -> RepoResult<u32> {
                // Another thread may have registered it since the read
                if let Some(id) = self.lookup_in(&*txn, &encoded)? {
                    return Ok(id);
                }
                let id = u32::try_from(self.schema.next_id_in(txn, FEED_ID_COUNTER)?)
                    .map_err(|_| EnvError::invalid_operation("feed id space exhausted"))?;
                txn.put(self.schema.feed, &encoded, &id.to_be_bytes())?;
                txn.put(self.schema.feed_id, &id.to_be_bytes(), &encoded)?;
                tracing::debug!(feed = %key, feed_id = id, "registered feed");
                Ok(id)
            })?,
        };

        self.cache.write().insert(key.clone(), id);
        Ok(id)
    }
}

impl fmt::Debug for FeedDao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedDao")
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyrepo_env::EnvConfig;
    use std::thread;

    fn dao() -> FeedDao {
        let env = Arc::new(Env::open_in_memory(EnvConfig::default()).unwrap());
        let schema = Schema::open(&env).unwrap();
        FeedDao::new(env, schema)
    }

    #[test]
    fn same_key_gets_same_id() {
        let dao = dao();
        let raw = FeedKey::new("TEST_FEED", "Raw Events");
        let id = dao.get_id(&raw).unwrap();
        assert_eq!(dao.get_id(&raw).unwrap(), id);

        dao.clear_cache();
        assert_eq!(dao.get_id(&raw).unwrap(), id);
        assert_eq!(dao.count_feeds().unwrap(), 1);
    }

    #[test]
    fn type_is_part_of_the_key() {
        let dao = dao();
        let raw = dao.get_id(&FeedKey::new("F", "Raw Events")).unwrap();
        let events = dao.get_id(&FeedKey::new("F", "Events")).unwrap();
        assert_ne!(raw, events);
        assert_eq!(
            dao.get_key(events).unwrap(),
            Some(FeedKey::new("F", "Events"))
        );
        assert_eq!(dao.get_key(999).unwrap(), None);
    }

    #[test]
    fn oversized_key_is_rejected_before_writing() {
        let dao = dao();
        let err = dao
            .get_id(&FeedKey::new("F".repeat(600), "Raw Events"))
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::FeedKeyTooLong { len, max: MAX_KEY_SIZE, .. } if len > MAX_KEY_SIZE
        ));
        assert_eq!(dao.count_feeds().unwrap(), 0);

        let longest = MAX_KEY_SIZE - 8 - "Raw Events".len();
        let fits = FeedKey::new("F".repeat(longest), "Raw Events");
        let id = dao.get_id(&fits).unwrap();
        assert_eq!(dao.get_key(id).unwrap(), Some(fits));
    }

    #[test]
    fn racing_registrations_agree() {
        let dao = Arc::new(dao());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dao = Arc::clone(&dao);
                thread::spawn(move || dao.get_id(&FeedKey::new("RACE", "Raw Events")).unwrap())
            })
            .collect();
        let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(dao.count_feeds().unwrap(), 1);
    }
}

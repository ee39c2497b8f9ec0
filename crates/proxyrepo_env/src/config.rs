//! Environment configuration.

/// Default map size: 10 GiB of keys and values.
pub const DEFAULT_MAP_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Default number of concurrent read transactions.
pub const DEFAULT_MAX_READERS: usize = 126;

/// Options for opening an [`crate::Env`].
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Create the environment directory if it does not exist.
    pub create_if_missing: bool,

    /// Upper bound on the total bytes of stored keys and values.
    pub map_size: u64,

    /// Maximum number of read transactions open at once.
    pub max_readers: usize,

    /// Fsync the WAL on every commit instead of only flushing it.
    pub sync_on_commit: bool,

    /// WAL size that triggers an automatic checkpoint after a commit.
    /// Zero disables automatic checkpoints.
    pub max_wal_size: u64,

    /// Free buffers kept per size class by the buffer pool.
    pub pool_buffers_per_class: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
            sync_on_commit: true,
            max_wal_size: 64 * 1024 * 1024,
            pool_buffers_per_class: 50,
        }
    }
}

impl EnvConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create a missing directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the map size in bytes.
    #[must_use]
    pub const fn map_size(mut self, bytes: u64) -> Self {
        self.map_size = bytes;
        self
    }

    /// Sets the reader limit. Zero is raised to one.
    #[must_use]
    pub const fn max_readers(mut self, readers: usize) -> Self {
        self.max_readers = if readers == 0 { 1 } else { readers };
        self
    }

    /// Sets whether every commit fsyncs the WAL.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn max_wal_size(mut self, bytes: u64) -> Self {
        self.max_wal_size = bytes;
        self
    }

    /// Sets how many free buffers each pool size class keeps.
    #[must_use]
    pub const fn pool_buffers_per_class(mut self, count: usize) -> Self {
        self.pool_buffers_per_class = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EnvConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.map_size, DEFAULT_MAP_SIZE);
        assert_eq!(config.max_readers, DEFAULT_MAX_READERS);
    }

    #[test]
    fn builder_pattern() {
        let config = EnvConfig::new()
            .map_size(4096)
            .max_readers(0)
            .sync_on_commit(false)
            .max_wal_size(0);

        assert_eq!(config.map_size, 4096);
        assert_eq!(config.max_readers, 1);
        assert!(!config.sync_on_commit);
        assert_eq!(config.max_wal_size, 0);
    }
}

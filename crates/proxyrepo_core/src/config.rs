//! Repository configuration.
//!
//! Aggregation thresholds have no defaults: every deployment states its
//! own item count, byte size and age limits.

use crate::error::{RepoError, RepoResult};
use proxyrepo_env::{EnvConfig, DEFAULT_MAP_SIZE, DEFAULT_MAX_READERS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Limits that decide when an open aggregate closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// An aggregate closes once it holds this many items.
    pub max_items_per_aggregate: u32,
    /// An aggregate closes once its items add up to this many bytes.
    pub max_uncompressed_byte_size: u64,
    /// The age sweep closes aggregates older than this.
    pub max_aggregate_age_ms: u64,
}

impl AggregatorConfig {
    /// Creates a validated configuration.
    pub fn new(
        max_items_per_aggregate: u32,
        max_uncompressed_byte_size: u64,
        max_aggregate_age_ms: u64,
    ) -> RepoResult<Self> {
        let config = Self {
            max_items_per_aggregate,
            max_uncompressed_byte_size,
            max_aggregate_age_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero limits.
    pub fn validate(&self) -> RepoResult<()> {
        if self.max_items_per_aggregate == 0 {
            return Err(RepoError::invalid_config(
                "max_items_per_aggregate must be at least 1",
            ));
        }
        if self.max_uncompressed_byte_size == 0 {
            return Err(RepoError::invalid_config(
                "max_uncompressed_byte_size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Store settings, mirroring [`EnvConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvSettings {
    /// See [`EnvConfig::map_size`].
    pub map_size: u64,
    /// See [`EnvConfig::max_readers`].
    pub max_readers: usize,
    /// See [`EnvConfig::sync_on_commit`].
    pub sync_on_commit: bool,
    /// See [`EnvConfig::max_wal_size`].
    pub max_wal_size: u64,
}

impl Default for EnvSettings {
    fn default() -> Self {
        let env = EnvConfig::default();
        Self {
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
            sync_on_commit: env.sync_on_commit,
            max_wal_size: env.max_wal_size,
        }
    }
}

impl EnvSettings {
    /// Builds the environment configuration.
    #[must_use]
    pub fn to_env_config(&self) -> EnvConfig {
        EnvConfig::default()
            .map_size(self.map_size)
            .max_readers(self.max_readers)
            .sync_on_commit(self.sync_on_commit)
            .max_wal_size(self.max_wal_size)
    }
}

/// Everything needed to open a [`crate::ProxyRepo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Environment directory. `None` keeps the repository in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Aggregation limits.
    pub aggregator: AggregatorConfig,
    /// Store settings.
    #[serde(default)]
    pub env: EnvSettings,
}

impl RepoConfig {
    /// An in-memory repository with the given limits.
    #[must_use]
    pub fn in_memory(aggregator: AggregatorConfig) -> Self {
        Self {
            path: None,
            aggregator,
            env: EnvSettings::default(),
        }
    }

    /// A repository stored under `path`.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>, aggregator: AggregatorConfig) -> Self {
        Self {
            path: Some(path.into()),
            aggregator,
            env: EnvSettings::default(),
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> RepoResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RepoError::invalid_config(e.to_string()))?;
        config.aggregator.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_requires_aggregator_limits() {
        let err = RepoConfig::from_json(r#"{"path": "/tmp/repo"}"#).unwrap_err();
        assert!(matches!(err, RepoError::InvalidConfig { .. }));
    }

    #[test]
    fn json_with_limits_and_default_env() {
        let config = RepoConfig::from_json(
            r#"{
                "path": "/var/lib/proxy/repo",
                "aggregator": {
                    "max_items_per_aggregate": 1000,
                    "max_uncompressed_byte_size": 1048576,
                    "max_aggregate_age_ms": 600000
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.aggregator.max_items_per_aggregate, 1000);
        assert_eq!(config.env, EnvSettings::default());
        assert_eq!(config.env.to_env_config().map_size, DEFAULT_MAP_SIZE);
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(AggregatorConfig::new(0, 10, 10).is_err());
        assert!(AggregatorConfig::new(10, 0, 10).is_err());
        assert!(AggregatorConfig::new(1, 1, 0).is_ok());
    }
}

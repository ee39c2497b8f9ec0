//! Repository fixtures.
//!
//! [`TestRepo`] opens a repository with a manual clock, in memory or in a
//! temporary directory that lives as long as the fixture.

use proxyrepo_core::{
    AggregatorConfig, FeedKey, ManualClock, NewSourceItem, ProxyRepo, RepoConfig, RepoSource,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Limits used when a test does not care: large enough that nothing
/// closes on size, an hour of age.
pub fn default_limits() -> AggregatorConfig {
    AggregatorConfig::new(10_000, 1 << 32, 3_600_000).expect("valid limits")
}

/// A repository with automatic cleanup.
pub struct TestRepo {
    /// The repository.
    pub repo: ProxyRepo,
    /// Clock the repository reads.
    pub clock: Arc<ManualClock>,
    config: RepoConfig,
    temp_dir: Option<TempDir>,
}

impl TestRepo {
    /// An in-memory repository with [`default_limits`].
    pub fn memory() -> Self {
        Self::memory_with(default_limits())
    }

    /// An in-memory repository with the given limits.
    pub fn memory_with(limits: AggregatorConfig) -> Self {
        let config = RepoConfig::in_memory(limits);
        let clock = Arc::new(ManualClock::new(0));
        let repo = ProxyRepo::open_with_clock(config.clone(), clock.clone())
            .expect("Failed to open in-memory repository");
        Self {
            repo,
            clock,
            config,
            temp_dir: None,
        }
    }

    /// A repository in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with(default_limits())
    }

    /// A repository in a fresh temporary directory with the given limits.
    pub fn file_with(limits: AggregatorConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = RepoConfig::at_path(temp_dir.path().join("repo"), limits);
        let clock = Arc::new(ManualClock::new(0));
        let repo = ProxyRepo::open_with_clock(config.clone(), clock.clone())
            .expect("Failed to open file repository");
        Self {
            repo,
            clock,
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Directory of a file repository.
    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    /// Closes and reopens the repository, keeping the clock.
    ///
    /// # Panics
    ///
    /// If the repository is in memory.
    pub fn reopen(self) -> Self {
        assert!(self.temp_dir.is_some(), "only file repositories can be reopened");
        let Self {
            repo,
            clock,
            config,
            temp_dir,
        } = self;
        repo.close().expect("Failed to close repository");
        drop(repo);
        let repo = ProxyRepo::open_with_clock(config.clone(), clock.clone())
            .expect("Failed to reopen repository");
        Self {
            repo,
            clock,
            config,
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestRepo {
    type Target = ProxyRepo;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

/// Runs `f` against a temporary in-memory repository.
pub fn with_temp_repo<F, R>(f: F) -> R
where
    F: FnOnce(&ProxyRepo) -> R,
{
    let test_repo = TestRepo::memory();
    f(&test_repo.repo)
}

/// Adds a source with one item per entry of `sizes`, all in `feed`, and
/// marks it examined.
pub fn add_examined_source(
    repo: &ProxyRepo,
    file_store_id: u64,
    feed: &FeedKey,
    sizes: &[u64],
) -> RepoSource {
    repo.sources()
        .add_source(file_store_id, &feed.name, Some(&format!("{file_store_id}.zip")))
        .expect("Failed to add source");
    for (index, size) in sizes.iter().enumerate() {
        repo.items()
            .add_item(
                file_store_id,
                NewSourceItem::new(format!("{index:03}"), feed.clone(), *size),
            )
            .expect("Failed to add item");
    }
    repo.sources()
        .set_source_examined(file_store_id, sizes.len() as u32)
        .expect("Failed to examine source")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_repo_starts_empty() {
        with_temp_repo(|repo| {
            let health = repo.health().unwrap();
            assert_eq!(health.sources, 0);
            assert_eq!(health.aggregates, 0);
        });
    }

    #[test]
    fn file_repo_survives_reopen() {
        let test_repo = TestRepo::file();
        add_examined_source(&test_repo, 1, &FeedKey::new("F", "Raw Events"), &[1, 2, 3]);
        assert!(test_repo.path().is_some());

        let test_repo = test_repo.reopen();
        assert_eq!(test_repo.items().count_items().unwrap(), 3);
        let source = test_repo.sources().get_source(1).unwrap().unwrap();
        assert!(source.examined);
        assert_eq!(source.outstanding, 3);
    }
}

//! Sync command implementation.

use crate::error::CliResult;
use proxyrepo_core::ProxyRepo;
use tracing::info;

/// Checkpoints the environment so the log starts empty.
pub fn run(repo: &ProxyRepo) -> CliResult<()> {
    let before = repo.env().info()?.wal_size;
    repo.sync()?;
    let after = repo.env().info()?.wal_size;
    info!(before, after, "checkpoint written");
    println!("Checkpointed: WAL {before} -> {after} bytes");
    Ok(())
}

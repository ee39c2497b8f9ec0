//! CLI errors.

use proxyrepo_core::RepoError;
use proxyrepo_env::EnvError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Anything a command can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    /// The repository refused the operation.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// The environment refused the operation.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Reading the configuration file failed.
    #[error("cannot read {path}: {source}")]
    ReadConfig {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Rendering output failed.
    #[error("cannot render output: {0}")]
    Render(#[from] serde_json::Error),

    /// Neither `--config` nor `--path` was given.
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

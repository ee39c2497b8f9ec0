//! proxyrepo CLI
//!
//! Command-line tools for inspecting and maintaining a proxy repository.
//!
//! # Commands
//!
//! - `inspect` - Display pipeline counts, queue ranges and store figures
//! - `aggregate` - Claim examined items and close aged aggregates
//! - `sync` - Checkpoint the write-ahead log
//! - `version` - Show version information

mod commands;
mod error;

use clap::{Parser, Subcommand};
use error::{CliError, CliResult};
use proxyrepo_core::{ProxyRepo, RepoConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// proxyrepo command-line repository tools.
#[derive(Parser)]
#[command(name = "proxyrepo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON repository configuration
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Repository directory, overriding the configured one
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display pipeline counts, queue ranges and store figures
    Inspect {
        /// Show per-database figures
        #[arg(short, long)]
        databases: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Claim examined items into aggregates and close aged aggregates
    Aggregate {
        /// Skip the age sweep
        #[arg(long)]
        no_sweep: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Checkpoint the write-ahead log
    Sync,

    /// Show version information
    Version,
}

fn load_config(config: Option<&Path>, path: Option<PathBuf>) -> CliResult<RepoConfig> {
    let config = config.ok_or_else(|| {
        CliError::usage("a configuration file is required (--config <FILE>)")
    })?;
    let json = std::fs::read_to_string(config).map_err(|source| CliError::ReadConfig {
        path: config.to_path_buf(),
        source,
    })?;
    let mut repo_config = RepoConfig::from_json(&json)?;
    if path.is_some() {
        repo_config.path = path;
    }
    if repo_config.path.is_none() {
        return Err(CliError::usage(
            "no repository directory configured (set \"path\" or pass --path)",
        ));
    }
    Ok(repo_config)
}

fn open_repo(cli: &Cli) -> CliResult<ProxyRepo> {
    let config = load_config(cli.config.as_deref(), cli.path.clone())?;
    Ok(ProxyRepo::open(config)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Inspect { databases, format } => {
            let repo = open_repo(&cli)?;
            commands::inspect::run(&repo, *databases, format)?;
        }
        Commands::Aggregate { no_sweep, format } => {
            let repo = open_repo(&cli)?;
            commands::aggregate::run(&repo, *no_sweep, format)?;
            repo.close()?;
        }
        Commands::Sync => {
            let repo = open_repo(&cli)?;
            commands::sync::run(&repo)?;
        }
        Commands::Version => {
            println!("proxyrepo CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("proxyrepo core v{}", proxyrepo_core::VERSION);
        }
    }

    Ok(())
}

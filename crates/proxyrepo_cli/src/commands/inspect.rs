//! Inspect command implementation.

use crate::error::CliResult;
use proxyrepo_core::{ProxyRepo, RepoHealth};
use serde::Serialize;

/// Repository inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Environment directory, if on disk.
    pub path: Option<String>,
    /// Pipeline counts and queue ranges.
    pub health: RepoHealth,
    /// Current WAL length in bytes.
    pub wal_size: u64,
    /// Logical data size in bytes.
    pub used_bytes: u64,
    /// Configured upper bound on `used_bytes`.
    pub map_size: u64,
    /// Per-database figures (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<Vec<DatabaseStats>>,
}

/// Figures for one named database.
#[derive(Debug, Serialize)]
pub struct DatabaseStats {
    /// Database name.
    pub name: String,
    /// Number of keys.
    pub entries: u64,
    /// Sum of key and value lengths.
    pub bytes: u64,
}

/// Gathers the inspection result.
pub fn collect(repo: &ProxyRepo, show_databases: bool) -> CliResult<InspectResult> {
    let info = repo.env().info()?;
    let databases = show_databases.then(|| {
        info.databases
            .iter()
            .map(|db| DatabaseStats {
                name: db.name.clone(),
                entries: db.entries,
                bytes: db.bytes,
            })
            .collect()
    });
    Ok(InspectResult {
        path: info.path.as_ref().map(|p| p.display().to_string()),
        health: repo.health()?,
        wal_size: info.wal_size,
        used_bytes: info.used_bytes,
        map_size: info.map_size,
        databases,
    })
}

/// Runs the inspect command.
pub fn run(repo: &ProxyRepo, show_databases: bool, format: &str) -> CliResult<()> {
    let result = collect(repo, show_databases)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let health = &result.health;
    println!("Repository: {}", result.path.as_deref().unwrap_or("<memory>"));
    println!("Committed seq: {}", health.committed_seq);
    println!(
        "Data: {} of {} bytes, WAL {} bytes",
        result.used_bytes, result.map_size, result.wal_size
    );
    println!();
    println!("Feeds:      {}", health.feeds);
    println!("Sources:    {}", health.sources);
    println!("Items:      {}", health.items);
    println!(
        "Aggregates: {} ({} open, {} closed)",
        health.aggregates, health.open_aggregates, health.closed_aggregates
    );
    println!();
    println!("{:<28} {:>10} {:>12} {:>12}", "Queue", "Count", "Min", "Max");
    for queue in &health.queues {
        println!(
            "{:<28} {:>10} {:>12} {:>12}",
            queue.name,
            queue.count,
            queue.min_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            queue.max_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
        );
    }

    if let Some(databases) = &result.databases {
        println!();
        println!("{:<28} {:>10} {:>12}", "Database", "Entries", "Bytes");
        for db in databases {
            println!("{:<28} {:>10} {:>12}", db.name, db.entries, db.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyrepo_core::{AggregatorConfig, RepoConfig};

    #[test]
    fn collects_databases_on_request() {
        let limits = AggregatorConfig::new(10, 1_000, 1_000).unwrap();
        let repo = ProxyRepo::open(RepoConfig::in_memory(limits)).unwrap();
        repo.sources().add_source(1, "F", None).unwrap();

        let result = collect(&repo, true).unwrap();
        assert_eq!(result.health.sources, 1);
        let databases = result.databases.unwrap();
        assert!(databases.iter().any(|db| db.name == "source" && db.entries == 1));

        let plain = collect(&repo, false).unwrap();
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("databases").is_none());
        assert_eq!(json["health"]["sources"], 1);
    }
}

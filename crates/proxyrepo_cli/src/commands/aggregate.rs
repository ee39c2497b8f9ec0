//! Aggregate command implementation.

use crate::error::CliResult;
use proxyrepo_core::{AggregateStats, ProxyRepo};
use serde::Serialize;

/// What one aggregate run did.
#[derive(Debug, Serialize)]
pub struct AggregateReport {
    /// Result of claiming items.
    pub stats: AggregateStats,
    /// Aggregates closed by the age sweep, if it ran.
    pub aged_out: Option<usize>,
}

/// Claims every unclaimed item, then closes aggregates past their age
/// unless `skip_sweep` is set.
pub fn execute(repo: &ProxyRepo, skip_sweep: bool) -> CliResult<AggregateReport> {
    let aggregator = repo.aggregator();
    let stats = aggregator.aggregate_all()?;
    let aged_out = if skip_sweep || stats.interrupted {
        None
    } else {
        Some(aggregator.close_old_aggregates_now()?)
    };
    Ok(AggregateReport { stats, aged_out })
}

/// Runs the aggregate command.
pub fn run(repo: &ProxyRepo, skip_sweep: bool, format: &str) -> CliResult<()> {
    let report = execute(repo, skip_sweep)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            let stats = &report.stats;
            println!(
                "Claimed {} items across {} feeds",
                stats.items_claimed, stats.feeds
            );
            println!(
                "Aggregates: {} created, {} closed on limits",
                stats.aggregates_created, stats.aggregates_closed
            );
            println!("Sources fully claimed: {}", stats.sources_completed);
            if let Some(aged_out) = report.aged_out {
                println!("Closed by age: {aged_out}");
            }
            if stats.interrupted {
                println!("Interrupted before every feed was processed");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyrepo_core::{AggregatorConfig, FeedKey, ManualClock, NewSourceItem, RepoConfig};
    use std::sync::Arc;

    #[test]
    fn sweep_runs_unless_skipped() {
        let limits = AggregatorConfig::new(10, 1_000, 1_000).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let repo = ProxyRepo::open_with_clock(RepoConfig::in_memory(limits), clock.clone()).unwrap();
        repo.sources().add_source(1, "F", None).unwrap();
        repo.items()
            .add_item(1, NewSourceItem::new("a", FeedKey::new("F", "Raw Events"), 1))
            .unwrap();
        repo.sources().set_source_examined(1, 1).unwrap();

        let report = execute(&repo, true).unwrap();
        assert_eq!(report.stats.items_claimed, 1);
        assert_eq!(report.aged_out, None);
        assert_eq!(repo.aggregates().count_open().unwrap(), 1);

        clock.advance(1_001);
        let report = execute(&repo, false).unwrap();
        assert_eq!(report.stats.items_claimed, 0);
        assert_eq!(report.aged_out, Some(1));
        assert_eq!(repo.aggregates().count_open().unwrap(), 0);
        assert_eq!(repo.aggregates().count_closed().unwrap(), 1);
    }
}

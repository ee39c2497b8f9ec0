//! Load tests for queues and the pipeline.
//!
//! These drive producers and consumers on separate threads and check that
//! nothing is lost, duplicated or reordered.

use crate::fixtures::add_examined_source;
use proxyrepo_core::{FeedKey, OrderedQueue, ProxyRepo, RepoResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Operations attempted.
    pub total_ops: usize,
    /// Operations that succeeded.
    pub successful_ops: usize,
    /// Operations that returned an error.
    pub failed_ops: usize,
    /// Wall time.
    pub duration: Duration,
    /// Throughput.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Stress parameters.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Ids or sources to produce.
    pub operations: usize,
    /// Producer threads, where a test has several.
    pub threads: usize,
    /// How long a consumer waits in one `take`.
    pub take_timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 100_000,
            threads: 4,
            take_timeout: Duration::from_millis(100),
        }
    }
}

/// What a queue consumer saw.
#[derive(Debug, Clone)]
pub struct QueueRun {
    /// Throughput figures for the whole run.
    pub result: StressTestResult,
    /// Ids in the order they were taken.
    pub taken: Vec<u64>,
}

impl QueueRun {
    /// True if the taken ids strictly increase.
    pub fn is_strictly_ordered(&self) -> bool {
        self.taken.windows(2).all(|w| w[0] < w[1])
    }
}

/// One producer puts `1..=operations` while one consumer takes with a
/// blocking `take` until the producer is done and the queue is drained.
pub fn stress_queue_producer_consumer(queue: Arc<OrderedQueue>, config: &StressConfig) -> QueueRun {
    let total = config.operations as u64;
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let producer = {
        let queue = Arc::clone(&queue);
        let failed = Arc::clone(&failed);
        thread::spawn(move || {
            for id in 1..=total {
                if queue.put(id).is_err() {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        let failed = Arc::clone(&failed);
        let timeout = config.take_timeout;
        thread::spawn(move || {
            let mut taken = Vec::with_capacity(total as usize);
            while (taken.len() as u64) < total {
                match queue.take(timeout) {
                    Ok(Some(id)) => taken.push(id),
                    Ok(None) => {
                        // A failed put means the total is never reached
                        if failed.load(Ordering::Relaxed) > 0 {
                            break;
                        }
                    }
                    Err(_) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
            taken
        })
    };

    producer.join().expect("Producer panicked");
    let taken = consumer.join().expect("Consumer panicked");
    let failed = failed.load(Ordering::Relaxed);
    QueueRun {
        result: StressTestResult::new(taken.len(), failed, start.elapsed()),
        taken,
    }
}

/// Several threads race `take` on a queue holding `operations` ids; every
/// id must be delivered exactly once.
pub fn stress_competing_consumers(queue: Arc<OrderedQueue>, config: &StressConfig) -> QueueRun {
    let start = Instant::now();
    let put = queue
        .put_all(1..=config.operations as u64)
        .unwrap_or(0);

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || -> RepoResult<Vec<u64>> {
                let mut taken = Vec::new();
                while let Some(id) = queue.try_take()? {
                    taken.push(id);
                }
                Ok(taken)
            })
        })
        .collect();

    let mut taken = Vec::with_capacity(put);
    let mut failed = 0;
    for handle in handles {
        match handle.join().expect("Consumer panicked") {
            Ok(ids) => taken.extend(ids),
            Err(_) => failed += 1,
        }
    }
    taken.sort_unstable();
    QueueRun {
        result: StressTestResult::new(taken.len(), failed, start.elapsed()),
        taken,
    }
}

/// Producer threads admit and examine sources concurrently, then one
/// aggregation pass claims every item. Returns one operation per source.
pub fn stress_concurrent_sources(
    repo: &ProxyRepo,
    config: &StressConfig,
    items_per_source: usize,
) -> StressTestResult {
    let per_thread = config.operations / config.threads;
    let start = Instant::now();
    let successful = AtomicUsize::new(0);

    thread::scope(|scope| {
        for t in 0..config.threads {
            let successful = &successful;
            scope.spawn(move || {
                let feed = FeedKey::new(format!("FEED_{t}"), "Raw Events");
                let sizes = vec![1; items_per_source];
                for i in 0..per_thread {
                    let file_store_id = (t * per_thread + i + 1) as u64;
                    add_examined_source(repo, file_store_id, &feed, &sizes);
                    successful.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    let failed = match repo.aggregator().aggregate_all() {
        Ok(_) => 0,
        Err(_) => 1,
    };
    StressTestResult::new(successful.into_inner(), failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestRepo;

    #[test]
    fn producer_consumer_hundred_thousand() {
        let repo = TestRepo::memory();
        let queue = Arc::clone(&repo.queues().new_source);
        let run = stress_queue_producer_consumer(Arc::clone(&queue), &StressConfig::default());

        assert_eq!(run.result.failed_ops, 0);
        assert_eq!(run.taken.len(), 100_000);
        assert!(run.is_strictly_ordered());
        assert_eq!(queue.max_id().unwrap(), None);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    #[ignore = "a million commits, run with --ignored"]
    fn producer_consumer_one_million() {
        let repo = TestRepo::memory();
        let queue = Arc::clone(&repo.queues().new_source);
        let config = StressConfig {
            operations: 1_000_000,
            ..Default::default()
        };
        let run = stress_queue_producer_consumer(queue, &config);
        run.result.print_summary("queue producer/consumer");
        assert_eq!(run.taken.len(), 1_000_000);
        assert_eq!(run.taken.last(), Some(&1_000_000));
        assert!(run.is_strictly_ordered());
    }

    #[test]
    fn max_id_tracks_the_producer() {
        let repo = TestRepo::memory();
        let queue = &repo.queues().deletable_source;
        queue.put_all(1..=1_000).unwrap();
        assert_eq!(queue.max_id().unwrap(), Some(1_000));
        for _ in 0..400 {
            queue.try_take().unwrap();
        }
        assert_eq!(queue.min_id().unwrap(), Some(401));
        assert_eq!(queue.max_id().unwrap(), Some(1_000));
    }

    #[test]
    fn competing_consumers_never_share_an_id() {
        let repo = TestRepo::memory();
        let config = StressConfig {
            operations: 5_000,
            threads: 4,
            ..Default::default()
        };
        let run = stress_competing_consumers(Arc::clone(&repo.queues().closed_aggregate), &config);
        assert_eq!(run.result.failed_ops, 0);
        assert_eq!(run.taken, (1..=5_000).collect::<Vec<u64>>());
    }

    #[test]
    fn concurrent_source_producers() {
        let repo = TestRepo::memory();
        let config = StressConfig {
            operations: 200,
            threads: 4,
            ..Default::default()
        };
        let result = stress_concurrent_sources(&repo, &config, 5);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);

        let health = repo.health().unwrap();
        assert_eq!(health.sources, 200);
        assert_eq!(health.items, 1_000);
        assert_eq!(health.feeds, 4);
        assert_eq!(health.open_aggregates, 4);
        assert!(repo.queues().examined_source.is_empty().unwrap());
    }
}

//! Stress runs for concurrent access.
//!
//! These helpers drive a collection from several threads and report how
//! many operations succeeded. The callers assert on the final state.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata_core::{Collection, CoreResult, Database, OperationOptions};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
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

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Padding added to every document, in bytes.
    pub document_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            document_size: 64,
        }
    }
}

struct Counters {
    successful: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            successful: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    fn record<T>(&self, result: &CoreResult<T>) {
        let counter = if result.is_ok() {
            &self.successful
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Key written by thread `thread` in [`stress_concurrent_writers`].
pub fn writer_key(thread: usize) -> String {
    format!("w{thread}")
}

/// Each thread inserts its own document and then updates it
/// `operations - 1` times, setting `n` to the round number.
///
/// Afterwards every writer's document has `n == operations - 1`.
pub fn stress_concurrent_writers(collection: &Arc<Collection>, config: &StressConfig) -> StressTestResult {
    let counters = Counters::new();
    let start = Instant::now();
    let pad = "x".repeat(config.document_size);

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let collection = Arc::clone(collection);
            let counters = Arc::clone(&counters);
            let pad = pad.clone();
            let operations = config.operations;
            thread::spawn(move || {
                let key = writer_key(t);
                let inserted = collection.insert(json!({"_key": key, "n": 0, "pad": pad}), OperationOptions::default());
                counters.record(&inserted);
                for n in 1..operations {
                    let updated = collection.update(&key, json!({"n": n}), OperationOptions::default());
                    counters.record(&updated);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    counters.finish(start)
}

/// One thread rewrites `keys` documents in a loop while the others read
/// them. Reads must never fail: a reader sees either the old or the new
/// version of every document.
pub fn stress_reads_during_writes(
    collection: &Arc<Collection>,
    keys: usize,
    config: &StressConfig,
) -> StressTestResult {
    let pad = "y".repeat(config.document_size);
    for i in 0..keys {
        collection
            .insert(json!({"_key": format!("r{i}"), "n": 0, "pad": pad}), OperationOptions::default())
            .expect("Failed to seed document");
    }

    let counters = Counters::new();
    let start = Instant::now();
    let writer = {
        let collection = Arc::clone(collection);
        let operations = config.operations;
        thread::spawn(move || {
            for n in 1..=operations {
                let key = format!("r{}", n % keys);
                collection
                    .update(&key, json!({"n": n}), OperationOptions::default())
                    .expect("Writer failed");
            }
        })
    };

    let readers: Vec<_> = (0..config.threads)
        .map(|t| {
            let collection = Arc::clone(collection);
            let counters = Arc::clone(&counters);
            let operations = config.operations;
            thread::spawn(move || {
                for i in 0..operations {
                    let key = format!("r{}", (t * 31 + i) % keys);
                    counters.record(&collection.read(&key));
                }
            })
        })
        .collect();

    writer.join().expect("Writer panicked");
    for reader in readers {
        reader.join().expect("Reader panicked");
    }
    counters.finish(start)
}

/// Opens `accounts` documents with balance 100 in both `left` and `right`.
pub fn open_accounts(left: &Arc<Collection>, right: &Arc<Collection>, accounts: usize) {
    for collection in [left, right] {
        for i in 0..accounts {
            collection
                .insert(json!({"_key": format!("a{i}"), "balance": 100}), OperationOptions::default())
                .expect("Failed to open account");
        }
    }
}

/// Sum of all balances in `collection`.
pub fn total_balance(collection: &Collection) -> i64 {
    collection
        .documents()
        .expect("Failed to read accounts")
        .iter()
        .map(|document| document.body["balance"].as_i64().unwrap_or(0))
        .sum()
}

fn transfer(
    db: &Database,
    from: &Arc<Collection>,
    to: &Arc<Collection>,
    account: &str,
    amount: i64,
) -> CoreResult<()> {
    db.transaction(|txn| {
        txn.lock_write(from)?;
        let source = txn.read(from, account)?;
        let balance = source.body["balance"].as_i64().unwrap_or(0);
        txn.update(from, account, json!({"balance": balance - amount}), OperationOptions::default())?;
        txn.lock_write(to)?;
        let target = txn.read(to, account)?;
        let balance = target.body["balance"].as_i64().unwrap_or(0);
        txn.update(to, account, json!({"balance": balance + amount}), OperationOptions::default())?;
        Ok(())
    })
}

/// Threads move money between `left` and `right` in transactions. Even
/// threads go left to right and odd threads right to left, so the two
/// collection locks are taken in opposite orders and deadlocks happen.
///
/// A transfer that fails is aborted and counted as failed; the combined
/// balance of both collections never changes.
pub fn stress_crossing_transfers(
    db: &Arc<Database>,
    left: &Arc<Collection>,
    right: &Arc<Collection>,
    accounts: usize,
    config: &StressConfig,
) -> StressTestResult {
    let counters = Counters::new();
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(db);
            let (from, to) = if t % 2 == 0 {
                (Arc::clone(left), Arc::clone(right))
            } else {
                (Arc::clone(right), Arc::clone(left))
            };
            let counters = Arc::clone(&counters);
            let operations = config.operations;
            thread::spawn(move || {
                for i in 0..operations {
                    let account = format!("a{}", (t * 7 + i) % accounts);
                    let amount = ((t + i) % 5 + 1) as i64;
                    counters.record(&transfer(&db, &from, &to, &account, amount));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    counters.finish(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_reports_throughput() {
        let result = StressTestResult::new(90, 10, Duration::from_secs(2));
        assert_eq!(result.total_ops, 100);
        assert!((result.ops_per_second - 50.0).abs() < f64::EPSILON);
        assert_eq!(StressTestResult::new(0, 0, Duration::ZERO).ops_per_second, 0.0);
    }
}

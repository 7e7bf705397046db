//! Stress tests for HearthDB.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::{Account, ACCOUNTS};
use hearth_core::{Database, Document};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

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

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of threads for concurrent tests.
    pub threads: usize,
    /// Number of distinct ids.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            entity_count: 1_000,
        }
    }
}

impl StressConfig {
    /// A configuration small enough for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            operations: 400,
            threads: 4,
            entity_count: 50,
        }
    }
}

fn doc(i: usize) -> Document {
    Document::from_value(json!({ "id": format!("e{i}"), "n": i }))
        .expect("Generated documents carry a string id")
}

/// Upserts one document per transaction.
pub fn stress_sequential_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let items = db.documents("stress");
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match items.upsert(&doc(i % config.entity_count)) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Interleaves upserts, reads and deletes.
pub fn stress_mixed_operations(db: &Database, config: &StressConfig) -> StressTestResult {
    let items = db.documents("stress");
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let idx = i % config.entity_count;
        let result = match i % 3 {
            0 => items.upsert(&doc(idx)),
            1 => items.get(format!("e{idx}")).map(|_| ()),
            _ => items.delete(format!("e{idx}")).map(|_| ()),
        };
        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Increments one counter from many threads, reading it inside each
/// transaction.
///
/// Returns the result and the final counter value, which equals the number
/// of successful increments when no update was lost.
pub fn stress_concurrent_counter(db: Arc<Database>, config: &StressConfig) -> (StressTestResult, i64) {
    let accounts = db.collection::<Account>(ACCOUNTS);
    if accounts.upsert(&Account::new("counter", 0)).is_err() {
        return (StressTestResult::new(0, config.operations, Duration::ZERO), 0);
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let db = Arc::clone(&db);
            let accounts = accounts.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let result = db.transaction(|txn| {
                        let mut counter = accounts.require_in_txn(txn, "counter")?;
                        counter.balance += 1;
                        accounts.upsert_in_txn(txn, &counter)
                    });
                    let slot = if result.is_ok() { &successful } else { &failed };
                    slot.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    let value = accounts.require("counter").map_or(-1, |c| c.balance);
    (result, value)
}

/// Moves money between two accounts from many threads while an observer
/// checks that every notified snapshot preserves the total.
///
/// Returns the result and the number of snapshots that broke the total.
pub fn stress_concurrent_transfers(db: Arc<Database>, config: &StressConfig) -> (StressTestResult, usize) {
    const TOTAL: i64 = 1_000_000;
    let accounts = db.collection::<Account>(ACCOUNTS);
    let seeded = db.transaction(|txn| {
        accounts.upsert_in_txn(txn, &Account::new("left", TOTAL))?;
        accounts.upsert_in_txn(txn, &Account::new("right", 0))
    });
    if seeded.is_err() {
        return (StressTestResult::new(0, config.operations, Duration::ZERO), 0);
    }

    let broken = Arc::new(AtomicUsize::new(0));
    let b = Arc::clone(&broken);
    let subscription = accounts.observe(move |all| {
        let total: i64 = all.iter().map(|a| a.balance).sum();
        if total != TOTAL {
            b.fetch_add(1, Ordering::Relaxed);
        }
    });

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let accounts = accounts.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let (from, to) = if t % 2 == 0 { ("left", "right") } else { ("right", "left") };

            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let result = db.transaction(|txn| {
                        let mut a = accounts.require_in_txn(txn, from)?;
                        let mut b = accounts.require_in_txn(txn, to)?;
                        let amount = a.balance.min(1);
                        a.balance -= amount;
                        b.balance += amount;
                        accounts.upsert_in_txn(txn, &a)?;
                        accounts.upsert_in_txn(txn, &b)
                    });
                    let slot = if result.is_ok() { &successful } else { &failed };
                    slot.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    subscription.unsubscribe();

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    (result, broken.load(Ordering::Relaxed))
}

//! Stress tests for quill.
//!
//! These tests verify behavior under heavy load and concurrent writers.

use quill_core::{Connection, CoreError, CoreResult, Database};
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
    /// Busy results that were retried.
    pub busy_retries: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, busy_retries: usize, duration: Duration) -> Self {
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
            busy_retries,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            busy_retries = self.busy_retries,
            duration = ?self.duration,
            ops_per_second = self.ops_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of values in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
    /// Busy retries allowed per operation.
    pub max_busy_retries: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_count: 1_000,
            max_busy_retries: 100_000,
        }
    }
}

fn key(thread: usize, i: usize) -> Vec<u8> {
    format!("t{thread}-k{i:06}").into_bytes()
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];
    let mut conn = db.connect();

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match conn.insert(&key(0, i % config.key_count.max(1)), &value) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, 0, start.elapsed())
}

/// Run concurrent writers, one connection per thread.
///
/// A writer whose view went stale gets [`CoreError::Busy`] and retries up
/// to `max_busy_retries` times before counting the operation as failed.
pub fn stress_concurrent_writers(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let retries = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let retries = Arc::clone(&retries);
            let value = vec![t as u8; config.value_size];
            let key_count = config.key_count.max(1);
            let max_retries = config.max_busy_retries;

            thread::spawn(move || {
                let mut conn = db.connect();
                for i in 0..ops_per_thread {
                    let key = key(t, i % key_count);
                    let mut attempts = 0;
                    loop {
                        match conn.insert(&key, &value) {
                            Ok(()) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(CoreError::Busy) if attempts < max_retries => {
                                attempts += 1;
                                retries.fetch_add(1, Ordering::Relaxed);
                                thread::yield_now();
                            }
                            Err(_) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        retries.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run nested transactions that roll back every other inner level.
///
/// Each outer transaction writes one key at level 1 and one at level 2,
/// then either commits or rolls back level 2 before committing.
pub fn stress_nested_rollbacks(db: &Database, config: &StressConfig) -> StressTestResult {
    let value = vec![0xCDu8; config.value_size];
    let mut conn = db.connect();

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match nested_round(&mut conn, i, &value) {
            Ok(()) => successful += 1,
            Err(_) => {
                let _ = conn.rollback(0);
                failed += 1;
            }
        }
    }

    StressTestResult::new(successful, failed, 0, start.elapsed())
}

fn nested_round(conn: &mut Connection, i: usize, value: &[u8]) -> CoreResult<()> {
    conn.begin(1)?;
    conn.insert(&key(1, i), value)?;
    conn.begin(2)?;
    conn.insert(&key(2, i), value)?;
    if i % 2 == 0 {
        conn.rollback(2)?;
    }
    conn.commit(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::SharedState;

    fn create_test_db() -> Database {
        Database::open_in_memory().expect("Failed to create database")
    }

    #[test]
    fn test_sequential_writes() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 1_000,
            value_size: 64,
            ..Default::default()
        };

        let result = stress_sequential_writes(&db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1_000);
        assert_eq!(db.stats().transactions_committed(), 1_000);
    }

    #[test]
    fn test_concurrent_writers() {
        let db = Arc::new(create_test_db());
        let config = StressConfig {
            operations: 400,
            threads: 4,
            key_count: 50,
            value_size: 32,
            ..Default::default()
        };

        let result = stress_concurrent_writers(Arc::clone(&db), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        assert!(!db.shared().writer_locked());
        assert_eq!(db.connect().get(&key(3, 49)), Some(vec![3u8; 32]));
    }

    #[test]
    fn test_nested_rollbacks() {
        let db = create_test_db();
        let config = StressConfig {
            operations: 100,
            value_size: 16,
            ..Default::default()
        };

        let result = stress_nested_rollbacks(&db, &config);
        assert_eq!(result.successful_ops, 100);

        let conn = db.connect();
        assert!(conn.get(&key(1, 0)).is_some());
        assert!(conn.get(&key(2, 0)).is_none());
        assert!(conn.get(&key(2, 1)).is_some());
    }
}

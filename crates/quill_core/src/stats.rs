//! Database statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quill_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! let mut conn = db.connect();
//! conn.insert(b"k", b"v")?;
//!
//! let stats = db.stats().snapshot();
//! println!("commits: {}", stats.transactions_committed);
//! println!("log bytes: {}", stats.bytes_logged);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for write-path activity.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Transaction counters
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    writer_lock_acquisitions: AtomicU64,

    // Log counters
    log_wraps: AtomicU64,
    log_jumps: AtomicU64,
    bytes_logged: AtomicU64,

    // Flush counters
    flushes: AtomicU64,
    auto_flushes: AtomicU64,
    checkpoints: AtomicU64,

    busy_retries: AtomicU64,
}

impl DatabaseStats {
    /// Creates zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writer_lock(&self) {
        self.writer_lock_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_wrap(&self) {
        self.log_wraps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_activity(&self, bytes: u64, jumps: u64) {
        self.bytes_logged.fetch_add(bytes, Ordering::Relaxed);
        self.log_jumps.fetch_add(jumps, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_auto_flush(&self) {
        self.auto_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_busy_retry(&self) {
        self.busy_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of write transactions begun.
    #[must_use]
    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun.load(Ordering::Relaxed)
    }

    /// Returns the number of write transactions committed.
    #[must_use]
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of write transactions rolled back.
    #[must_use]
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns how many times the writer lock was taken.
    #[must_use]
    pub fn writer_lock_acquisitions(&self) -> u64 {
        self.writer_lock_acquisitions.load(Ordering::Relaxed)
    }

    /// Returns how many times the log wrapped to offset 0.
    #[must_use]
    pub fn log_wraps(&self) -> u64 {
        self.log_wraps.load(Ordering::Relaxed)
    }

    /// Returns how many JUMP records were written.
    #[must_use]
    pub fn log_jumps(&self) -> u64 {
        self.log_jumps.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes appended to the log by committed
    /// transactions.
    #[must_use]
    pub fn bytes_logged(&self) -> u64 {
        self.bytes_logged.load(Ordering::Relaxed)
    }

    /// Returns the number of synchronous flushes.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of flushes triggered by the auto-flush threshold.
    #[must_use]
    pub fn auto_flushes(&self) -> u64 {
        self.auto_flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of synced checkpoints.
    #[must_use]
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Returns the number of read-slot attempts that found the table busy.
    #[must_use]
    pub fn busy_retries(&self) -> u64 {
        self.busy_retries.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_begun: self.transactions_begun(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            writer_lock_acquisitions: self.writer_lock_acquisitions(),
            log_wraps: self.log_wraps(),
            log_jumps: self.log_jumps(),
            bytes_logged: self.bytes_logged(),
            flushes: self.flushes(),
            auto_flushes: self.auto_flushes(),
            checkpoints: self.checkpoints(),
            busy_retries: self.busy_retries(),
        }
    }
}

/// Plain copy of [`DatabaseStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub writer_lock_acquisitions: u64,
    pub log_wraps: u64,
    pub log_jumps: u64,
    pub bytes_logged: u64,
    pub flushes: u64,
    pub auto_flushes: u64,
    pub checkpoints: u64,
    pub busy_retries: u64,
}

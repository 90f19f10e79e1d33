//! Database connections.

use crate::config::{
    clamp_auto_checkpoint_kb, clamp_auto_flush_kb, Config, SafetyLevel,
};
use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::log::{effective_sector_size, AllocationCase, LogWriter, RegionAllocator};
use crate::snapshot::{TreeHeader, WorkerSnapshot};
use crate::stats::DatabaseStats;
use crate::transaction::{TransactionMark, TransactionStack};
use crate::types::ReaderSlot;
use std::sync::Arc;

/// Callback invoked after a commit leaves flush work pending with auto-work
/// disabled.
pub type WorkHook = Box<dyn FnMut() + Send>;

/// A connection to a database.
///
/// Connections are cheap and not shared between threads; open one per
/// thread with [`Database::connect`](crate::Database::connect). All
/// connections to a database share its writer lock, read slots and tree.
///
/// # Example
///
/// ```rust,ignore
/// let db = Database::open_in_memory()?;
/// let mut conn = db.connect();
///
/// conn.begin(1)?;
/// conn.insert(b"a", b"1")?;
/// conn.begin(2)?;
/// conn.insert(b"b", b"2")?;
/// conn.rollback(2)?;   // undoes "b", level 2 stays open
/// conn.commit(0)?;     // commits "a"
/// ```
pub struct Connection {
    pub(crate) db: Arc<DatabaseInner>,
    pub(crate) config: Config,
    pub(crate) tree_header: TreeHeader,
    pub(crate) reader: Option<ReaderSlot>,
    pub(crate) cursors: usize,
    pub(crate) stack: TransactionStack,
    pub(crate) worker: Option<WorkerSnapshot>,
    pub(crate) log_writer: Option<LogWriter>,
    pub(crate) work_hook: Option<WorkHook>,
}

impl Connection {
    pub(crate) fn new(db: Arc<DatabaseInner>) -> Self {
        let config = db.config.clone();
        let tree_header = db.shared.tree_header();
        Self {
            db,
            config,
            tree_header,
            reader: None,
            cursors: 0,
            stack: TransactionStack::new(),
            worker: None,
            log_writer: None,
            work_hook: None,
        }
    }

    /// Opens write-transaction levels up to `level`.
    ///
    /// A negative level opens one level deeper than the current depth.
    /// Levels already open are left alone. Opening the first level takes the
    /// writer lock, which may block until another connection's write
    /// transaction finishes.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ReadOnly`] on a read-only connection
    /// - [`CoreError::OutOfMemory`] if the mark array cannot grow
    /// - [`CoreError::Busy`] if another connection committed since this
    ///   connection's read transaction began
    pub fn begin(&mut self, level: i32) -> CoreResult<()> {
        if self.config.read_only {
            return Err(CoreError::ReadOnly);
        }
        let current = self.stack.open_levels();
        let target = self.stack.open_target(level);
        if target <= current {
            return Ok(());
        }

        self.stack.reserve(target)?;
        if current == 0 {
            self.begin_write_transaction()?;
        }

        let mark = TransactionMark {
            tree: self.db.tree.lock().mark(),
            log: self.log_writer.as_ref().map(LogWriter::tell),
        };
        self.stack.push_levels(target, &mark);
        tracing::debug!(from = current, to = target, "opened transaction levels");
        Ok(())
    }

    /// Commits levels down to `level`.
    ///
    /// A negative level closes the innermost level. Committing level 0
    /// writes the COMMIT record and publishes the transaction. If the record
    /// cannot be written the transaction is rolled back instead and the
    /// write error returned.
    pub fn commit(&mut self, level: i32) -> CoreResult<()> {
        let open = self.stack.open_levels();
        let target = self.stack.close_target(level);
        let mut result = Ok(());

        if target < open {
            if target == 0 {
                let sync = self.config.safety == SafetyLevel::Full;
                if let Some(writer) = self.log_writer.as_mut() {
                    result = writer.commit(&self.db.log, sync);
                }
                if result.is_err() {
                    if let Some(mark) = self.stack.mark(0) {
                        self.db.tree.lock().rollback(&mark.tree);
                    }
                }
                let finished = self.finish_write_transaction(result.is_ok(), false);
                if result.is_ok() {
                    result = finished;
                }
            }
            self.stack.close_to(target);
            tracing::debug!(from = open, to = target, ok = result.is_ok(), "committed");
        }

        self.finish_read();
        result
    }

    /// Rolls back levels down to `level`.
    ///
    /// Rolling back to level `n > 0` undoes everything written since level
    /// `n` opened, closes deeper levels and leaves level `n` open. Rolling
    /// back to 0 abandons the transaction.
    pub fn rollback(&mut self, level: i32) -> CoreResult<()> {
        let open = self.stack.open_levels();
        if open == 0 {
            return Ok(());
        }
        let target = self.stack.close_target(level);

        if target <= open {
            if let Some(mark) = self.stack.mark(target.saturating_sub(1)).cloned() {
                self.db.tree.lock().rollback(&mark.tree);
                if target > 0 {
                    if let (Some(writer), Some(log_mark)) =
                        (self.log_writer.as_mut(), mark.log.as_ref())
                    {
                        writer.seek(log_mark);
                    }
                }
            }
            self.stack.close_to(target);
            tracing::debug!(from = open, to = target, "rolled back");
        }

        if self.stack.open_levels() == 0 {
            self.finish_write_transaction(false, false)?;
        }
        self.finish_read();
        Ok(())
    }

    /// Inserts or overwrites a key, in its own transaction if none is open.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.write_op(key, Some(value))
    }

    /// Deletes a key, in its own transaction if none is open.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.write_op(key, None)
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.tree.lock().get(key)
    }

    fn write_op(&mut self, key: &[u8], value: Option<&[u8]>) -> CoreResult<()> {
        let auto_commit = self.stack.open_levels() == 0;
        if auto_commit {
            self.begin(1)?;
        }
        let result = self.apply_write(key, value);
        if !auto_commit {
            return result;
        }
        match result {
            Ok(()) => self.commit(0),
            Err(e) => {
                if let Err(rollback) = self.rollback(0) {
                    tracing::warn!(error = %rollback, "rollback after failed write");
                }
                Err(e)
            }
        }
    }

    fn apply_write(&mut self, key: &[u8], value: Option<&[u8]>) -> CoreResult<()> {
        if let Some(writer) = self.log_writer.as_mut() {
            match value {
                Some(value) => writer.write(&self.db.log, key, value)?,
                None => writer.delete(&self.db.log, key)?,
            }
        }
        let mut tree = self.db.tree.lock();
        match value {
            Some(value) => tree.insert(key, value),
            None => tree.delete(key),
        }
    }

    /// Takes the writer lock and prepares the worker snapshot and log
    /// writer. On failure the lock and any read transaction opened here are
    /// released.
    pub(crate) fn begin_write_transaction(&mut self) -> CoreResult<()> {
        if self.reader.is_none() {
            self.begin_read()?;
        }
        let shared = Arc::clone(&self.db.shared);
        shared.lock_writer()?;
        self.db.stats.record_writer_lock();

        match self.open_worker() {
            Ok(()) => {
                self.db.stats.record_transaction_begin();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "write transaction could not start");
                self.worker = None;
                self.log_writer = None;
                shared.unlock_writer();
                self.finish_read();
                Err(e)
            }
        }
    }

    fn open_worker(&mut self) -> CoreResult<()> {
        let shared = Arc::clone(&self.db.shared);
        if self.tree_header != shared.tree_header() {
            return Err(CoreError::Busy);
        }

        let mut header = self.tree_header.clone();
        header.transaction_id += 1;

        if self.config.use_log {
            if let Some(checkpoint) = shared.synced_checkpoint() {
                header
                    .log
                    .reclaim(checkpoint.snapshot_id, checkpoint.log_offset);
            }
            let sector_size =
                effective_sector_size(self.config.safety, || self.db.log.sector_size());
            let allocation =
                RegionAllocator::new(self.config.min_log_wrap).allocate(&mut header.log, sector_size);
            if allocation.case == AllocationCase::Wrap {
                self.db.stats.record_log_wrap();
            }
            self.log_writer = Some(LogWriter::begin(
                &allocation,
                header.log.checksum,
                &self.db.log,
            )?);
        }

        self.worker = Some(WorkerSnapshot::new(shared.next_snapshot_id(), header));
        Ok(())
    }

    /// Opens a read transaction pinned at the latest published snapshot.
    ///
    /// Makes up to `max_read_attempts` attempts (one on a read-only
    /// connection) before reporting [`CoreError::Busy`].
    pub fn begin_read(&mut self) -> CoreResult<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.db.shared);
        let attempts = if self.config.read_only {
            1
        } else {
            self.config.max_read_attempts.max(1)
        };

        for attempt in 1..=attempts {
            let id = shared.current_snapshot_id();
            let header = shared.tree_header();
            match shared.set_read_lock(id, header.generation) {
                Ok(slot) if shared.current_snapshot_id() == id => {
                    self.reader = Some(slot);
                    self.tree_header = header;
                    return Ok(());
                }
                Ok(slot) => shared.release_read_lock(slot),
                Err(CoreError::Busy) => {}
                Err(e) => return Err(e),
            }
            self.db.stats.record_busy_retry();
            tracing::trace!(attempt, "read slot unavailable");
            std::thread::yield_now();
        }

        tracing::warn!(attempts, "giving up on read transaction");
        Err(CoreError::Busy)
    }

    /// Ends the read transaction unless a write transaction or cursor still
    /// needs it.
    pub fn finish_read(&mut self) {
        if self.cursors > 0 || self.stack.open_levels() > 0 || self.worker.is_some() {
            return;
        }
        if let Some(slot) = self.reader.take() {
            self.db.shared.release_read_lock(slot);
        }
    }

    /// Registers an open cursor, starting a read transaction if needed.
    pub fn open_cursor(&mut self) -> CoreResult<()> {
        self.begin_read()?;
        self.cursors += 1;
        Ok(())
    }

    /// Unregisters a cursor. The read transaction ends with the last one
    /// when no write transaction is open.
    pub fn close_cursor(&mut self) {
        self.cursors = self.cursors.saturating_sub(1);
        self.finish_read();
    }

    /// Returns the number of open transaction levels.
    #[must_use]
    pub fn open_levels(&self) -> usize {
        self.stack.open_levels()
    }

    /// Returns the length of the transaction mark array.
    #[must_use]
    pub fn mark_capacity(&self) -> usize {
        self.stack.mark_capacity()
    }

    /// Returns the number of registered cursors.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.cursors
    }

    /// Returns true while a worker snapshot exists.
    #[must_use]
    pub fn has_worker_snapshot(&self) -> bool {
        self.worker.is_some()
    }

    /// Returns true while the connection pins a read slot.
    #[must_use]
    pub fn holds_read_lock(&self) -> bool {
        self.reader.is_some()
    }

    /// Returns the connection's view of the tree header.
    #[must_use]
    pub fn tree_header(&self) -> &TreeHeader {
        &self.tree_header
    }

    /// Returns the database statistics.
    #[must_use]
    pub fn stats(&self) -> &DatabaseStats {
        &self.db.stats
    }

    /// Returns the safety level.
    #[must_use]
    pub fn safety(&self) -> SafetyLevel {
        self.config.safety
    }

    /// Sets the safety level. An open transaction keeps the sector size it
    /// started with.
    pub fn set_safety(&mut self, level: SafetyLevel) {
        self.config.safety = level;
    }

    /// Returns true if write transactions are logged.
    #[must_use]
    pub fn use_log(&self) -> bool {
        self.config.use_log
    }

    /// Enables or disables the log.
    ///
    /// # Errors
    ///
    /// Returns a misuse error while any transaction level is open.
    pub fn set_use_log(&mut self, enabled: bool) -> CoreResult<()> {
        if self.stack.open_levels() > 0 {
            return Err(CoreError::misuse(
                "log cannot be toggled inside a write transaction",
            ));
        }
        self.config.use_log = enabled;
        Ok(())
    }

    /// Returns the auto-flush threshold in KiB.
    #[must_use]
    pub fn auto_flush_kb(&self) -> u64 {
        self.config.auto_flush / 1024
    }

    /// Sets the auto-flush threshold, clamping to `0..=1048576` KiB.
    /// Returns the value now in effect.
    pub fn set_auto_flush_kb(&mut self, kb: i64) -> u64 {
        self.config.auto_flush = clamp_auto_flush_kb(kb) * 1024;
        self.auto_flush_kb()
    }

    /// Returns the auto-checkpoint threshold in KiB.
    #[must_use]
    pub fn auto_checkpoint_kb(&self) -> u64 {
        self.config.auto_checkpoint / 1024
    }

    /// Sets the auto-checkpoint threshold, clamping negatives to 0.
    /// Returns the value now in effect.
    pub fn set_auto_checkpoint_kb(&mut self, kb: i64) -> u64 {
        self.config.auto_checkpoint = clamp_auto_checkpoint_kb(kb) * 1024;
        self.auto_checkpoint_kb()
    }

    /// Returns true if pending flushes run inline at commit.
    #[must_use]
    pub fn auto_work(&self) -> bool {
        self.config.auto_work
    }

    /// Sets whether pending flushes run inline at commit.
    pub fn set_auto_work(&mut self, enabled: bool) {
        self.config.auto_work = enabled;
    }

    /// Registers the hook run when a commit leaves flush work pending and
    /// auto-work is off. The hook runs after the writer lock is released.
    pub fn set_work_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.work_hook = Some(Box::new(hook));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.rollback(0) {
            tracing::warn!(error = %e, "rollback on close failed");
        }
        self.cursors = 0;
        self.finish_read();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open_levels", &self.stack.open_levels())
            .field("reader", &self.reader)
            .field("cursors", &self.cursors)
            .field("worker", &self.worker.as_ref().map(WorkerSnapshot::id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Config, Database, ErrorKind, SafetyLevel};

    #[test]
    fn nested_levels_share_one_lock() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(-1).unwrap();
        assert_eq!(conn.open_levels(), 1);
        conn.begin(3).unwrap();
        assert_eq!(conn.open_levels(), 3);
        assert!(conn.mark_capacity() >= 4);
        assert_eq!(db.stats().writer_lock_acquisitions(), 1);

        conn.begin(2).unwrap();
        assert_eq!(conn.open_levels(), 3);
        conn.commit(0).unwrap();
        assert_eq!(conn.open_levels(), 0);
        assert!(!conn.has_worker_snapshot());
    }

    #[test]
    fn nested_rollback_keeps_outer_writes() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        conn.insert(b"outer", b"1").unwrap();
        conn.begin(2).unwrap();
        conn.insert(b"inner", b"2").unwrap();
        conn.rollback(2).unwrap();
        assert_eq!(conn.open_levels(), 2);
        conn.commit(0).unwrap();

        assert_eq!(conn.get(b"outer"), Some(b"1".to_vec()));
        assert_eq!(conn.get(b"inner"), None);
    }

    #[test]
    fn rollback_to_one_keeps_outer_level_open() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        conn.insert(b"outer", b"1").unwrap();
        conn.begin(3).unwrap();
        conn.insert(b"inner", b"2").unwrap();
        conn.rollback(1).unwrap();
        assert_eq!(conn.open_levels(), 1);
        assert!(conn.has_worker_snapshot());
        assert_eq!(conn.get(b"outer"), None);

        conn.insert(b"after", b"3").unwrap();
        conn.commit(0).unwrap();
        assert_eq!(conn.get(b"after"), Some(b"3".to_vec()));
    }

    #[test]
    fn rollback_to_zero_discards_everything() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        conn.insert(b"k", b"v").unwrap();
        conn.rollback(0).unwrap();
        assert_eq!(conn.get(b"k"), None);
        assert_eq!(conn.open_levels(), 0);
        assert!(!conn.holds_read_lock());
        assert_eq!(db.stats().transactions_rolled_back(), 1);
    }

    #[test]
    fn read_only_rejects_writes() {
        let db = Database::open_in_memory_with_config(Config::new().read_only(true)).unwrap();
        let mut conn = db.connect();
        let err = conn.begin(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);
        assert_eq!(conn.open_levels(), 0);
        assert!(conn.insert(b"k", b"v").is_err());
    }

    #[test]
    fn use_log_locked_during_transaction() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        assert!(conn.set_use_log(false).unwrap_err().is_misuse());
        conn.commit(0).unwrap();
        conn.set_use_log(false).unwrap();
        assert!(!conn.use_log());
    }

    #[test]
    fn thresholds_round_trip_in_kib() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        assert_eq!(conn.auto_flush_kb(), 1024);
        assert_eq!(conn.set_auto_flush_kb(64), 64);
        assert_eq!(conn.set_auto_flush_kb(-3), 0);
        assert_eq!(conn.set_auto_flush_kb(5_000_000), 1024 * 1024);
        assert_eq!(conn.set_auto_checkpoint_kb(-1), 0);
        assert_eq!(conn.set_auto_checkpoint_kb(4096), 4096);
        conn.set_safety(SafetyLevel::Off);
        assert_eq!(conn.safety(), SafetyLevel::Off);
    }

    #[test]
    fn stale_header_is_busy() {
        let db = Database::open_in_memory().unwrap();
        let mut reader = db.connect();
        let mut writer = db.connect();
        reader.begin_read().unwrap();
        writer.insert(b"k", b"v").unwrap();

        let err = reader.begin(1).unwrap_err();
        assert!(matches!(err, crate::CoreError::Busy));
        assert_eq!(reader.open_levels(), 0);
        assert!(!reader.holds_read_lock());

        reader.begin(1).unwrap();
        reader.commit(0).unwrap();
    }

    #[test]
    fn cursor_keeps_read_transaction() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.open_cursor().unwrap();
        conn.finish_read();
        assert!(conn.holds_read_lock());
        conn.close_cursor();
        assert!(!conn.holds_read_lock());
    }

    #[test]
    fn drop_releases_writer_lock() {
        let db = Database::open_in_memory().unwrap();
        {
            let mut conn = db.connect();
            conn.begin(2).unwrap();
        }
        let mut other = db.connect();
        other.insert(b"k", b"v").unwrap();
        assert_eq!(other.get(b"k"), Some(b"v".to_vec()));
    }
}

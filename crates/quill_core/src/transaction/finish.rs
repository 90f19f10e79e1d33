//! Finishing the outermost write transaction.

use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use crate::shared::SharedState;
use crate::snapshot::WorkerSnapshot;
use std::sync::Arc;

/// Releases the writer lock when dropped.
struct WriterRelease<'a>(&'a dyn SharedState);

impl Drop for WriterRelease<'_> {
    fn drop(&mut self) {
        self.0.unlock_writer();
    }
}

impl Connection {
    /// Ends the outermost write transaction.
    ///
    /// On commit the log writer's progress is folded into the worker
    /// snapshot. If the tree has outgrown the auto-flush threshold its
    /// current generation is aged and, with auto-work on, flushed. The
    /// snapshot is then handed to [`finish_work`](Self::finish_work). With
    /// auto-work off, pending flush work is announced to the work hook once
    /// the writer lock is free.
    ///
    /// `checkpoint` forces the snapshot to be synced. An abort always
    /// returns `Ok`.
    pub(crate) fn finish_write_transaction(
        &mut self,
        commit: bool,
        checkpoint: bool,
    ) -> CoreResult<()> {
        let db = Arc::clone(&self.db);

        if commit {
            if let (Some(writer), Some(worker)) = (self.log_writer.as_ref(), self.worker.as_mut()) {
                writer.end(true, &mut worker.header_mut().log);
                db.stats
                    .record_log_activity(writer.bytes_written(), writer.jumps());
            }
        }

        let mut flush_pending = false;
        let status = {
            let mut tree = db.tree.lock();
            if commit && tree.size() > self.config.auto_flush {
                tree.make_old();
                flush_pending = true;
            }
            tree.end_transaction(commit);
            if let Some(worker) = self.worker.as_mut() {
                worker.header_mut().generation = tree.generation();
            }
            if commit && flush_pending && self.config.auto_work {
                tree.flush_to_disk().map(|()| tree.discard_old())
            } else {
                Ok(())
            }
        };

        let status = if commit {
            status
        } else {
            Err(CoreError::transaction_aborted("write transaction rolled back"))
        };
        let auto_flushed = flush_pending && self.config.auto_work && status.is_ok();
        let log_size = self
            .worker
            .as_ref()
            .map_or(0, |worker| worker.header().log.size());
        let force_sync =
            checkpoint || (auto_flushed && log_size >= self.config.auto_checkpoint);

        let result = self.finish_work(force_sync, status);

        if flush_pending && !self.config.auto_work {
            if let Some(hook) = self.work_hook.as_mut() {
                hook();
            }
        }

        if !commit {
            db.stats.record_transaction_rollback();
            return Ok(());
        }
        if result.is_ok() {
            db.stats.record_transaction_commit();
            if auto_flushed {
                db.stats.record_auto_flush();
            }
            if force_sync {
                db.stats.record_checkpoint();
            }
        }
        result
    }

    /// Publishes the worker snapshot and releases the writer lock.
    ///
    /// With a successful `status` the snapshot is persisted (synced when
    /// `force_sync`), the connection's header is refreshed and its read
    /// lock moved to the new snapshot. A failure at any step skips the
    /// remaining ones. The snapshot is dropped and the writer lock released
    /// on every path.
    pub(crate) fn finish_work(
        &mut self,
        force_sync: bool,
        status: CoreResult<()>,
    ) -> CoreResult<()> {
        let shared = Arc::clone(&self.db.shared);
        let _release = WriterRelease(&*shared);
        self.log_writer = None;

        let Some(worker) = self.worker.take() else {
            return match status {
                Ok(()) => Err(CoreError::misuse("no write transaction to finish")),
                Err(e) => Err(e),
            };
        };

        let mut status = status;
        if status.is_ok() {
            status = shared.persist_worker_snapshot(&worker, force_sync);
            if status.is_ok() {
                self.tree_header = worker.header().clone();
            }
        }
        if status.is_ok() && self.reader.is_none() {
            self.tree_header = shared.tree_header();
        }
        if status.is_ok() {
            status = self.move_read_lock(&*shared, &worker);
        }

        if let Err(e) = &status {
            if !matches!(e, CoreError::TransactionAborted { .. }) {
                tracing::warn!(snapshot = %worker.id(), error = %e, "worker snapshot not published");
            }
        }
        status
    }

    fn move_read_lock(
        &mut self,
        shared: &dyn SharedState,
        worker: &WorkerSnapshot,
    ) -> CoreResult<()> {
        let slot = shared.set_read_lock(worker.id(), self.tree_header.generation)?;
        if let Some(previous) = self.reader.replace(slot) {
            shared.release_read_lock(previous);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::shared::SharedState;
    use crate::{CoreError, Database};

    #[test]
    fn finish_without_worker_still_unlocks() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        db.shared().lock_writer().unwrap();

        let err = conn
            .finish_work(false, Err(CoreError::Busy))
            .unwrap_err();
        assert!(matches!(err, CoreError::Busy));
        assert!(!db.shared().writer_locked());
        assert!(!conn.has_worker_snapshot());
    }

    #[test]
    fn error_status_skips_publication() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        conn.insert(b"k", b"v").unwrap();
        let before = db.shared().current_snapshot_id();

        let result = conn.finish_work(false, Err(CoreError::misuse("injected")));
        assert!(result.is_err());
        assert!(!conn.has_worker_snapshot());
        assert!(!db.shared().writer_locked());
        assert_eq!(db.shared().current_snapshot_id(), before);
        conn.stack.close_to(0);
    }

    #[test]
    fn commit_moves_read_lock_to_new_snapshot() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        conn.insert(b"k", b"v").unwrap();
        conn.commit(0).unwrap();
        assert_eq!(conn.tree_header(), &db.shared().tree_header());
        assert_eq!(conn.tree_header().transaction_id, 1);
        assert!(db.shared().current_snapshot_id().as_u64() >= 1);
    }

    #[test]
    fn work_hook_runs_when_auto_work_is_off() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.set_auto_work(false);
        conn.set_auto_flush_kb(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        conn.set_work_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.insert(b"k", b"v").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.stats().auto_flushes(), 0);
    }

    #[test]
    fn auto_flush_runs_inline() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.set_auto_flush_kb(0);
        conn.set_auto_checkpoint_kb(0);
        conn.insert(b"k", b"v").unwrap();
        assert_eq!(db.stats().auto_flushes(), 1);
        assert_eq!(db.stats().checkpoints(), 1);
        assert!(db.shared().synced_checkpoint().is_some());
        assert_eq!(conn.get(b"k"), Some(b"v".to_vec()));
    }
}

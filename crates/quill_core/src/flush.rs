//! Synchronous flush of the in-memory tree.

use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;

impl Connection {
    /// Writes the in-memory tree to durable storage and retires one tree
    /// generation, returning once the result is synced.
    ///
    /// The flush runs as its own write transaction: the tree is flushed, any
    /// generation that was already old is discarded, then the flushed
    /// generation is aged and discarded in turn. The resulting snapshot becomes the synced checkpoint, so
    /// the log space it covers can be reused. If the flush fails the
    /// transaction is aborted. The read transaction is finished on every
    /// path.
    ///
    /// # Errors
    ///
    /// Returns a misuse error if a transaction level or cursor is open, and
    /// [`CoreError::ReadOnly`] on a read-only connection. In both cases
    /// nothing else is touched.
    pub fn flush(&mut self) -> CoreResult<()> {
        if self.stack.open_levels() > 0 || self.cursors > 0 {
            return Err(CoreError::misuse(
                "flush requested while a transaction or cursor is open",
            ));
        }
        if self.config.read_only {
            return Err(CoreError::ReadOnly);
        }

        if let Err(e) = self.begin_write_transaction() {
            self.finish_read();
            return Err(e);
        }

        let db = Arc::clone(&self.db);
        let flushed = {
            let mut tree = db.tree.lock();
            tree.flush_to_disk().map(|()| {
                tree.discard_old();
                tree.make_old();
                tree.discard_old();
            })
        };

        let result = match flushed {
            Ok(()) => self.finish_write_transaction(true, true),
            Err(e) => {
                tracing::warn!(error = %e, "flush to disk failed, aborting");
                if let Err(abort) = self.finish_write_transaction(false, false) {
                    tracing::warn!(error = %abort, "abort after failed flush");
                }
                Err(e)
            }
        };
        self.finish_read();

        if result.is_ok() {
            db.stats.record_flush();
            tracing::info!(
                generation = self.tree_header.generation.as_u32(),
                log_end = self.tree_header.log.end(),
                "flushed tree to disk"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::shared::SharedState;
    use crate::{Config, CoreError, Database};

    #[test]
    fn idle_flush_leaves_nothing_open() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.flush().unwrap();
        assert_eq!(conn.open_levels(), 0);
        assert!(!db.shared().writer_locked());
        assert!(!conn.holds_read_lock());
        assert_eq!(db.stats().flushes(), 1);
    }

    #[test]
    fn flush_inside_transaction_is_misuse() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.begin(1).unwrap();
        assert!(conn.flush().unwrap_err().is_misuse());
        assert_eq!(conn.open_levels(), 1);
        conn.commit(0).unwrap();
    }

    #[test]
    fn flush_with_cursor_is_misuse() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.open_cursor().unwrap();
        assert!(conn.flush().unwrap_err().is_misuse());
        conn.close_cursor();
        conn.flush().unwrap();
    }

    #[test]
    fn read_only_flush_is_rejected() {
        let db = Database::open_in_memory_with_config(Config::new().read_only(true)).unwrap();
        let mut conn = db.connect();
        assert!(matches!(conn.flush(), Err(CoreError::ReadOnly)));
        assert!(!db.shared().writer_locked());
        assert_eq!(db.stats().flushes(), 0);
        assert_eq!(db.shared().synced_checkpoint(), None);
    }

    #[test]
    fn flush_ages_current_generation_when_one_is_already_old() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.set_auto_work(false);
        conn.set_auto_flush_kb(0);
        conn.insert(b"a", b"1").unwrap();
        conn.set_auto_flush_kb(1024);
        conn.insert(b"b", b"2").unwrap();
        let before = conn.tree_header().generation.as_u32();

        conn.flush().unwrap();
        assert_eq!(conn.tree_header().generation.as_u32(), before + 1);
        assert_eq!(conn.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(conn.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn flush_records_synced_checkpoint() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.connect();
        conn.insert(b"a", b"1").unwrap();
        conn.insert(b"b", b"2").unwrap();
        let log_end = conn.tree_header().log.end();
        conn.flush().unwrap();

        let checkpoint = db.shared().synced_checkpoint().unwrap();
        assert_eq!(checkpoint.log_offset, log_end);
        assert_eq!(conn.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(conn.tree_header().generation.as_u32(), 1);
    }
}

//! Integration tests for on-disk databases and concurrent connections.

use quill_core::{Config, CoreError, Database, MemTree, ProcessShared, SafetyLevel, SharedState};
use quill_storage::{InMemoryBackend, StorageBackend};
use quill_testkit::{stress_concurrent_writers, with_file_db, StressConfig, TestDatabase};
use std::sync::Arc;

#[test]
fn flushed_header_survives_reopen() {
    let db = TestDatabase::file_with_config(Config::new().safety(SafetyLevel::Full));
    {
        let mut conn = db.connect();
        conn.insert(b"a", b"1").unwrap();
        conn.insert(b"b", b"2").unwrap();
        conn.flush().unwrap();
    }
    let flushed = db.shared().tree_header();
    let checkpoint = db.shared().synced_checkpoint().unwrap();
    db.connect().insert(b"c", b"3").unwrap();

    let db = db.reopen();
    assert_eq!(db.shared().tree_header(), flushed);
    assert_eq!(db.shared().synced_checkpoint(), Some(checkpoint));

    let mut conn = db.connect();
    conn.insert(b"d", b"4").unwrap();
    assert_eq!(conn.tree_header().transaction_id, flushed.transaction_id + 1);
    assert!(db.shared().current_snapshot_id() > checkpoint.snapshot_id);
}

#[test]
fn only_full_safety_commits_survive_power_loss() {
    for (safety, survives) in [(SafetyLevel::Full, true), (SafetyLevel::Normal, false)] {
        let log = InMemoryBackend::with_sector_size(512);
        let db = Database::open_with_parts(
            Config::new().safety(safety),
            Arc::new(ProcessShared::new()),
            Box::new(MemTree::new()),
            Box::new(log.handle()),
        );
        db.connect().insert(b"k", b"v").unwrap();
        let written = log.size().unwrap();
        assert!(written > 0);

        log.crash();
        assert_eq!(log.size().unwrap() == written, survives, "{safety:?}");
    }
}

#[test]
fn second_open_of_directory_is_rejected() {
    with_file_db(|_db, path| {
        let err = Database::open(path).unwrap_err();
        assert!(matches!(err, CoreError::DatabaseLocked));
    });
}

#[test]
fn concurrent_writers_serialize_on_the_writer_lock() {
    let db = Arc::new(TestDatabase::memory().db);
    let config = StressConfig {
        operations: 200,
        threads: 4,
        key_count: 20,
        value_size: 16,
        max_busy_retries: 100_000,
    };

    let result = stress_concurrent_writers(Arc::clone(&db), &config);
    result.log_summary("concurrent_writers");
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.successful_ops, 200);
    assert_eq!(db.stats().transactions_committed(), 200);
    assert_eq!(db.shared().tree_header().transaction_id, 200);
    assert!(!db.shared().writer_locked());
}

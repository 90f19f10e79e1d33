//! Integration tests for opening, committing and rolling back write
//! transactions against instrumented collaborators.

use quill_core::{Config, CoreError, ErrorKind, SafetyLevel, SharedState};
use quill_testkit::{calls, InstrumentedDatabase, TestDatabase};

fn lock_counts(db: &InstrumentedDatabase) -> (usize, usize) {
    (
        db.probe.count(calls::LOCK_WRITER),
        db.probe.count(calls::UNLOCK_WRITER),
    )
}

#[test]
fn nested_open_takes_the_writer_lock_once() {
    let db = InstrumentedDatabase::new(Config::default());
    let mut conn = db.connect();

    conn.begin(-1).unwrap();
    assert_eq!(conn.open_levels(), 1);
    assert!(conn.mark_capacity() >= 2);
    assert!(conn.has_worker_snapshot());
    assert_eq!(lock_counts(&db), (1, 0));

    conn.begin(3).unwrap();
    assert_eq!(conn.open_levels(), 3);
    assert!(conn.mark_capacity() >= 4);
    assert_eq!(lock_counts(&db), (1, 0));

    conn.commit(0).unwrap();
    assert_eq!(lock_counts(&db), (1, 1));
    assert!(!db.shared().writer_locked());
}

#[test]
fn reopening_open_levels_changes_nothing() {
    let db = InstrumentedDatabase::new(Config::default());
    let mut conn = db.connect();
    conn.begin(4).unwrap();
    let capacity = conn.mark_capacity();

    for level in 0..=4 {
        conn.begin(level).unwrap();
        assert_eq!(conn.open_levels(), 4);
        assert_eq!(conn.mark_capacity(), capacity);
    }
    assert_eq!(db.probe.count(calls::LOCK_WRITER), 1);
    conn.rollback(0).unwrap();
}

#[test]
fn read_only_connection_rejects_every_level() {
    let db = InstrumentedDatabase::new(Config::new().read_only(true));
    let mut conn = db.connect();

    for level in [1, 2, 7, -1] {
        let err = conn.begin(level).unwrap_err();
        assert!(matches!(err, CoreError::ReadOnly));
        assert_eq!(err.kind(), ErrorKind::Misuse);
        assert_eq!(conn.open_levels(), 0);
        assert_eq!(conn.mark_capacity(), 0);
    }
    assert_eq!(db.probe.count(calls::LOCK_WRITER), 0);
}

#[test]
fn rollback_releases_lock_once() {
    let db = InstrumentedDatabase::new(Config::default());
    let mut conn = db.connect();
    conn.begin(2).unwrap();
    conn.insert(b"k", b"v").unwrap();
    conn.rollback(0).unwrap();

    assert_eq!(lock_counts(&db), (1, 1));
    assert_eq!(db.probe.count(calls::PERSIST), 0);
    assert!(!conn.has_worker_snapshot());
    assert!(!conn.holds_read_lock());
    assert_eq!(conn.get(b"k"), None);
}

#[test]
fn persist_failure_leaves_no_lock_or_snapshot() {
    let db = InstrumentedDatabase::new(Config::default());
    let mut conn = db.connect();
    db.probe.fail(calls::PERSIST);

    let err = conn.insert(b"k", b"v").unwrap_err();
    assert!(matches!(err, CoreError::Io(_)));
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(lock_counts(&db), (1, 1));
    assert!(!db.shared().writer_locked());
    assert!(!conn.has_worker_snapshot());
    assert!(!conn.holds_read_lock());
    assert_eq!(db.probe.count(calls::SET_READ_LOCK), 1);

    db.probe.heal(calls::PERSIST);
    conn.insert(b"k", b"v2").unwrap();
    assert_eq!(conn.get(b"k"), Some(b"v2".to_vec()));
    assert_eq!(lock_counts(&db), (2, 2));
}

#[test]
fn log_write_failure_rolls_back_commit() {
    let db = InstrumentedDatabase::new(Config::default());
    let mut conn = db.connect();
    conn.insert(b"before", b"1").unwrap();
    db.probe.fail(calls::WRITE);

    let err = conn.insert(b"k", b"v").unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert_eq!(conn.get(b"k"), None);
    assert_eq!(conn.get(b"before"), Some(b"1".to_vec()));
    assert!(!db.shared().writer_locked());
    assert_eq!(conn.open_levels(), 0);
    assert_eq!(db.stats().transactions_rolled_back(), 1);

    db.probe.heal(calls::WRITE);
    conn.insert(b"k", b"v").unwrap();
    assert_eq!(conn.get(b"k"), Some(b"v".to_vec()));
}

#[test]
fn full_safety_pads_commits_and_syncs() {
    let db = InstrumentedDatabase::with_sector_size(Config::new().safety(SafetyLevel::Full), 512);
    let mut conn = db.connect();
    conn.insert(b"a", b"1").unwrap();
    conn.insert(b"b", b"2").unwrap();

    let size = db.log_file().size().unwrap();
    assert_eq!(size, 1024);
    assert_eq!(conn.tree_header().log.end(), 1024);
    assert_eq!(db.probe.count(calls::SYNC), 2);
}

#[test]
fn normal_safety_neither_pads_nor_syncs() {
    let db = InstrumentedDatabase::with_sector_size(Config::default(), 512);
    let mut conn = db.connect();
    conn.insert(b"a", b"1").unwrap();

    assert!(db.log_file().size().unwrap() < 512);
    assert_eq!(db.probe.count(calls::SYNC), 0);
}

#[test]
fn disabled_log_writes_nothing() {
    let db = InstrumentedDatabase::new(Config::new().use_log(false));
    let mut conn = db.connect();
    conn.insert(b"k", b"v").unwrap();

    assert_eq!(db.log_file().size().unwrap(), 0);
    assert_eq!(db.probe.count(calls::WRITE), 0);
    assert_eq!(conn.get(b"k"), Some(b"v".to_vec()));
    assert_eq!(conn.tree_header().transaction_id, 1);
}

#[test]
fn second_connection_sees_committed_header() {
    let db = TestDatabase::memory();
    let mut writer = db.connect();
    writer.insert(b"k", b"v").unwrap();

    let mut reader = db.connect();
    reader.begin_read().unwrap();
    assert_eq!(reader.tree_header(), writer.tree_header());
    assert_eq!(reader.get(b"k"), Some(b"v".to_vec()));
    reader.finish_read();
    assert!(!reader.holds_read_lock());
}

#[test]
fn busy_when_all_read_slots_are_pinned() {
    let db = TestDatabase::memory_with_config(Config::new().max_read_attempts(3));
    let shared = db.shared();
    let slots: Vec<_> = (0..quill_core::READER_SLOTS as u64)
        .map(|i| {
            shared
                .set_read_lock(quill_core::SnapshotId::new(1000 + i), Default::default())
                .unwrap()
        })
        .collect();

    let mut conn = db.connect();
    let err = conn.begin(1).unwrap_err();
    assert!(matches!(err, CoreError::Busy));
    assert_eq!(conn.open_levels(), 0);
    assert_eq!(db.stats().busy_retries(), 3);

    for slot in slots {
        shared.release_read_lock(slot);
    }
    conn.begin(1).unwrap();
    conn.commit(0).unwrap();
}

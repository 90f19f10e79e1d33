//! Instrumented collaborators.
//!
//! Each double wraps the real implementation, records every call it sees in
//! a shared [`Probe`], and fails on demand. Tests keep a handle on the probe
//! while the database owns the double.

use crate::fixtures::init_tracing;
use parking_lot::Mutex;
use quill_core::{
    Config, CoreError, CoreResult, Database, Generation, MemTree, ProcessShared, ReaderSlot,
    SharedState, SnapshotId, SyncedCheckpoint, TreeHeader, TreeMark, TreeStore, WorkerSnapshot,
};
use quill_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

/// Names under which the doubles record calls.
pub mod calls {
    /// [`SharedState::lock_writer`](quill_core::SharedState::lock_writer)
    pub const LOCK_WRITER: &str = "lock_writer";
    /// [`SharedState::unlock_writer`](quill_core::SharedState::unlock_writer)
    pub const UNLOCK_WRITER: &str = "unlock_writer";
    /// [`SharedState::persist_worker_snapshot`](quill_core::SharedState::persist_worker_snapshot)
    pub const PERSIST: &str = "persist";
    /// [`SharedState::set_read_lock`](quill_core::SharedState::set_read_lock)
    pub const SET_READ_LOCK: &str = "set_read_lock";
    /// [`SharedState::release_read_lock`](quill_core::SharedState::release_read_lock)
    pub const RELEASE_READ_LOCK: &str = "release_read_lock";
    /// [`TreeStore::flush_to_disk`](quill_core::TreeStore::flush_to_disk)
    pub const FLUSH_TO_DISK: &str = "flush_to_disk";
    /// [`TreeStore::make_old`](quill_core::TreeStore::make_old)
    pub const MAKE_OLD: &str = "make_old";
    /// [`TreeStore::discard_old`](quill_core::TreeStore::discard_old)
    pub const DISCARD_OLD: &str = "discard_old";
    /// [`TreeStore::end_transaction`](quill_core::TreeStore::end_transaction)
    pub const END_TRANSACTION: &str = "end_transaction";
    /// [`StorageBackend::write_at`](quill_storage::StorageBackend::write_at)
    pub const WRITE: &str = "write";
    /// [`StorageBackend::sync`](quill_storage::StorageBackend::sync)
    pub const SYNC: &str = "sync";
}

/// Call recorder and failure switchboard shared between a test and its
/// doubles.
#[derive(Debug, Default)]
pub struct Probe {
    calls: Mutex<Vec<&'static str>>,
    failing: Mutex<BTreeSet<&'static str>>,
}

impl Probe {
    /// Creates an empty probe.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records a call.
    pub fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    /// Returns how many times `call` was recorded.
    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Returns every recorded call in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Returns the recorded calls among `names`, in order.
    pub fn calls_among(&self, names: &[&str]) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .copied()
            .filter(|c| names.contains(c))
            .collect()
    }

    /// Forgets recorded calls. Injected failures stay armed.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Makes every later `call` fail.
    pub fn fail(&self, call: &'static str) {
        self.failing.lock().insert(call);
    }

    /// Stops failing `call`.
    pub fn heal(&self, call: &str) {
        self.failing.lock().remove(call);
    }

    /// Returns true if `call` should fail.
    pub fn should_fail(&self, call: &str) -> bool {
        self.failing.lock().contains(call)
    }
}

fn injected(call: &str) -> io::Error {
    io::Error::other(format!("injected {call} failure"))
}

/// [`ProcessShared`] that records its calls.
#[derive(Debug)]
pub struct RecordingShared {
    inner: ProcessShared,
    probe: Arc<Probe>,
}

impl RecordingShared {
    /// Wraps fresh in-memory shared state.
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            inner: ProcessShared::new(),
            probe,
        }
    }

    /// Returns the wrapped state.
    pub fn inner(&self) -> &ProcessShared {
        &self.inner
    }
}

impl SharedState for RecordingShared {
    fn lock_writer(&self) -> CoreResult<()> {
        self.probe.record(calls::LOCK_WRITER);
        if self.probe.should_fail(calls::LOCK_WRITER) {
            return Err(CoreError::Busy);
        }
        self.inner.lock_writer()
    }

    fn unlock_writer(&self) {
        self.probe.record(calls::UNLOCK_WRITER);
        self.inner.unlock_writer();
    }

    fn writer_locked(&self) -> bool {
        self.inner.writer_locked()
    }

    fn tree_header(&self) -> TreeHeader {
        self.inner.tree_header()
    }

    fn current_snapshot_id(&self) -> SnapshotId {
        self.inner.current_snapshot_id()
    }

    fn next_snapshot_id(&self) -> SnapshotId {
        self.inner.next_snapshot_id()
    }

    fn persist_worker_snapshot(
        &self,
        snapshot: &WorkerSnapshot,
        force_sync: bool,
    ) -> CoreResult<()> {
        self.probe.record(calls::PERSIST);
        if self.probe.should_fail(calls::PERSIST) {
            return Err(CoreError::Io(injected(calls::PERSIST)));
        }
        self.inner.persist_worker_snapshot(snapshot, force_sync)
    }

    fn set_read_lock(
        &self,
        snapshot_id: SnapshotId,
        generation: Generation,
    ) -> CoreResult<ReaderSlot> {
        self.probe.record(calls::SET_READ_LOCK);
        if self.probe.should_fail(calls::SET_READ_LOCK) {
            return Err(CoreError::Busy);
        }
        self.inner.set_read_lock(snapshot_id, generation)
    }

    fn release_read_lock(&self, slot: ReaderSlot) {
        self.probe.record(calls::RELEASE_READ_LOCK);
        self.inner.release_read_lock(slot);
    }

    fn synced_checkpoint(&self) -> Option<SyncedCheckpoint> {
        self.inner.synced_checkpoint()
    }
}

/// [`MemTree`] that records generation and flush calls.
#[derive(Debug)]
pub struct RecordingTree {
    inner: MemTree,
    probe: Arc<Probe>,
}

impl RecordingTree {
    /// Wraps an empty tree.
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            inner: MemTree::new(),
            probe,
        }
    }
}

impl TreeStore for RecordingTree {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.inner.insert(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.inner.delete(key)
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn generation(&self) -> Generation {
        self.inner.generation()
    }

    fn mark(&self) -> TreeMark {
        self.inner.mark()
    }

    fn rollback(&mut self, mark: &TreeMark) {
        self.inner.rollback(mark);
    }

    fn end_transaction(&mut self, commit: bool) {
        self.probe.record(calls::END_TRANSACTION);
        self.inner.end_transaction(commit);
    }

    fn has_old(&self) -> bool {
        self.inner.has_old()
    }

    fn make_old(&mut self) {
        self.probe.record(calls::MAKE_OLD);
        self.inner.make_old();
    }

    fn discard_old(&mut self) {
        self.probe.record(calls::DISCARD_OLD);
        self.inner.discard_old();
    }

    fn flush_to_disk(&mut self) -> CoreResult<()> {
        self.probe.record(calls::FLUSH_TO_DISK);
        if self.probe.should_fail(calls::FLUSH_TO_DISK) {
            return Err(CoreError::Io(injected(calls::FLUSH_TO_DISK)));
        }
        self.inner.flush_to_disk()
    }
}

/// In-memory storage whose writes and syncs fail on demand.
#[derive(Debug)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    probe: Arc<Probe>,
}

impl FaultyBackend {
    /// Wraps an empty in-memory backend with the given sector size.
    pub fn new(probe: Arc<Probe>, sector_size: usize) -> Self {
        Self {
            inner: InMemoryBackend::with_sector_size(sector_size),
            probe,
        }
    }

    fn check(&self, call: &'static str) -> StorageResult<()> {
        self.probe.record(call);
        if self.probe.should_fail(call) {
            return Err(StorageError::Io(injected(call)));
        }
        Ok(())
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check(calls::WRITE)?;
        self.inner.append(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check(calls::WRITE)?;
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check(calls::SYNC)?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn sector_size(&self) -> usize {
        self.inner.sector_size()
    }
}

/// A database assembled from the recording doubles, all sharing one probe.
pub struct InstrumentedDatabase {
    /// The database instance.
    pub db: Database,
    /// Probe shared by the shared state, the tree and the log storage.
    pub probe: Arc<Probe>,
}

impl InstrumentedDatabase {
    /// Creates a database whose log storage reports 512-byte sectors.
    pub fn new(config: Config) -> Self {
        Self::with_sector_size(config, 512)
    }

    /// Creates a database whose log storage reports `sector_size`.
    pub fn with_sector_size(config: Config, sector_size: usize) -> Self {
        init_tracing();
        let probe = Probe::new();
        let db = Database::open_with_parts(
            config,
            Arc::new(RecordingShared::new(Arc::clone(&probe))),
            Box::new(RecordingTree::new(Arc::clone(&probe))),
            Box::new(FaultyBackend::new(Arc::clone(&probe), sector_size)),
        );
        Self { db, probe }
    }
}

impl std::ops::Deref for InstrumentedDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

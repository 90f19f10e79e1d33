//! State shared by every connection to a database.
//!
//! Connections coordinate through three things: an exclusive writer lock,
//! a small table of read-lock slots pinning snapshots, and the published
//! tree header that describes the latest committed state.

use crate::error::{CoreError, CoreResult};
use crate::snapshot::{SnapshotStore, SyncedCheckpoint, TreeHeader, WorkerSnapshot};
use crate::types::{Generation, ReaderSlot, SnapshotId};
use parking_lot::{Condvar, Mutex, RwLock};
use quill_storage::{InMemoryBackend, StorageBackend};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of read-lock slots.
pub const READER_SLOTS: usize = 6;

/// Cross-connection coordination used by the write path.
pub trait SharedState: Send + Sync {
    /// Takes the writer lock, blocking until it is free.
    fn lock_writer(&self) -> CoreResult<()>;

    /// Releases the writer lock.
    fn unlock_writer(&self);

    /// Returns true while some connection holds the writer lock.
    fn writer_locked(&self) -> bool;

    /// Returns the published tree header.
    fn tree_header(&self) -> TreeHeader;

    /// Returns the id of the published snapshot.
    fn current_snapshot_id(&self) -> SnapshotId;

    /// Reserves a fresh snapshot id.
    fn next_snapshot_id(&self) -> SnapshotId;

    /// Publishes a worker snapshot. With `force_sync` the snapshot is first
    /// made durable and becomes the synced checkpoint.
    fn persist_worker_snapshot(&self, snapshot: &WorkerSnapshot, force_sync: bool)
        -> CoreResult<()>;

    /// Pins a read slot at the given snapshot and generation.
    fn set_read_lock(&self, snapshot_id: SnapshotId, generation: Generation)
        -> CoreResult<ReaderSlot>;

    /// Unpins a slot returned by [`set_read_lock`](Self::set_read_lock).
    fn release_read_lock(&self, slot: ReaderSlot);

    /// Returns the most recent durable checkpoint.
    fn synced_checkpoint(&self) -> Option<SyncedCheckpoint>;
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadSlot {
    snapshot_id: SnapshotId,
    generation: Generation,
    holders: usize,
}

/// In-process [`SharedState`].
///
/// Every connection created from the same database shares one instance.
pub struct ProcessShared {
    writer: Mutex<bool>,
    writer_released: Condvar,
    header: RwLock<TreeHeader>,
    current_id: AtomicU64,
    last_id: AtomicU64,
    readers: Mutex<[ReadSlot; READER_SLOTS]>,
    store: Mutex<SnapshotStore>,
    synced: Mutex<Option<SyncedCheckpoint>>,
}

impl ProcessShared {
    /// Creates shared state backed by an in-memory snapshot store.
    pub fn new() -> Self {
        Self::from_parts(
            SnapshotStore::new(Box::new(InMemoryBackend::new())),
            None,
        )
    }

    /// Creates shared state over a durable snapshot store, resuming from the
    /// newest snapshot it holds.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let store = SnapshotStore::new(backend);
        let latest = store.load_latest()?;
        if let Some(snapshot) = &latest {
            tracing::info!(
                snapshot = %snapshot.id(),
                log_end = snapshot.header().log.end(),
                "resumed from persisted snapshot"
            );
        }
        Ok(Self::from_parts(store, latest))
    }

    fn from_parts(store: SnapshotStore, latest: Option<WorkerSnapshot>) -> Self {
        let (header, id, synced) = match latest {
            Some(snapshot) => (
                snapshot.header().clone(),
                snapshot.id(),
                Some(SyncedCheckpoint::of(&snapshot)),
            ),
            None => (TreeHeader::default(), SnapshotId::default(), None),
        };
        Self {
            writer: Mutex::new(false),
            writer_released: Condvar::new(),
            header: RwLock::new(header),
            current_id: AtomicU64::new(id.as_u64()),
            last_id: AtomicU64::new(id.as_u64()),
            readers: Mutex::new([ReadSlot::default(); READER_SLOTS]),
            store: Mutex::new(store),
            synced: Mutex::new(synced),
        }
    }

    /// Returns how many read slots are pinned.
    #[must_use]
    pub fn readers_in_use(&self) -> usize {
        self.readers.lock().iter().filter(|s| s.holders > 0).count()
    }
}

impl Default for ProcessShared {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessShared")
            .field("writer_locked", &*self.writer.lock())
            .field("current_id", &self.current_id.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SharedState for ProcessShared {
    fn lock_writer(&self) -> CoreResult<()> {
        let mut held = self.writer.lock();
        while *held {
            self.writer_released.wait(&mut held);
        }
        *held = true;
        Ok(())
    }

    fn unlock_writer(&self) {
        *self.writer.lock() = false;
        self.writer_released.notify_one();
    }

    fn writer_locked(&self) -> bool {
        *self.writer.lock()
    }

    fn tree_header(&self) -> TreeHeader {
        self.header.read().clone()
    }

    fn current_snapshot_id(&self) -> SnapshotId {
        SnapshotId::new(self.current_id.load(Ordering::Acquire))
    }

    fn next_snapshot_id(&self) -> SnapshotId {
        SnapshotId::new(self.last_id.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn persist_worker_snapshot(
        &self,
        snapshot: &WorkerSnapshot,
        force_sync: bool,
    ) -> CoreResult<()> {
        if force_sync {
            self.store.lock().write(snapshot)?;
            *self.synced.lock() = Some(SyncedCheckpoint::of(snapshot));
            tracing::debug!(snapshot = %snapshot.id(), "snapshot synced");
        }
        let mut header = self.header.write();
        *header = snapshot.header().clone();
        self.current_id
            .store(snapshot.id().as_u64(), Ordering::Release);
        Ok(())
    }

    fn set_read_lock(
        &self,
        snapshot_id: SnapshotId,
        generation: Generation,
    ) -> CoreResult<ReaderSlot> {
        let mut readers = self.readers.lock();
        let matching = readers
            .iter()
            .position(|s| s.snapshot_id == snapshot_id && s.generation == generation);
        let index = match matching.or_else(|| readers.iter().position(|s| s.holders == 0)) {
            Some(index) => index,
            None => return Err(CoreError::Busy),
        };

        let slot = &mut readers[index];
        if slot.holders == 0 {
            slot.snapshot_id = snapshot_id;
            slot.generation = generation;
        }
        slot.holders += 1;
        Ok(ReaderSlot::new(index))
    }

    fn release_read_lock(&self, slot: ReaderSlot) {
        if let Some(s) = self.readers.lock().get_mut(slot.index()) {
            s.holders = s.holders.saturating_sub(1);
        }
    }

    fn synced_checkpoint(&self) -> Option<SyncedCheckpoint> {
        *self.synced.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn snapshot_ids_increase() {
        let shared = ProcessShared::new();
        let a = shared.next_snapshot_id();
        let b = shared.next_snapshot_id();
        assert!(b > a);
        assert_eq!(shared.current_snapshot_id(), SnapshotId::default());
    }

    #[test]
    fn matching_slot_is_shared() {
        let shared = ProcessShared::new();
        let a = shared.set_read_lock(SnapshotId::new(1), Generation::new(0)).unwrap();
        let b = shared.set_read_lock(SnapshotId::new(1), Generation::new(0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(shared.readers_in_use(), 1);
        shared.release_read_lock(a);
        assert_eq!(shared.readers_in_use(), 1);
        shared.release_read_lock(b);
        assert_eq!(shared.readers_in_use(), 0);
    }

    #[test]
    fn full_slot_table_is_busy() {
        let shared = ProcessShared::new();
        for id in 0..READER_SLOTS as u64 {
            shared.set_read_lock(SnapshotId::new(id), Generation::new(0)).unwrap();
        }
        let err = shared
            .set_read_lock(SnapshotId::new(99), Generation::new(0))
            .unwrap_err();
        assert!(matches!(err, CoreError::Busy));

        shared.release_read_lock(ReaderSlot::new(2));
        let slot = shared.set_read_lock(SnapshotId::new(99), Generation::new(0)).unwrap();
        assert_eq!(slot, ReaderSlot::new(2));
    }

    #[test]
    fn forced_persist_records_checkpoint() {
        let shared = ProcessShared::new();
        let mut header = TreeHeader::default();
        header.log.regions[2].end = 640;
        let id = shared.next_snapshot_id();
        let snapshot = WorkerSnapshot::new(id, header.clone());

        shared.persist_worker_snapshot(&snapshot, false).unwrap();
        assert_eq!(shared.synced_checkpoint(), None);
        assert_eq!(shared.tree_header(), header);
        assert_eq!(shared.current_snapshot_id(), id);

        shared.persist_worker_snapshot(&snapshot, true).unwrap();
        let cp = shared.synced_checkpoint().unwrap();
        assert_eq!(cp.snapshot_id, id);
        assert_eq!(cp.log_offset, 640);
    }

    #[test]
    fn reopen_resumes_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.snapshot");
        let mut header = TreeHeader::default();
        header.transaction_id = 12;
        header.log.regions[2].end = 96;

        let id = {
            let backend = quill_storage::FileBackend::open(&path).unwrap();
            let shared = ProcessShared::open(Box::new(backend)).unwrap();
            let snapshot = WorkerSnapshot::new(shared.next_snapshot_id(), header.clone());
            shared.persist_worker_snapshot(&snapshot, true).unwrap();
            snapshot.id()
        };

        let backend = quill_storage::FileBackend::open(&path).unwrap();
        let shared = ProcessShared::open(Box::new(backend)).unwrap();
        assert_eq!(shared.tree_header(), header);
        assert_eq!(shared.current_snapshot_id(), id);
        assert!(shared.next_snapshot_id() > id);
        assert_eq!(shared.synced_checkpoint().map(|c| c.log_offset), Some(96));
    }

    #[test]
    fn writer_lock_blocks_second_writer() {
        let shared = Arc::new(ProcessShared::new());
        shared.lock_writer().unwrap();
        assert!(shared.writer_locked());

        let other = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            other.lock_writer().unwrap();
            other.unlock_writer();
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        shared.unlock_writer();
        handle.join().unwrap();
        assert!(!shared.writer_locked());
    }
}

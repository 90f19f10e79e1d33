//! Tree headers, worker snapshots and their durable store.
//!
//! ## Snapshot store layout
//!
//! Two fixed 4 KiB meta slots. A snapshot with an even id goes to slot 0,
//! an odd id to slot 1, so a torn write never destroys the newest intact
//! copy.
//!
//! ```text
//! | len (u32 LE) | CBOR payload (len bytes) | crc32 (u32 LE) | zero fill |
//! ```
//!
//! The CRC covers the length prefix and the payload.

use crate::error::{CoreError, CoreResult};
use crate::log::DbLog;
use crate::types::{Generation, SnapshotId};
use quill_storage::StorageBackend;
use serde::{Deserialize, Serialize};

/// Size of one meta slot.
pub const META_SLOT_SIZE: u64 = 4096;

const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// Header of the in-memory tree as seen by readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeHeader {
    /// Tree generation the header describes.
    pub generation: Generation,
    /// Number of write transactions applied.
    pub transaction_id: u64,
    /// Log regions and checksum.
    pub log: DbLog,
}

/// A write transaction's private copy of the tree header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    id: SnapshotId,
    header: TreeHeader,
}

impl WorkerSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(id: SnapshotId, header: TreeHeader) -> Self {
        Self { id, header }
    }

    /// Returns the snapshot id.
    #[must_use]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Returns the header.
    #[must_use]
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Returns the header for modification.
    pub fn header_mut(&mut self) -> &mut TreeHeader {
        &mut self.header
    }
}

/// A snapshot known to be durable, and the log offset it makes redundant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedCheckpoint {
    /// Id of the synced snapshot.
    pub snapshot_id: SnapshotId,
    /// Log records before this offset are no longer needed.
    pub log_offset: u64,
}

impl SyncedCheckpoint {
    /// Derives the checkpoint a snapshot establishes once synced.
    #[must_use]
    pub fn of(snapshot: &WorkerSnapshot) -> Self {
        Self {
            snapshot_id: snapshot.id(),
            log_offset: snapshot.header().log.end(),
        }
    }
}

/// Durable home of the latest worker snapshot.
pub struct SnapshotStore {
    backend: Box<dyn StorageBackend>,
}

impl SnapshotStore {
    /// Wraps a storage backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Writes `snapshot` into its meta slot and syncs.
    pub fn write(&mut self, snapshot: &WorkerSnapshot) -> CoreResult<()> {
        let frame = encode_frame(snapshot)?;
        let slot = snapshot.id().as_u64() % 2;
        self.backend.write_at(slot * META_SLOT_SIZE, &frame)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Loads the newest snapshot that passes validation.
    ///
    /// Slots that are missing, torn or fail their checksum are skipped.
    /// Returns `None` for a fresh store.
    pub fn load_latest(&self) -> CoreResult<Option<WorkerSnapshot>> {
        let size = self.backend.size()?;
        let mut latest: Option<WorkerSnapshot> = None;

        for slot in 0..2u64 {
            let offset = slot * META_SLOT_SIZE;
            if size < offset + (LEN_SIZE + CRC_SIZE) as u64 {
                continue;
            }
            let available = (size - offset).min(META_SLOT_SIZE) as usize;
            let bytes = self.backend.read_at(offset, available)?;
            match decode_frame(&bytes) {
                Ok(Some(snapshot)) => {
                    if latest.as_ref().map_or(true, |l| snapshot.id() > l.id()) {
                        latest = Some(snapshot);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(slot, error = %e, "skipping invalid snapshot slot");
                }
            }
        }
        Ok(latest)
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}

fn encode_frame(snapshot: &WorkerSnapshot) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(snapshot, &mut payload)
        .map_err(|e| CoreError::serialization(e.to_string()))?;

    let frame_len = LEN_SIZE + payload.len() + CRC_SIZE;
    if frame_len as u64 > META_SLOT_SIZE {
        return Err(CoreError::serialization(format!(
            "snapshot frame of {frame_len} bytes exceeds meta slot"
        )));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::serialization("snapshot payload too large"))?;

    let mut frame = Vec::with_capacity(frame_len);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decodes a slot. An all-zero length means the slot was never written.
fn decode_frame(bytes: &[u8]) -> CoreResult<Option<WorkerSnapshot>> {
    let mut len_bytes = [0u8; LEN_SIZE];
    len_bytes.copy_from_slice(&bytes[..LEN_SIZE]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 {
        return Ok(None);
    }
    let crc_start = LEN_SIZE + len;
    if bytes.len() < crc_start + CRC_SIZE {
        return Err(CoreError::snapshot_corruption("truncated snapshot frame"));
    }

    let mut crc_bytes = [0u8; CRC_SIZE];
    crc_bytes.copy_from_slice(&bytes[crc_start..crc_start + CRC_SIZE]);
    let expected = u32::from_le_bytes(crc_bytes);
    let actual = compute_crc32(&bytes[..crc_start]);
    if expected != actual {
        return Err(CoreError::snapshot_corruption(format!(
            "checksum mismatch: expected {expected:08x}, got {actual:08x}"
        )));
    }

    let snapshot = ciborium::from_reader(&bytes[LEN_SIZE..crc_start])
        .map_err(|e| CoreError::serialization(e.to_string()))?;
    Ok(Some(snapshot))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

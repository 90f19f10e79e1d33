//! In-memory storage backend.

use crate::backend::{StorageBackend, DEFAULT_SECTOR_SIZE};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Image {
    bytes: Vec<u8>,
    /// Length of the prefix covered by the last `sync`.
    durable: usize,
}

/// A byte store held in memory.
///
/// Handles made with [`InMemoryBackend::handle`] share one image, which is
/// how tests reopen a log or snapshot store without touching the disk.
/// Bytes written after the last [`sync`](StorageBackend::sync) can be thrown
/// away with [`InMemoryBackend::crash`] to model a power loss.
///
/// The reported sector size is configurable so that full-safety sector
/// rounding can be exercised without a real device.
///
/// # Example
///
/// ```rust
/// use quill_storage::{InMemoryBackend, StorageBackend};
///
/// let mut log = InMemoryBackend::with_sector_size(4096);
/// log.write_at(0, b"synced").unwrap();
/// log.sync().unwrap();
/// log.write_at(6, b" lost").unwrap();
///
/// let reopened = log.handle();
/// log.crash();
/// assert_eq!(reopened.read_at(0, 6).unwrap(), b"synced");
/// assert_eq!(reopened.size().unwrap(), 6);
/// assert_eq!(reopened.sector_size(), 4096);
/// ```
#[derive(Debug)]
pub struct InMemoryBackend {
    image: Arc<RwLock<Image>>,
    sector_size: usize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::with_sector_size(DEFAULT_SECTOR_SIZE)
    }
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend reporting the given sector size.
    ///
    /// A sector size of zero is treated as one byte.
    #[must_use]
    pub fn with_sector_size(sector_size: usize) -> Self {
        Self {
            image: Arc::new(RwLock::new(Image::default())),
            sector_size: sector_size.max(1),
        }
    }

    /// Returns another backend over the same bytes.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            image: Arc::clone(&self.image),
            sector_size: self.sector_size,
        }
    }

    /// Drops every byte written since the last sync.
    pub fn crash(&self) {
        let mut image = self.image.write();
        let durable = image.durable;
        image.bytes.truncate(durable);
    }

    /// Returns how many leading bytes the last sync made durable.
    #[must_use]
    pub fn durable_len(&self) -> u64 {
        self.image.read().durable as u64
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.image.read().bytes.clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let image = self.image.read();
        let size = image.bytes.len() as u64;
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if offset <= size && end <= image.bytes.len() => {
                Ok(image.bytes[start..end].to_vec())
            }
            _ => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut image = self.image.write();
        let offset = image.bytes.len() as u64;
        image.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut image = self.image.write();
        let start = offset as usize;
        let end = start + data.len();
        if end > image.bytes.len() {
            image.bytes.resize(end, 0);
        }
        image.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.image.read().bytes.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut image = self.image.write();
        image.durable = image.bytes.len();
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut image = self.image.write();
        let size = image.bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        let len = new_size as usize;
        image.bytes.truncate(len);
        image.durable = image.durable.min(len);
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }
}

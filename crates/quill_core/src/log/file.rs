//! Shared handle to the log's storage backend.

use crate::error::CoreResult;
use parking_lot::Mutex;
use quill_storage::StorageBackend;
use std::sync::Arc;

/// Positional access to the log file.
///
/// Cloning is cheap; all clones share the same backend.
#[derive(Clone)]
pub struct LogFile {
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
}

impl LogFile {
    /// Wraps a storage backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    /// Writes `data` at `offset`.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.backend.lock().write_at(offset, data)?;
        Ok(())
    }

    /// Reads `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.lock().read_at(offset, len)?)
    }

    /// Flushes buffered writes to the OS.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Flushes and syncs to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Returns the file size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns the device sector size.
    pub fn sector_size(&self) -> usize {
        self.backend.lock().sector_size()
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile").finish_non_exhaustive()
    }
}

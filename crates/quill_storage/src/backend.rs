//! Storage backend trait definition.

use crate::error::StorageResult;

/// Sector size reported when the platform cannot tell us better.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// A low-level storage backend for quill.
///
/// Storage backends are **opaque byte stores**. The log file is a bounded,
/// wrapping file, so besides appending, backends support writing at an
/// arbitrary offset. quill owns all format interpretation.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `write_at` past the current end extends the storage, zero-filling any gap
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes buffered data to the OS, `sync` makes it durable
/// - `sector_size` is always greater than zero
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Writes `data` at `offset`, overwriting whatever was there.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns the physical sector size of the underlying device.
    ///
    /// Writes that must survive power loss are rounded to this size when the
    /// connection runs with full safety.
    fn sector_size(&self) -> usize {
        DEFAULT_SECTOR_SIZE
    }
}

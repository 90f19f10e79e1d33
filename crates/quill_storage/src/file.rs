//! Backend over a single operating-system file.

use crate::backend::{StorageBackend, DEFAULT_SECTOR_SIZE};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct OpenFile {
    file: File,
    len: u64,
}

impl OpenFile {
    fn seek_to(&mut self, offset: u64) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// A byte store kept in one file.
///
/// `flush` hands buffered bytes to the OS, `sync` calls `sync_data` so the
/// log and snapshot slots survive power loss. The sector size is the
/// allocation granularity of the filesystem holding the file, falling back
/// to [`DEFAULT_SECTOR_SIZE`].
///
/// # Example
///
/// ```no_run
/// use quill_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("quill.log")).unwrap();
/// log.write_at(0, b"record").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
    sector_size: usize,
}

impl FileBackend {
    /// Opens the file at `path`, creating it empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        let sector_size = fs2::allocation_granularity(path)
            .ok()
            .and_then(|g| usize::try_from(g).ok())
            .filter(|&g| g > 0)
            .unwrap_or(DEFAULT_SECTOR_SIZE);

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile { file, len }),
            sector_size,
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.len;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => {}
            _ => return Err(StorageError::ReadPastEnd { offset, len, size }),
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.seek_to(offset)?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.len;
        if !data.is_empty() {
            inner.seek_to(offset)?;
            inner.file.write_all(data)?;
            inner.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let inner = self.inner.get_mut();
        inner.seek_to(offset)?;
        inner.file.write_all(data)?;
        inner.len = inner.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: inner.len,
            });
        }
        inner.file.set_len(new_size)?;
        inner.len = new_size;
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }
}

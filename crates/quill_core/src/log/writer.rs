//! Log writer for one outermost write transaction.

use crate::error::{CoreError, CoreResult};
use crate::log::allocator::LogAllocation;
use crate::log::checksum::LogChecksum;
use crate::log::file::LogFile;
use crate::log::record::{
    self, LogRecordType, COMMIT_RECORD_SIZE, MAX_JUMP_OVERHEAD, WRAP_MARKER,
};
use crate::log::region::{DbLog, LogRegion};

/// Initial capacity of the append buffer.
const INITIAL_BUFFER: usize = 4096;

/// Appends records for a single write transaction.
///
/// Records accumulate in memory and reach the file when the writer jumps
/// over a live region or when the transaction commits. The writer is created
/// when the first transaction level opens and dropped when the transaction
/// finishes.
#[derive(Debug)]
pub struct LogWriter {
    buf: Vec<u8>,
    sector_size: usize,
    jump: Option<LogRegion>,
    /// File offset of `buf[0]`.
    offset: u64,
    checksum: LogChecksum,
    /// End of the bytes written before the jump, or 0 if no jump was taken.
    region1_end: u64,
    region2_start: u64,
    bytes_written: u64,
    jumps: u64,
}

/// Writer position captured by [`LogWriter::tell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMark {
    offset: u64,
    buffered: Vec<u8>,
    checksum: LogChecksum,
    region1_end: u64,
    region2_start: u64,
}

impl LogMark {
    /// Returns the file offset the next record would have been written at.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset + self.buffered.len() as u64
    }
}

impl LogWriter {
    /// Creates a writer for `allocation`, writing the wrap marker first when
    /// the log wrapped.
    ///
    /// `checksum` is the log's running checksum; it restarts from zero
    /// after a wrap.
    pub fn begin(
        allocation: &LogAllocation,
        checksum: LogChecksum,
        file: &LogFile,
    ) -> CoreResult<Self> {
        let mut buf = Vec::new();
        buf.try_reserve(INITIAL_BUFFER)
            .map_err(|e| CoreError::from_reserve("log writer buffer", e))?;

        let mut checksum = checksum;
        if let Some(marker_offset) = allocation.marker_offset {
            file.write_at(marker_offset, &WRAP_MARKER)?;
            checksum.reset();
            tracing::debug!(marker_offset, "log wrapped to offset 0");
        }

        Ok(Self {
            buf,
            sector_size: allocation.sector_size.max(1),
            jump: allocation.jump,
            offset: allocation.offset,
            checksum,
            region1_end: 0,
            region2_start: 0,
            bytes_written: 0,
            jumps: 0,
        })
    }

    /// Returns the offset the next record will be written at.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset + self.buf.len() as u64
    }

    /// Returns the sector size commits are rounded to.
    #[must_use]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Returns the region this writer jumps over, if any.
    #[must_use]
    pub fn jump(&self) -> Option<LogRegion> {
        self.jump
    }

    /// Returns the running checksum as of the last file write.
    #[must_use]
    pub fn checksum(&self) -> LogChecksum {
        self.checksum
    }

    /// Returns the bytes this writer has written to the file.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns how many JUMP records this writer emitted.
    #[must_use]
    pub fn jumps(&self) -> u64 {
        self.jumps
    }

    /// Appends a WRITE record.
    pub fn write(&mut self, file: &LogFile, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let size = record::write_record_size(key, value);
        self.jump_if_required(file, size)?;
        self.reserve(size)?;
        record::encode_write(&mut self.buf, key, value);
        tracing::trace!(
            position = self.position(),
            key_len = key.len(),
            value_len = value.len(),
            "appended log write"
        );
        Ok(())
    }

    /// Appends a DELETE record.
    pub fn delete(&mut self, file: &LogFile, key: &[u8]) -> CoreResult<()> {
        let size = record::delete_record_size(key);
        self.jump_if_required(file, size)?;
        self.reserve(size)?;
        record::encode_delete(&mut self.buf, key);
        tracing::trace!(position = self.position(), key_len = key.len(), "appended log delete");
        Ok(())
    }

    /// Captures the current position for [`seek`](Self::seek).
    #[must_use]
    pub fn tell(&self) -> LogMark {
        LogMark {
            offset: self.offset,
            buffered: self.buf.clone(),
            checksum: self.checksum,
            region1_end: self.region1_end,
            region2_start: self.region2_start,
        }
    }

    /// Returns to a position captured by [`tell`](Self::tell). Everything
    /// appended since is discarded; bytes already in the file are
    /// overwritten by later records.
    pub fn seek(&mut self, mark: &LogMark) {
        self.offset = mark.offset;
        self.buf.clear();
        self.buf.extend_from_slice(&mark.buffered);
        self.checksum = mark.checksum;
        self.region1_end = mark.region1_end;
        self.region2_start = mark.region2_start;
    }

    /// Writes the COMMIT record.
    ///
    /// With a sector size above 1 the record is padded to end on a sector
    /// boundary. `sync` forces the file to durable storage afterwards.
    pub fn commit(&mut self, file: &LogFile, sync: bool) -> CoreResult<()> {
        let mut need = COMMIT_RECORD_SIZE;
        if self.sector_size > 1 {
            need += self.sector_size + MAX_JUMP_OVERHEAD;
        }
        self.jump_if_required(file, need)?;
        self.reserve(need)?;

        if self.sector_size > 1 {
            let sector = self.sector_size as u64;
            let end = self.position() + COMMIT_RECORD_SIZE as u64;
            let rem = end % sector;
            if rem != 0 {
                record::encode_padding(&mut self.buf, (sector - rem) as usize);
            }
        }

        self.buf.push(LogRecordType::Commit.as_byte());
        self.checksum.update(&self.buf);
        self.buf.extend_from_slice(&self.checksum.to_bytes());
        self.write_buffer(file)?;

        if sync {
            file.sync()?;
        } else {
            file.flush()?;
        }
        tracing::trace!(position = self.offset, sync, "log commit written");
        Ok(())
    }

    /// Publishes the writer's progress into `log` when `commit` is true.
    ///
    /// Region 2 ends at the writer's position. If a jump was taken, the
    /// bytes before it become region 1 and region 2 starts after the jump.
    pub fn end(&self, commit: bool, log: &mut DbLog) {
        if !commit {
            return;
        }
        log.regions[2].end = self.position();
        log.checksum = self.checksum;
        if self.region1_end != 0 {
            log.regions[1] = LogRegion::new(log.regions[2].start, self.region1_end);
            log.regions[2].start = self.region2_start;
        }
    }

    /// Emits a JUMP over the jump region if appending `need` bytes would
    /// run into it.
    fn jump_if_required(&mut self, file: &LogFile, need: usize) -> CoreResult<bool> {
        let Some(jump) = self.jump else {
            return Ok(false);
        };
        let position = self.position();
        let limit = position + (need + MAX_JUMP_OVERHEAD) as u64;
        if jump.start <= position || jump.start >= limit {
            return Ok(false);
        }

        let target = jump.end + 1;
        let jump_len = 1 + record::varint_len(target);
        self.reserve(jump_len + 8)?;
        let unaligned = (self.buf.len() + jump_len) % 8;
        if unaligned != 0 {
            record::encode_padding(&mut self.buf, 8 - unaligned);
        }
        record::encode_jump(&mut self.buf, target);
        self.checksum.update(&self.buf);
        self.write_buffer(file)?;

        self.region1_end = self.offset;
        self.region2_start = target;
        self.offset = target;
        self.jumps += 1;
        tracing::trace!(from = self.region1_end, target, "log jumped over live region");
        Ok(true)
    }

    /// Writes the buffer at the current offset and advances past it.
    fn write_buffer(&mut self, file: &LogFile) -> CoreResult<()> {
        file.write_at(self.offset, &self.buf)?;
        let len = self.buf.len() as u64;
        self.offset += len;
        self.bytes_written += len;
        self.buf.clear();
        Ok(())
    }

    fn reserve(&mut self, additional: usize) -> CoreResult<()> {
        self.buf
            .try_reserve(additional)
            .map_err(|e| CoreError::from_reserve("log writer buffer", e))
    }
}

//! Write-ahead log.
//!
//! The log is a bounded file reused in place. Live records occupy up to
//! three [`LogRegion`]s; once a checkpoint makes the head of the file
//! redundant, the next transaction wraps to offset 0 and jumps over whatever
//! is still live when it reaches it.
//!
//! ## Layout of a wrapped log
//!
//! ```text
//! 0            r2.end      r0.start           r0.end
//! | region 2 -> |  free      | region 0 (old)   | marker |
//! ```
//!
//! Readers follow region 0 to its wrap marker, jump to offset 0 and continue
//! through region 2. A JUMP record at the end of region 1 sends them past a
//! region that region 2's writer had to step over.

mod allocator;
mod checksum;
mod file;
mod record;
mod region;
mod writer;

pub use allocator::{
    effective_sector_size, AllocationCase, LogAllocation, RegionAllocator, WRAP_MARKER_SIZE,
};
pub use checksum::LogChecksum;
pub use file::LogFile;
pub use record::{LogRecord, LogRecordType, COMMIT_RECORD_SIZE, WRAP_MARKER};
pub use region::{DbLog, LogRegion};
pub use writer::{LogMark, LogWriter};

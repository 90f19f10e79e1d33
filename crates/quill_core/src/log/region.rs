//! Log regions.
//!
//! The log file is addressed as up to three byte ranges. Region 2 is always
//! the one being appended to. Regions 0 and 1 hold older, not yet
//! checkpointed records that precede region 2 logically but may sit after it
//! physically once the log has wrapped.

use crate::log::checksum::LogChecksum;
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};

/// A byte range of the log file. A region with `end == 0` is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRegion {
    /// First byte of the region.
    pub start: u64,
    /// One past the last byte written to the region.
    pub end: u64,
}

impl LogRegion {
    /// The empty region.
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    /// Creates a region.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Returns true if the region is unused.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Returns the number of bytes the region spans.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Returns true if `offset` lies within `start..=end`.
    #[must_use]
    pub const fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset <= self.end
    }
}

/// Log state carried in every tree header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbLog {
    /// Regions 0, 1 and 2.
    pub regions: [LogRegion; 3],
    /// Checksum of everything written to region 2 so far.
    pub checksum: LogChecksum,
    /// Snapshot id of the last checkpoint applied by [`reclaim`](Self::reclaim).
    pub snapshot_id: SnapshotId,
}

impl DbLog {
    /// Returns the offset the next record would be appended at.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.regions[2].end
    }

    /// Returns the number of live log bytes across all regions.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.regions.iter().map(LogRegion::len).sum()
    }

    /// Drops log space made redundant by a synced checkpoint.
    ///
    /// The checkpoint covers every record before `log_offset`. Regions are
    /// walked in order; the first one containing the offset is trimmed to
    /// start there and every region before it is cleared. Checkpoints not
    /// newer than [`snapshot_id`](Self::snapshot_id) are ignored.
    ///
    /// Returns true if any region changed.
    pub fn reclaim(&mut self, checkpoint: SnapshotId, log_offset: u64) -> bool {
        if checkpoint <= self.snapshot_id {
            return false;
        }
        let Some(index) = self.regions.iter().position(|r| r.contains(log_offset)) else {
            tracing::warn!(
                log_offset,
                regions = ?self.regions,
                "checkpoint offset outside every log region"
            );
            return false;
        };

        let before = self.regions;
        for region in &mut self.regions[..index] {
            *region = LogRegion::EMPTY;
        }
        self.regions[index].start = log_offset;
        self.snapshot_id = checkpoint;
        before != self.regions
    }
}

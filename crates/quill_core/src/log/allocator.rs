//! Region allocation at the start of a write transaction.
//!
//! Three cases, tried in order:
//!
//! 1. **Wrap**: regions 0 and 1 are empty and region 2 starts far enough
//!    into the file. An 8-byte wrap marker is reserved at the end of
//!    region 2, region 2 becomes region 0 and writing restarts at offset 0.
//! 2. **Mid-file**: region 1 is empty and region 2 ends before region 0.
//!    Writing continues at the end of region 2 and must jump over region 0
//!    when it gets there.
//! 3. **Append**: writing continues at the end of region 2.

use crate::config::SafetyLevel;
use crate::log::region::{DbLog, LogRegion};

/// Size of the record that sends a reader from the end of the old region 2
/// back to offset 0.
pub const WRAP_MARKER_SIZE: u64 = 8;

/// Which allocation case fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationCase {
    /// The log wrapped to offset 0.
    Wrap,
    /// Writing resumes before region 0.
    MidFile,
    /// Writing resumes at the end of the file.
    Append,
}

/// Where the next transaction writes its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAllocation {
    /// Case that produced this allocation.
    pub case: AllocationCase,
    /// File offset of the first byte the transaction writes.
    pub offset: u64,
    /// Region the writer must jump over, sector-rounded.
    pub jump: Option<LogRegion>,
    /// Offset of the wrap marker, for the wrap case.
    pub marker_offset: Option<u64>,
    /// Sector size writes are rounded to.
    pub sector_size: usize,
}

/// Resolves the sector size for a safety level. The storage is only queried
/// at [`SafetyLevel::Full`].
pub fn effective_sector_size(safety: SafetyLevel, device: impl FnOnce() -> usize) -> usize {
    if safety == SafetyLevel::Full {
        device().max(1)
    } else {
        1
    }
}

/// Chooses log positions for new write transactions.
#[derive(Debug, Clone, Copy)]
pub struct RegionAllocator {
    min_log_wrap: u64,
}

impl RegionAllocator {
    /// Creates an allocator that wraps once region 2 starts at or beyond
    /// `min_log_wrap`.
    #[must_use]
    pub const fn new(min_log_wrap: u64) -> Self {
        Self { min_log_wrap }
    }

    /// Returns the wrap threshold.
    #[must_use]
    pub const fn min_log_wrap(&self) -> u64 {
        self.min_log_wrap
    }

    /// Picks the write position for the next transaction and updates the
    /// regions of `log` for the wrap case.
    pub fn allocate(&self, log: &mut DbLog, sector_size: usize) -> LogAllocation {
        let sector_size = sector_size.max(1);
        let [r0, r1, r2] = log.regions;

        let mut allocation = if r0.is_empty() && r1.is_empty() && r2.start >= self.min_log_wrap {
            let superseded = LogRegion::new(r2.start, r2.end + WRAP_MARKER_SIZE);
            log.regions[0] = superseded;
            log.regions[2] = LogRegion::EMPTY;
            LogAllocation {
                case: AllocationCase::Wrap,
                offset: 0,
                jump: Some(superseded),
                marker_offset: Some(r2.end),
                sector_size,
            }
        } else if r1.is_empty() && r2.end < r0.end {
            LogAllocation {
                case: AllocationCase::MidFile,
                offset: r2.end,
                jump: Some(r0),
                marker_offset: None,
                sector_size,
            }
        } else {
            LogAllocation {
                case: AllocationCase::Append,
                offset: r2.end,
                jump: None,
                marker_offset: None,
                sector_size,
            }
        };

        if let Some(jump) = allocation.jump.as_mut() {
            if jump.start != 0 {
                let sector = sector_size as u64;
                let rounded = (jump.start / sector) * sector;
                if rounded > allocation.offset {
                    jump.start = rounded;
                }
                jump.end = (jump.end / sector) * sector + sector - 1;
            }
        }

        tracing::debug!(
            case = ?allocation.case,
            offset = allocation.offset,
            jump = ?allocation.jump,
            sector_size,
            "allocated log position"
        );
        allocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log(regions: [(u64, u64); 3]) -> DbLog {
        DbLog {
            regions: regions.map(|(s, e)| LogRegion::new(s, e)),
            ..DbLog::default()
        }
    }

    #[test]
    fn wrap_with_threshold_eight() {
        let mut l = log([(0, 0), (0, 0), (10, 0)]);
        let a = RegionAllocator::new(8).allocate(&mut l, 1);
        assert_eq!(a.case, AllocationCase::Wrap);
        assert_eq!(a.offset, 0);
        assert_eq!(a.marker_offset, Some(0));
        assert_eq!(l.regions[0], LogRegion::new(10, 8));
        assert_eq!(l.regions[2], LogRegion::EMPTY);
    }

    #[test]
    fn wrap_after_checkpoint() {
        let mut l = log([(0, 0), (0, 0), (4096, 6000)]);
        let a = RegionAllocator::new(128).allocate(&mut l, 1);
        assert_eq!(a.case, AllocationCase::Wrap);
        assert_eq!(a.marker_offset, Some(6000));
        assert_eq!(a.jump, Some(LogRegion::new(4096, 6008)));
        assert_eq!(l.regions[0], LogRegion::new(4096, 6008));
    }

    #[test]
    fn below_threshold_appends() {
        let mut l = log([(0, 0), (0, 0), (100, 400)]);
        let a = RegionAllocator::new(128).allocate(&mut l, 1);
        assert_eq!(a.case, AllocationCase::Append);
        assert_eq!(a.offset, 400);
        assert_eq!(a.jump, None);
        assert_eq!(l.regions[2], LogRegion::new(100, 400));
    }

    #[test]
    fn mid_file_jumps_over_region_zero() {
        let mut l = log([(4096, 6008), (0, 0), (0, 1000)]);
        let a = RegionAllocator::new(128).allocate(&mut l, 1);
        assert_eq!(a.case, AllocationCase::MidFile);
        assert_eq!(a.offset, 1000);
        assert_eq!(a.jump, Some(LogRegion::new(4096, 6008)));
    }

    #[test]
    fn region_one_in_use_appends() {
        let mut l = log([(4096, 6008), (0, 5000), (6100, 6200)]);
        let a = RegionAllocator::new(128).allocate(&mut l, 1);
        assert_eq!(a.case, AllocationCase::Append);
        assert_eq!(a.offset, 6200);
    }

    #[test]
    fn jump_is_sector_rounded() {
        let mut l = log([(4200, 6008), (0, 0), (0, 1000)]);
        let a = RegionAllocator::new(128).allocate(&mut l, 512);
        assert_eq!(a.jump, Some(LogRegion::new(4096, 6143)));
        assert_eq!(a.sector_size, 512);
    }

    #[test]
    fn rounding_never_moves_jump_behind_offset() {
        let mut l = log([(1100, 3000), (0, 0), (0, 1050)]);
        let a = RegionAllocator::new(128).allocate(&mut l, 512);
        assert_eq!(a.jump.map(|j| j.start), Some(1100));
    }

    #[test]
    fn sector_size_only_queried_when_full() {
        let mut queried = false;
        assert_eq!(
            effective_sector_size(SafetyLevel::Normal, || {
                queried = true;
                4096
            }),
            1
        );
        assert!(!queried);
        assert_eq!(effective_sector_size(SafetyLevel::Full, || 4096), 4096);
        assert_eq!(effective_sector_size(SafetyLevel::Full, || 0), 1);
    }

    proptest! {
        #[test]
        fn wrap_leaves_region_two_empty(start in 8u64..1 << 40, len in 0u64..1 << 20) {
            let mut l = log([(0, 0), (0, 0), (start, start + len)]);
            let a = RegionAllocator::new(8).allocate(&mut l, 1);
            prop_assert_eq!(a.case, AllocationCase::Wrap);
            prop_assert_eq!(l.regions[2], LogRegion::EMPTY);
            prop_assert_eq!(l.regions[0].start, start);
            prop_assert_eq!(l.regions[0].end, start + len + WRAP_MARKER_SIZE);
        }

        #[test]
        fn jump_always_ahead_of_offset(
            r0_start in 1u64..1 << 20,
            r0_len in 1u64..1 << 16,
            r2_end in 0u64..1 << 20,
            sector in prop::sample::select(vec![1usize, 512, 4096]),
        ) {
            prop_assume!(r2_end < r0_start);
            let mut l = log([(r0_start, r0_start + r0_len), (0, 0), (0, r2_end)]);
            let a = RegionAllocator::new(128).allocate(&mut l, sector);
            if let Some(jump) = a.jump {
                prop_assert!(jump.start > a.offset);
                prop_assert_eq!((jump.end + 1) % sector as u64, 0);
            }
        }
    }
}

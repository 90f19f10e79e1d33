//! Nested write-transaction levels.

use crate::error::{CoreError, CoreResult};
use crate::log::LogMark;
use crate::tree::TreeMark;

/// Positions to roll back to when a level is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionMark {
    /// Tree position when the level opened.
    pub tree: TreeMark,
    /// Log position when the level opened, if the log is enabled.
    pub log: Option<LogMark>,
}

/// Open levels of a connection and their marks.
///
/// Level `n` is rolled back to `marks[n - 1]`. The mark array only grows;
/// entries at or beyond the open count are stale.
#[derive(Debug, Default)]
pub struct TransactionStack {
    open: usize,
    marks: Vec<TransactionMark>,
}

impl TransactionStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of open levels.
    #[must_use]
    pub fn open_levels(&self) -> usize {
        self.open
    }

    /// Returns the length of the mark array.
    #[must_use]
    pub fn mark_capacity(&self) -> usize {
        self.marks.len()
    }

    /// Returns the mark recorded when level `index + 1` opened.
    #[must_use]
    pub fn mark(&self, index: usize) -> Option<&TransactionMark> {
        self.marks.get(index)
    }

    /// Resolves the level `begin(level)` should open up to. Negative means
    /// one deeper than the current depth.
    #[must_use]
    pub fn open_target(&self, level: i32) -> usize {
        usize::try_from(level).unwrap_or(self.open + 1)
    }

    /// Resolves the level `commit(level)` or `rollback(level)` closes down
    /// to. Negative means one shallower than the current depth.
    #[must_use]
    pub fn close_target(&self, level: i32) -> usize {
        usize::try_from(level).unwrap_or(self.open.saturating_sub(1))
    }

    /// Grows the mark array to hold at least `target + 1` entries.
    pub(crate) fn reserve(&mut self, target: usize) -> CoreResult<()> {
        let wanted = target + 1;
        if self.marks.len() < wanted {
            self.marks
                .try_reserve(wanted - self.marks.len())
                .map_err(|e| CoreError::from_reserve("transaction marks", e))?;
            self.marks.resize_with(wanted, TransactionMark::default);
        }
        Ok(())
    }

    /// Records `mark` for every level from the current depth up to
    /// `target` and makes `target` the depth. The array must already have
    /// been grown with [`reserve`](Self::reserve).
    pub(crate) fn push_levels(&mut self, target: usize, mark: &TransactionMark) {
        for slot in &mut self.marks[self.open..target] {
            slot.clone_from(mark);
        }
        self.open = target;
    }

    /// Sets the depth after levels were closed.
    pub(crate) fn close_to(&mut self, level: usize) {
        self.open = level.min(self.open);
    }
}

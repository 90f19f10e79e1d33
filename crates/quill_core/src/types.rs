//! Core identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a persisted worker snapshot. Ids only grow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Creates a snapshot id from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the id after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap:{}", self.0)
    }
}

/// Generation counter of the in-memory tree, bumped each time the current
/// tree is aged into the old slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Generation(u32);

impl Generation {
    /// Creates a generation from a raw value.
    #[must_use]
    pub const fn new(generation: u32) -> Self {
        Self(generation)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the following generation, wrapping at `u32::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Index of a pinned read-lock slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderSlot(usize);

impl ReaderSlot {
    /// Creates a slot handle.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

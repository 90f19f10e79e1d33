//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, values, write batches and
//! transaction-level sequences.

use proptest::prelude::*;

/// A single write applied through a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite.
    Insert {
        /// Key.
        key: Vec<u8>,
        /// Value.
        value: Vec<u8>,
    },
    /// Delete.
    Delete {
        /// Key.
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// Returns the key the operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Insert { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A transaction-level operation on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelOp {
    /// `begin(level)`.
    Begin(i32),
    /// `commit(level)`.
    Commit(i32),
    /// `rollback(level)`.
    Rollback(i32),
}

/// Strategy for generating keys from a small alphabet so writes collide.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'h', 1..6)
}

/// Strategy for generating values (arbitrary bytes).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating a single write.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| WriteOp::Insert { key, value }),
        1 => key_strategy().prop_map(|key| WriteOp::Delete { key }),
    ]
}

/// Strategy for generating a batch of writes.
pub fn write_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), 1..=max_len.max(1))
}

/// Strategy for generating transaction levels, negative values included.
pub fn level_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![
        1 => Just(-1),
        4 => 0i32..8,
    ]
}

/// Strategy for generating sequences of level operations.
pub fn level_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<LevelOp>> {
    let op = prop_oneof![
        2 => level_strategy().prop_map(LevelOp::Begin),
        1 => level_strategy().prop_map(LevelOp::Commit),
        1 => level_strategy().prop_map(LevelOp::Rollback),
    ];
    prop::collection::vec(op, 0..=max_len)
}

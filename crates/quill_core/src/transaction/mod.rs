//! Write transactions.
//!
//! A connection opens nested levels with [`Connection::begin`]. Only the
//! transition from zero to one level takes the writer lock and positions the
//! log; deeper levels just record marks to roll back to. Closing the last
//! level hands the worker snapshot to the finalizer, which publishes it and
//! releases the writer lock on every path.
//!
//! [`Connection::begin`]: crate::Connection::begin

mod finish;
mod stack;

pub use stack::{TransactionMark, TransactionStack};

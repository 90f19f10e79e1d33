//! # Quill Core
//!
//! Write-ahead log and transaction lifecycle for the Quill embedded
//! log-structured key-value engine.
//!
//! This crate provides:
//! - Log space allocation over a three-region circular log file
//! - Nested transactions with per-level rollback marks
//! - Worker snapshot publication and read-lock handoff
//! - Synchronous and automatic flushes of the in-memory tree
//! - Safety levels governing sync and commit padding
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quill_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! let mut conn = db.connect();
//!
//! conn.begin(1)?;
//! conn.insert(b"alpha", b"1")?;
//! conn.begin(2)?;
//! conn.insert(b"beta", b"2")?;
//! conn.rollback(2)?; // undoes "beta"
//! conn.commit(0)?;
//!
//! conn.flush()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod database;
mod dir;
mod error;
mod flush;
pub mod log;
mod shared;
mod snapshot;
mod stats;
mod transaction;
mod tree;
mod types;

pub use config::{
    clamp_auto_checkpoint_kb, clamp_auto_flush_kb, Config, SafetyLevel,
    DEFAULT_AUTO_CHECKPOINT_KB, DEFAULT_AUTO_FLUSH_KB, DEFAULT_MAX_READ_ATTEMPTS,
    DEFAULT_MIN_LOG_WRAP, MAX_AUTO_FLUSH_KB,
};
pub use connection::{Connection, WorkHook};
pub use database::Database;
pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use shared::{ProcessShared, SharedState, READER_SLOTS};
pub use snapshot::{
    compute_crc32, SnapshotStore, SyncedCheckpoint, TreeHeader, WorkerSnapshot, META_SLOT_SIZE,
};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use transaction::{TransactionMark, TransactionStack};
pub use tree::{MemTree, TreeMark, TreeStore};
pub use types::{Generation, ReaderSlot, SnapshotId};

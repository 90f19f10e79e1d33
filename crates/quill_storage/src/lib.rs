//! # quill storage
//!
//! Storage backend trait and implementations for quill.
//!
//! This crate provides the lowest-level storage abstraction used by the
//! write-ahead log and the snapshot store. Storage backends are **opaque
//! byte stores** - they do not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, positional write, flush)
//! - No knowledge of log records, regions or snapshots
//! - Must be `Send + Sync` for concurrent access
//! - Each backend reports the physical sector size used for durable writes
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use quill_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(4, b"tail").unwrap();
//! assert_eq!(backend.size().unwrap(), 8);
//! assert_eq!(backend.read_at(4, 4).unwrap(), b"tail");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{StorageBackend, DEFAULT_SECTOR_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

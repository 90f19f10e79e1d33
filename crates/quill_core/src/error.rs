//! Error types for quill core.

use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in quill core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] quill_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write transaction was requested on a read-only connection.
    #[error("connection is read-only")]
    ReadOnly,

    /// The caller violated a precondition of the operation.
    #[error("misuse: {message}")]
    Misuse {
        /// Description of the violated precondition.
        message: String,
    },

    /// A buffer or array could not be grown.
    #[error("out of memory while allocating {what}")]
    OutOfMemory {
        /// What was being allocated.
        what: String,
    },

    /// The database is busy: another writer got in first or every read slot
    /// is pinned at a different snapshot.
    #[error("database is busy")]
    Busy,

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// A snapshot could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A persisted snapshot failed validation.
    #[error("snapshot corruption: {message}")]
    SnapshotCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid database format or layout.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

/// Coarse classification of [`CoreError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A precondition was violated; nothing was mutated.
    Misuse,
    /// An allocation failed; prior state is untouched.
    OutOfMemory,
    /// Contention with another connection.
    Busy,
    /// Writing or reading durable state failed.
    Persistence,
    /// The transaction was rolled back.
    Aborted,
}

impl CoreError {
    /// Creates a misuse error.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse {
            message: message.into(),
        }
    }

    /// Creates an out-of-memory error.
    pub fn out_of_memory(what: impl Into<String>) -> Self {
        Self::OutOfMemory { what: what.into() }
    }

    /// Maps a failed `try_reserve` onto an out-of-memory error.
    pub fn from_reserve(what: impl Into<String>, _err: TryReserveError) -> Self {
        Self::out_of_memory(what)
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns the error's classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ReadOnly | Self::Misuse { .. } => ErrorKind::Misuse,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Busy => ErrorKind::Busy,
            Self::TransactionAborted { .. } => ErrorKind::Aborted,
            Self::Storage(_)
            | Self::Io(_)
            | Self::Serialization { .. }
            | Self::SnapshotCorruption { .. }
            | Self::DatabaseLocked
            | Self::InvalidFormat { .. } => ErrorKind::Persistence,
        }
    }

    /// Returns true if this error reports a caller precondition violation.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        self.kind() == ErrorKind::Misuse
    }
}

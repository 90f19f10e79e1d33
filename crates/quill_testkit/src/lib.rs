//! # Quill Testkit
//!
//! Test utilities for quill.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Instrumented collaborators that record calls and inject failures
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quill_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         let mut conn = db.connect();
//!         conn.insert(b"k", b"v").unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod doubles;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::doubles::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use doubles::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;

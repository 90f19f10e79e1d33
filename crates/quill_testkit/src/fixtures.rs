//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use quill_core::{Config, Database};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber.
///
/// Output goes through the test harness writer so it is captured per test.
/// The filter comes from `RUST_LOG`, defaulting to `warn`. Safe to call from
/// every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
    path: Option<PathBuf>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates a new in-memory test database with custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        init_tracing();
        Self {
            db: Database::open_in_memory_with_config(config)
                .expect("Failed to open in-memory database"),
            _temp_dir: None,
            path: None,
        }
    }

    /// Creates a new file-based test database in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-based test database with custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.quill");
        let db = Database::open_with_config(&path, config).expect("Failed to open file database");

        Self {
            db,
            _temp_dir: Some(temp_dir),
            path: Some(path),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the database and opens it again from the same directory.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            _temp_dir,
            path,
        } = self;
        let config = db.config().clone();
        drop(db);

        let dir = path.expect("Only file databases can be reopened");
        let db = Database::open_with_config(&dir, config).expect("Failed to reopen database");
        Self {
            db,
            _temp_dir,
            path: Some(dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use quill_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.connect().insert(b"k", b"v").unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db
        .path()
        .expect("File database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Returns the key used for entry `i` by the populate helpers.
    pub fn key(i: usize) -> Vec<u8> {
        format!("key-{i:06}").into_bytes()
    }

    /// Returns the value used for entry `i` by the populate helpers.
    pub fn value(i: usize, size: usize) -> Vec<u8> {
        let mut value = vec![0u8; size];
        for (n, byte) in value.iter_mut().enumerate() {
            *byte = ((i + n) % 251) as u8;
        }
        value
    }

    /// Creates a database with `count` auto-committed entries.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        populate(&test_db.db, count, 32);
        test_db
    }

    /// Inserts `count` entries, one transaction each.
    pub fn populate(db: &Database, count: usize, value_size: usize) {
        let mut conn = db.connect();
        for i in 0..count {
            conn.insert(&key(i), &value(i, value_size))
                .expect("Failed to insert");
        }
    }
}

//! Database facade.

use crate::config::Config;
use crate::connection::Connection;
use crate::dir::DatabaseDir;
use crate::error::CoreResult;
use crate::log::LogFile;
use crate::shared::{ProcessShared, SharedState};
use crate::stats::DatabaseStats;
use crate::tree::{MemTree, TreeStore};
use parking_lot::Mutex;
use quill_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::Path;
use std::sync::Arc;

/// State every connection to a database shares.
pub(crate) struct DatabaseInner {
    pub(crate) config: Config,
    pub(crate) shared: Arc<dyn SharedState>,
    pub(crate) tree: Mutex<Box<dyn TreeStore>>,
    pub(crate) log: LogFile,
    pub(crate) stats: DatabaseStats,
    /// Holds the directory lock. None for in-memory databases.
    _dir: Option<DatabaseDir>,
}

/// The main database handle.
///
/// A `Database` owns the log, the in-memory tree and the shared
/// coordination state. Work happens through [`Connection`]s obtained from
/// [`connect`](Self::connect); any number may be open at once.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use quill_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// let mut conn = db.connect();
/// conn.insert(b"key", b"value")?;
/// conn.flush()?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`.
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens a database from a directory path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// The log and snapshot files live inside the directory. The newest
    /// valid snapshot, if any, restores the log region state.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let log = FileBackend::open(&dir.log_path())?;
        let snapshots = FileBackend::open(&dir.snapshot_path())?;
        let shared = ProcessShared::open(Box::new(snapshots))?;

        tracing::info!(path = %path.display(), "opened database");
        Ok(Self::assemble(
            config,
            Arc::new(shared),
            Box::new(MemTree::new()),
            Box::new(log),
            Some(dir),
        ))
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens an in-memory database with custom configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        Ok(Self::open_with_parts(
            config,
            Arc::new(ProcessShared::new()),
            Box::new(MemTree::new()),
            Box::new(InMemoryBackend::new()),
        ))
    }

    /// Assembles a database from explicit collaborators.
    ///
    /// Used to run the write path against instrumented shared state, trees
    /// or storage.
    pub fn open_with_parts(
        config: Config,
        shared: Arc<dyn SharedState>,
        tree: Box<dyn TreeStore>,
        log_backend: Box<dyn StorageBackend>,
    ) -> Self {
        Self::assemble(config, shared, tree, log_backend, None)
    }

    fn assemble(
        config: Config,
        shared: Arc<dyn SharedState>,
        tree: Box<dyn TreeStore>,
        log_backend: Box<dyn StorageBackend>,
        dir: Option<DatabaseDir>,
    ) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                shared,
                tree: Mutex::new(tree),
                log: LogFile::new(log_backend),
                stats: DatabaseStats::new(),
                _dir: dir,
            }),
        }
    }

    /// Opens a new connection.
    #[must_use]
    pub fn connect(&self) -> Connection {
        Connection::new(Arc::clone(&self.inner))
    }

    /// Returns the configuration new connections start from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the database statistics.
    #[must_use]
    pub fn stats(&self) -> &DatabaseStats {
        &self.inner.stats
    }

    /// Returns the shared coordination state.
    #[must_use]
    pub fn shared(&self) -> &Arc<dyn SharedState> {
        &self.inner.shared
    }

    /// Returns the log file.
    #[must_use]
    pub fn log_file(&self) -> &LogFile {
        &self.inner.log
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.inner.config)
            .field("persistent", &self.inner._dir.is_some())
            .finish_non_exhaustive()
    }
}

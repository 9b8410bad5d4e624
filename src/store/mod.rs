//! SQLite persistence for features, agent runs, checkpoints and execution steps.
//!
//! Every worker process and the CLI open the same database file; WAL mode and
//! a busy timeout let them write concurrently. Cross-process transitions of a
//! run are compare-and-set updates (`UPDATE ... WHERE status IN (...)`), so the
//! row count tells the caller whether it won.

mod checkpoints;
mod features;
mod runs;
mod steps;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;

pub use features::NewFeature;
pub use runs::NewRun;

/// Async-safe handle to the database.
///
/// Wraps `ShipyardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ShipyardDb>>,
}

impl DbHandle {
    pub fn new(db: ShipyardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ShipyardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, ShipyardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct ShipyardDb {
    conn: Connection,
}

impl ShipyardDb {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("Failed to enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS features (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    repository_path TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    lifecycle TEXT NOT NULL DEFAULT 'started',
                    parent_id TEXT REFERENCES features(id),
                    agent_run_id TEXT,
                    spec_path TEXT,
                    push INTEGER NOT NULL DEFAULT 0,
                    open_pr INTEGER NOT NULL DEFAULT 0,
                    pr TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS agent_runs (
                    id TEXT PRIMARY KEY,
                    feature_id TEXT NOT NULL REFERENCES features(id),
                    thread_id TEXT NOT NULL,
                    agent_kind TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    pid INTEGER,
                    approval_gates TEXT,
                    session_id TEXT,
                    error TEXT,
                    result TEXT,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS execution_steps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES agent_runs(id),
                    parent_id INTEGER REFERENCES execution_steps(id),
                    name TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'running',
                    started_at TEXT NOT NULL,
                    finished_at TEXT,
                    detail TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_features_parent ON features(parent_id);
                CREATE INDEX IF NOT EXISTS idx_agent_runs_feature ON agent_runs(feature_id);
                CREATE INDEX IF NOT EXISTS idx_execution_steps_run ON execution_steps(run_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_agent_runs_one_active
                    ON agent_runs(feature_id) WHERE status IN ('pending', 'running');
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

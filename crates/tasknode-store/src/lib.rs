//! `tasknode-store`: SQLite persistence for timed jobs, their run logs and
//! daemon jobs.
//!
//! All timestamps are Unix seconds; `0` means "never". List-valued columns
//! (environment, trigger actions, notification targets) are JSON text.

pub mod crontab;
pub mod daemon;
pub mod db;
pub mod error;
pub mod stats;
pub mod types;

pub use error::{Result, StoreError};
pub use types::{
    Crontab, CrontabDraft, CrontabLog, CrontabStatus, Daemon, DaemonDraft, DaemonStatus,
    ExecStatus, LogFilter, NodeCounts, Page, Pagination, RunRecord, TriggerAction,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

/// Shared handle over one SQLite connection.
///
/// Cheap to clone; every clone serializes on the same connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::new(conn)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

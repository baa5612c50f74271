//! SQLite persistence adapter for Driftlist.
//!
//! One shared database file holds every identity's durable state, but each
//! identity owns its own table pair (`store_<identity>_cells` +
//! `store_<identity>_values`), named by the identity itself. One identity's
//! data is structurally invisible to another's load/save calls — the
//! durability half of identity isolation.

mod auto;
mod persister;
mod session_store;

pub use auto::{AutoPersister, AutoPersisterConfig, PersistenceHealth};
pub use persister::StorePersister;
pub use session_store::SqliteSessionStore;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("persisted cell is malformed: {0}")]
    Corrupt(String),

    #[error("background persistence task failed: {0}")]
    Task(String),
}

/// Opens the shared database file with the pragmas every adapter relies on.
///
/// WAL mode lets the relay's per-identity connections write the same file
/// concurrently; the busy timeout covers the brief writer lock handoff.
pub fn open_database(path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

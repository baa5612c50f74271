//! SQLite-backed session persistence.

use crate::StorageResult;
use driftlist_identity::SessionStore;
use driftlist_types::Identity;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Persists the current session's identity in the shared database file so
/// a restart can restore it without the passphrase.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_database(path)?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(Arc::new(Mutex::new(conn)))
    }

    pub fn with_connection(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        {
            let guard = conn.lock().unwrap();
            guard.execute_batch(
                "CREATE TABLE IF NOT EXISTS session (
                     id INTEGER PRIMARY KEY CHECK (id = 1),
                     identity TEXT NOT NULL
                 );",
            )?;
        }
        Ok(Self { conn })
    }
}

impl SessionStore for SqliteSessionStore {
    fn load(&self) -> Result<Option<Identity>, String> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row("SELECT identity FROM session WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| e.to_string())?;
        match raw {
            Some(s) => Identity::parse(&s).map(Some).map_err(|e| e.to_string()),
            None => Ok(None),
        }
    }

    fn save(&self, identity: &Identity) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO session (id, identity) VALUES (1, ?1)",
            params![identity.as_str()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn clear(&self) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM session WHERE id = 1", [])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

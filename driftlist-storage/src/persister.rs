//! Per-identity snapshot/delta persistence over the shared database file.

use crate::{StorageError, StorageResult};
use driftlist_store::{Delta, Stamped};
use driftlist_types::{CellValue, Identity, ReplicaId, Stamp};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Reserved cell name under which a row's presence flag persists.
const PRESENCE_CELL: &str = "";

/// Persists one identity's store content as a stamped cell table plus a
/// singleton key/value table, both named by the identity.
///
/// `load` returns `Ok(None)` for an identity that has never been saved:
/// "new identity, empty store" is not an error.
#[derive(Clone)]
pub struct StorePersister {
    conn: Arc<Mutex<Connection>>,
    identity: Identity,
}

impl StorePersister {
    /// Opens (or creates) the identity's table pair in the database file.
    pub fn open(path: &Path, identity: Identity) -> StorageResult<Self> {
        let conn = crate::open_database(path)?;
        Self::with_connection(Arc::new(Mutex::new(conn)), identity)
    }

    /// Opens an in-memory persister (for testing).
    pub fn open_in_memory(identity: Identity) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(Arc::new(Mutex::new(conn)), identity)
    }

    /// Builds a persister over an already-open connection. Used where
    /// several identities share one database handle.
    pub fn with_connection(
        conn: Arc<Mutex<Connection>>,
        identity: Identity,
    ) -> StorageResult<Self> {
        let persister = Self { conn, identity };
        persister.initialize_schema()?;
        Ok(persister)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn cells_table(&self) -> String {
        format!("store_{}_cells", self.identity)
    }

    fn values_table(&self) -> String {
        format!("store_{}_values", self.identity)
    }

    fn initialize_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {cells} (
                tbl TEXT NOT NULL,
                row_id TEXT NOT NULL,
                cell TEXT NOT NULL,
                value TEXT,
                counter INTEGER NOT NULL,
                replica TEXT NOT NULL,
                PRIMARY KEY (tbl, row_id, cell)
            );
            CREATE TABLE IF NOT EXISTS {values} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
            cells = self.cells_table(),
            values = self.values_table(),
        ))?;
        Ok(())
    }

    /// Loads the persisted snapshot, or `None` if this identity has never
    /// been saved.
    pub fn load(&self) -> StorageResult<Option<Delta>> {
        let conn = self.conn.lock().unwrap();

        let saved: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = 'saved_at'", self.values_table()),
                [],
                |row| row.get(0),
            )
            .optional()?;
        if saved.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT tbl, row_id, cell, value, counter, replica FROM {}",
            self.cells_table()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut delta = Delta::default();
        for row in rows {
            let (tbl, row_id, cell, value, counter, replica) = row?;
            let stamp = Stamp::new(counter as u64, ReplicaId::new(replica));
            if cell == PRESENCE_CELL {
                let live: bool = match value.as_deref() {
                    Some(raw) => serde_json::from_str(raw)?,
                    None => {
                        return Err(StorageError::Corrupt(format!(
                            "presence flag for {tbl}/{row_id} has no value"
                        )))
                    }
                };
                delta
                    .tables
                    .entry(tbl)
                    .or_default()
                    .rows
                    .entry(row_id)
                    .or_default()
                    .presence = Some(Stamped::new(live, stamp));
            } else {
                let parsed: Option<CellValue> = match value.as_deref() {
                    Some(raw) => Some(serde_json::from_str(raw)?),
                    None => None,
                };
                delta
                    .tables
                    .entry(tbl)
                    .or_default()
                    .rows
                    .entry(row_id)
                    .or_default()
                    .cells
                    .insert(cell, Stamped::new(parsed, stamp));
            }
        }
        Ok(Some(delta))
    }

    /// Writes a full snapshot transactionally, replacing all prior content.
    pub fn save(&self, snapshot: &Delta) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", self.cells_table()), [])?;
        Self::upsert_delta(&tx, &self.cells_table(), snapshot)?;
        Self::touch_saved_at(&tx, &self.values_table())?;
        tx.commit()?;
        Ok(())
    }

    /// Upserts only the cells present in `delta`. Cheaper than a full save
    /// for the steady drip of incremental changes.
    pub fn save_delta(&self, delta: &Delta) -> StorageResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::upsert_delta(&tx, &self.cells_table(), delta)?;
        Self::touch_saved_at(&tx, &self.values_table())?;
        tx.commit()?;
        Ok(())
    }

    fn upsert_delta(
        tx: &rusqlite::Transaction<'_>,
        cells_table: &str,
        delta: &Delta,
    ) -> StorageResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {cells_table} (tbl, row_id, cell, value, counter, replica) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        let mut stmt = tx.prepare(&sql)?;
        for (tbl, tdelta) in &delta.tables {
            for (row_id, rdelta) in &tdelta.rows {
                if let Some(presence) = &rdelta.presence {
                    stmt.execute(params![
                        tbl,
                        row_id,
                        PRESENCE_CELL,
                        serde_json::to_string(&presence.value)?,
                        presence.stamp.counter as i64,
                        presence.stamp.replica.as_str(),
                    ])?;
                }
                for (cell, write) in &rdelta.cells {
                    let value = match &write.value {
                        Some(v) => Some(serde_json::to_string(v)?),
                        None => None,
                    };
                    stmt.execute(params![
                        tbl,
                        row_id,
                        cell,
                        value,
                        write.stamp.counter as i64,
                        write.stamp.replica.as_str(),
                    ])?;
                }
            }
        }
        Ok(())
    }

    fn touch_saved_at(tx: &rusqlite::Transaction<'_>, values_table: &str) -> StorageResult<()> {
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {values_table} (key, value) VALUES ('saved_at', strftime('%s','now'))"
            ),
            [],
        )?;
        Ok(())
    }
}

//! SQLite-backed cursor storage.
//!
//! ```text
//! ┌──────────────────────────┐    ┌──────────────────────────┐
//! │      cds_metadata        │    │    cds_previous_e164     │
//! ├──────────────────────────┤    ├──────────────────────────┤
//! │ key    TEXT PRIMARY KEY  │    │ id    INTEGER PRIMARY KEY│
//! │ value  BLOB NOT NULL     │    │ e164  TEXT NOT NULL      │
//! └──────────────────────────┘    └──────────────────────────┘
//!   key = 'token'                   one row per synchronized number
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;

use super::{PersistentState, SyncCursor};
use crate::e164::E164;
use crate::error::{Error, Result};

const TOKEN_KEY: &str = "token";

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS cds_metadata (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS cds_previous_e164 (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    e164 TEXT NOT NULL UNIQUE
);
"#;

/// Cursor storage in a SQLite database
pub struct SqlitePersistentState {
    conn: Mutex<Connection>,
}

impl SqlitePersistentState {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_cursor(&self) -> Result<Option<SyncCursor>> {
        let conn = self.conn.lock();

        let token: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM cds_metadata WHERE key = ?",
                params![TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let Some(token) = token else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT e164 FROM cds_previous_e164")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut prev_e164s = BTreeSet::new();
        for row in rows {
            let raw = row?;
            let e164 = E164::parse(&raw).map_err(|_| {
                Error::StorageReadError(format!("Malformed stored e164: {}", raw))
            })?;
            prev_e164s.insert(e164);
        }

        Ok(Some(SyncCursor { token, prev_e164s }))
    }

    fn write_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO cds_metadata (key, value) VALUES (?, ?)",
            params![TOKEN_KEY, cursor.token],
        )?;
        tx.execute("DELETE FROM cds_previous_e164", [])?;
        {
            let mut insert = tx.prepare("INSERT INTO cds_previous_e164 (e164) VALUES (?)")?;
            for e164 in &cursor.prev_e164s {
                insert.execute(params![e164.to_string()])?;
            }
        }

        tx.commit()
            .map_err(|e| Error::StorageWriteError(format!("Failed to commit cursor: {}", e)))
    }

    fn clear_cursor(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cds_metadata WHERE key = ?", params![TOKEN_KEY])?;
        tx.execute("DELETE FROM cds_previous_e164", [])?;
        tx.commit()
            .map_err(|e| Error::StorageWriteError(format!("Failed to clear cursor: {}", e)))
    }
}

impl PersistentState for SqlitePersistentState {
    fn load(&self) -> Option<SyncCursor> {
        match self.read_cursor() {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!("Discarding unreadable discovery cursor: {}", e);
                None
            }
        }
    }

    fn store(&self, cursor: &SyncCursor) -> Result<()> {
        self.write_cursor(cursor)?;
        tracing::info!(
            "Saved discovery token and {} synchronized e164s",
            cursor.prev_e164s.len()
        );
        Ok(())
    }

    fn reset(&self) {
        tracing::warn!("Resetting discovery token");
        if let Err(e) = self.clear_cursor() {
            tracing::error!("Failed to reset discovery cursor: {}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

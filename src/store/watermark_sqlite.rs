//! SQLite watermark store
//!
//! One row per category, keyed `"/" + category`. The advance is a single
//! conditional UPSERT, so two invocations racing on the same category resolve
//! to the larger value and the watermark can never regress.

use crate::store::{watermark_key, WatermarkError, WatermarkStore};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS watermarks (
    key        TEXT PRIMARY KEY,
    value      INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// SQLite-backed watermark store
pub struct SqliteWatermarkStore {
    conn: Mutex<Connection>,
}

impl SqliteWatermarkStore {
    /// Opens (creating if needed) the watermark database at the given path
    pub fn open(path: &Path) -> Result<Self, WatermarkError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (tests)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, WatermarkError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All stored watermarks, for operator inspection
    pub fn list(&self) -> Result<Vec<(String, i64)>, WatermarkError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM watermarks ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl WatermarkStore for SqliteWatermarkStore {
    fn get(&self, category: &str) -> Result<i64, WatermarkError> {
        let key = watermark_key(category);
        let conn = self.conn.lock().unwrap();
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM watermarks WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(v) => Ok(v),
            None => {
                tracing::info!("No watermark for '{}', defaulting to 0", key);
                Ok(0)
            }
        }
    }

    fn advance(&self, category: &str, candidate: i64) -> Result<i64, WatermarkError> {
        let key = watermark_key(category);
        let conn = self.conn.lock().unwrap();

        // Atomic advance-if-greater: the WHERE clause on the conflict arm
        // rejects any candidate that is not strictly larger.
        conn.execute(
            "INSERT INTO watermarks (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, updated_at = datetime('now')
             WHERE excluded.value > watermarks.value",
            params![key, candidate],
        )?;

        let value: i64 = conn.query_row(
            "SELECT value FROM watermarks WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(value)
    }
}

//! SQLite-backed batch queue
//!
//! Durable enough for single-host operation: messages survive process
//! restarts, and anything left in flight by a crashed invocation can be made
//! visible again with [`SqliteQueue::recover_in_flight`].

use crate::queue::{BatchQueue, QueueError, QueueMessage, QueueResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    queue       TEXT NOT NULL,
    body        TEXT NOT NULL,
    in_flight   INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_queue_visible
    ON queue_messages (queue, in_flight, id);
";

/// SQLite-backed queue; all queues share one database
pub struct SqliteQueue {
    conn: Mutex<Connection>,
}

impl SqliteQueue {
    /// Opens (creating if needed) the queue database at the given path
    pub fn open(path: &Path) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (tests)
    #[cfg(test)]
    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Makes every in-flight message on the queue visible again
    ///
    /// Called at invocation start so messages orphaned by a crashed previous
    /// invocation get redelivered instead of sitting in flight forever.
    pub fn recover_in_flight(&self, queue: &str) -> QueueResult<usize> {
        let conn = self.conn.lock().unwrap();
        let recovered = conn.execute(
            "UPDATE queue_messages SET in_flight = 0 WHERE queue = ?1 AND in_flight = 1",
            params![queue],
        )?;
        if recovered > 0 {
            tracing::info!("Recovered {} in-flight messages on '{}'", recovered, queue);
        }
        Ok(recovered)
    }

    fn parse_id(message_id: &str) -> QueueResult<i64> {
        message_id
            .parse::<i64>()
            .map_err(|_| QueueError::MalformedId(message_id.to_string()))
    }
}

impl BatchQueue for SqliteQueue {
    fn send(&self, queue: &str, body: &str) -> QueueResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queue_messages (queue, body) VALUES (?1, ?2)",
            params![queue, body],
        )?;
        Ok(())
    }

    fn receive(&self, queue: &str, max: usize) -> QueueResult<Vec<QueueMessage>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, body FROM queue_messages
             WHERE queue = ?1 AND in_flight = 0
             ORDER BY id LIMIT ?2",
        )?;
        let messages = stmt
            .query_map(params![queue, max as i64], |row| {
                Ok(QueueMessage {
                    id: row.get::<_, i64>(0)?.to_string(),
                    body: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for message in &messages {
            conn.execute(
                "UPDATE queue_messages SET in_flight = 1 WHERE id = ?1",
                params![Self::parse_id(&message.id)?],
            )?;
        }

        Ok(messages)
    }

    fn delete(&self, queue: &str, message_id: &str) -> QueueResult<()> {
        let id = Self::parse_id(message_id)?;
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM queue_messages WHERE id = ?1 AND queue = ?2",
            params![id, queue],
        )?;
        if deleted == 0 {
            return Err(QueueError::UnknownMessage(message_id.to_string()));
        }
        Ok(())
    }

    fn release(&self, queue: &str, message_id: &str) -> QueueResult<()> {
        let id = Self::parse_id(message_id)?;
        let conn = self.conn.lock().unwrap();
        let released = conn.execute(
            "UPDATE queue_messages SET in_flight = 0 WHERE id = ?1 AND queue = ?2",
            params![id, queue],
        )?;
        if released == 0 {
            return Err(QueueError::UnknownMessage(message_id.to_string()));
        }
        Ok(())
    }

    fn depth(&self, queue: &str) -> QueueResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND in_flight = 0",
            params![queue],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

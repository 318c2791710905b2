//! Batch queue seam
//!
//! The pipeline stages hand work to each other through bounded JSON messages
//! on named queues. Redelivery policy belongs to the queue collaborator: the
//! workers only report which message ids they could not complete, and the
//! invocation harness releases those back for redelivery.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use thiserror::Error;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown message id: {0}")]
    UnknownMessage(String),

    #[error("Malformed message id: {0}")]
    MalformedId(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// One received queue message
///
/// The id is opaque to the pipeline; it only flows back into delete/release
/// calls and failure reports.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
}

/// Trait for batch queue implementations
///
/// Delivery is at-least-once: a message received but neither deleted nor
/// released stays in flight until the owner decides, and a released message
/// becomes visible again for redelivery.
pub trait BatchQueue: Send + Sync {
    /// Enqueues a message body on the named queue
    fn send(&self, queue: &str, body: &str) -> QueueResult<()>;

    /// Receives up to `max` visible messages in FIFO order, marking them
    /// in flight
    fn receive(&self, queue: &str, max: usize) -> QueueResult<Vec<QueueMessage>>;

    /// Deletes a processed message
    fn delete(&self, queue: &str, message_id: &str) -> QueueResult<()>;

    /// Releases an in-flight message back for redelivery
    fn release(&self, queue: &str, message_id: &str) -> QueueResult<()>;

    /// Number of visible messages on the named queue
    fn depth(&self, queue: &str) -> QueueResult<usize>;
}

//! Blob and watermark storage seams
//!
//! Two small collaborators back the pipeline's durable state:
//! - a write-once blob store for snapshot and detail JSON documents, and
//! - a per-category watermark store holding the highest listing id seen.
//!
//! The watermark store exposes advance-if-greater rather than get/put, so
//! concurrent invocations racing on the same category can never move a
//! watermark backwards.

mod blob_fs;
mod memory;
mod watermark_sqlite;

pub use blob_fs::FsBlobStore;
pub use memory::{MemoryBlobStore, MemoryWatermarkStore};
pub use watermark_sqlite::SqliteWatermarkStore;

use thiserror::Error;

/// Errors from blob store operations
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error writing blob {key}: {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },
}

/// Errors from watermark store operations
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Trait for write-once blob persistence
///
/// Keys are slash-separated paths; a key must never be written twice. Blobs
/// are immutable once written and the pipeline never deletes them.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), BlobError>;
}

/// Trait for per-category watermark storage
pub trait WatermarkStore: Send + Sync {
    /// Current watermark for the category; absent means 0
    fn get(&self, category: &str) -> Result<i64, WatermarkError>;

    /// Advances the watermark to `candidate` if (and only if) it is greater
    /// than the stored value; returns the value in effect afterwards
    fn advance(&self, category: &str, candidate: i64) -> Result<i64, WatermarkError>;
}

/// Storage key for a category's watermark entry
pub(crate) fn watermark_key(category: &str) -> String {
    format!("/{}", category)
}

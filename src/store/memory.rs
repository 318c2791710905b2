//! In-memory blob and watermark stores
//!
//! Test doubles mirroring the durable implementations; the blob store can
//! also be switched into a failing mode to exercise blob-write error paths.

use crate::store::{watermark_key, BlobError, BlobStore, WatermarkError, WatermarkStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory write-once blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail with an IO error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Keys written so far, in order
    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    /// Body of a written blob, if present
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), BlobError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(BlobError::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            });
        }

        let mut blobs = self.blobs.lock().unwrap();
        if blobs.contains_key(key) {
            return Err(BlobError::AlreadyExists(key.to_string()));
        }
        blobs.insert(key.to_string(), body.to_vec());
        Ok(())
    }
}

/// In-memory watermark store with the same advance-if-greater contract as
/// the SQLite implementation
#[derive(Default)]
pub struct MemoryWatermarkStore {
    values: Mutex<BTreeMap<String, i64>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self, category: &str) -> Result<i64, WatermarkError> {
        let values = self.values.lock().unwrap();
        Ok(*values.get(&watermark_key(category)).unwrap_or(&0))
    }

    fn advance(&self, category: &str, candidate: i64) -> Result<i64, WatermarkError> {
        let mut values = self.values.lock().unwrap();
        let entry = values.entry(watermark_key(category)).or_insert(0);
        if candidate > *entry {
            *entry = candidate;
        }
        Ok(*entry)
    }
}

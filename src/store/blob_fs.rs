//! Filesystem blob store
//!
//! Writes each blob under a root directory, creating parent directories as
//! needed. `create_new` enforces write-once: a name collision surfaces as
//! [`BlobError::AlreadyExists`] instead of a silent overwrite.

use crate::store::{BlobError, BlobStore};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Blob store rooted at a local directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, body: &[u8]) -> Result<(), BlobError> {
        let path = self.root.join(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BlobError::Io {
                key: key.to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    BlobError::AlreadyExists(key.to_string())
                } else {
                    BlobError::Io {
                        key: key.to_string(),
                        source,
                    }
                }
            })?;

        file.write_all(body).map_err(|source| BlobError::Io {
            key: key.to_string(),
            source,
        })?;

        tracing::debug!("Wrote blob {} ({} bytes)", key, body.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_creates_nested_path() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("snapshots/house/for-sale/batch_1234.json", b"{}")
            .unwrap();

        let written = dir
            .path()
            .join("snapshots/house/for-sale/batch_1234.json");
        assert_eq!(std::fs::read(written).unwrap(), b"{}");
    }

    #[test]
    fn test_put_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("a.json", b"first").unwrap();
        let second = store.put("a.json", b"second");

        assert!(matches!(second, Err(BlobError::AlreadyExists(_))));
        assert_eq!(
            std::fs::read(dir.path().join("a.json")).unwrap(),
            b"first"
        );
    }
}

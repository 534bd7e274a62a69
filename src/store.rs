//! Content-addressable blob storage
//!
//! Every file version written by the version store lands here, keyed by the
//! SHA-256 of its uncompressed content:
//!
//! ```text
//! objects/
//! └── <prefix>/      # first 2 chars of hash
//!     └── <suffix>   # remaining hash chars
//! ```
//!
//! Identical content is stored once no matter how many commits reference it.
//! Objects are immutable; a write for an existing hash is a no-op.

use crate::compression::CompressionEngine;
use crate::error::{ForkpointError, Result};
use crate::utils;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Sharded, compressed, content-addressed object directory
pub struct ObjectStore {
    /// The `objects/` directory
    root: PathBuf,
    /// Compression engine for transparent compression/decompression
    compression: Arc<Mutex<CompressionEngine>>,
    /// Hashes known to exist on disk
    known: DashSet<String>,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("root", &self.root)
            .field("known_objects", &self.known.len())
            .finish()
    }
}

impl ObjectStore {
    /// Open (creating if needed) the object directory at `root`
    pub fn open(root: PathBuf, compression: CompressionEngine) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            compression: Arc::new(Mutex::new(compression)),
            known: DashSet::new(),
        })
    }

    /// Store content, returning its hash
    pub fn store(&self, content: &[u8]) -> Result<String> {
        let hash = utils::hash_data(content);
        if self.contains(&hash) {
            trace!("Object {} already stored", utils::short_id(&hash));
            return Ok(hash);
        }

        let encoded = self.compression.lock().compress(content)?;
        let path = self.object_path(&hash);
        utils::atomic_write(&path, &encoded)?;
        self.known.insert(hash.clone());

        trace!("Stored object {} ({} -> {} bytes)", utils::short_id(&hash), content.len(), encoded.len());
        Ok(hash)
    }

    /// Load content by hash, verifying it
    pub fn load(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        if !path.exists() {
            return Err(ForkpointError::ObjectNotFound(hash.to_string()));
        }

        let encoded = fs::read(&path)?;
        let content = self.compression.lock().decompress(&encoded)?;

        let actual = utils::hash_data(&content);
        if actual != hash {
            return Err(ForkpointError::CorruptObject { hash: hash.to_string(), actual });
        }

        self.known.insert(hash.to_string());
        Ok(content)
    }

    /// Check if an object exists
    pub fn contains(&self, hash: &str) -> bool {
        self.known.contains(hash) || self.object_path(hash).exists()
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        if hash.len() < 3 {
            return self.root.join(hash);
        }
        let (prefix, suffix) = hash.split_at(2);
        self.root.join(prefix).join(suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionStrategy;
    use tempfile::TempDir;

    fn store() -> (ObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(
            dir.path().join("objects"),
            CompressionEngine::new(CompressionStrategy::Fast),
        )
        .unwrap();
        (store, dir)
    }

    #[test]
    fn test_store_and_load() {
        let (store, _dir) = store();
        let content = b"for i in range(10):\n    print(i)\n".repeat(10);
        let hash = store.store(&content).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(store.contains(&hash));
        assert_eq!(store.load(&hash).unwrap(), content);
    }

    #[test]
    fn test_deduplication() {
        let (store, dir) = store();
        let a = store.store(b"same").unwrap();
        let b = store.store(b"same").unwrap();
        assert_eq!(a, b);

        let shard = dir.path().join("objects").join(&a[..2]);
        assert_eq!(fs::read_dir(shard).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_object() {
        let (store, _dir) = store();
        let missing = "ab".repeat(32);
        assert!(matches!(store.load(&missing), Err(ForkpointError::ObjectNotFound(_))));
    }

    #[test]
    fn test_corruption_detected() {
        let (store, dir) = store();
        let hash = store.store(b"original content").unwrap();
        let path = dir.path().join("objects").join(&hash[..2]).join(&hash[2..]);
        let mut engine = CompressionEngine::new(CompressionStrategy::None);
        fs::write(&path, engine.compress(b"tampered").unwrap()).unwrap();

        assert!(matches!(store.load(&hash), Err(ForkpointError::CorruptObject { .. })));
    }
}

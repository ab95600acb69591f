//! Media Blob Storage backed by the local filesystem

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::BlobStore,
};
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const BODY_EXT: &str = "blob";
const KEY_EXT: &str = "key";

/// Distinguishes temporary files of concurrent writes within one process.
static WRITE_NONCE: AtomicU64 = AtomicU64::new(0);

/// Filesystem blob store
///
/// Each body lives in `<root>/<sha256(key)>.blob` next to a `.key` sidecar
/// holding the original key, so `keys()` can be answered without an index.
/// Writes go to a temporary file first and are renamed into place; a reader
/// never observes a partial body.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Store bodies under the platform cache directory
    pub async fn new() -> Result<Self> {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("offline-media-core")
            .join("media");
        Self::with_root(root).await
    }

    /// Store bodies under `root`, creating it when missing
    pub async fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(path = ?root, "Initialized blob store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn digest(key: &str) -> String {
        let hash = Sha256::digest(key.as_bytes());
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", Self::digest(key), BODY_EXT))
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", Self::digest(key), KEY_EXT))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let nonce = WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), nonce));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.body_path(key)).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match fs::read(self.body_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        Self::write_atomic(&self.key_path(key), key.as_bytes()).await?;
        Self::write_atomic(&self.body_path(key), &body).await?;
        debug!(key = key, size = body.len(), "Stored blob");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::remove_if_present(&self.body_path(key)).await?;
        Self::remove_if_present(&self.key_path(key)).await?;
        debug!(key = key, "Deleted blob");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXT) {
                continue;
            }
            if !fs::try_exists(path.with_extension(BODY_EXT)).await? {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(key) => keys.push(key),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable blob key"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn size_of(&self, key: &str) -> Result<Option<u64>> {
        match fs::metadata(self.body_path(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

/// In-memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.blobs.write().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.blobs.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<Vec<String>> {
        let mut blobs = self.blobs.write();
        let mut keys: Vec<String> = blobs.keys().cloned().collect();
        keys.sort();
        blobs.clear();
        Ok(keys)
    }
}

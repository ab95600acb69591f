//! In-memory bridge fakes shared by unit tests.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::{BlobStore, SettingsStore};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryBlobs {
    pub blobs: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn exists(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.blobs.lock().contains_key(key))
    }
    async fn get(&self, key: &str) -> BridgeResult<Option<Bytes>> {
        Ok(self.blobs.lock().get(key).cloned())
    }
    async fn put(&self, key: &str, body: Bytes) -> BridgeResult<()> {
        self.blobs.lock().insert(key.to_string(), body);
        Ok(())
    }
    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }
    async fn keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.blobs.lock().keys().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemorySettings {
    pub values: Mutex<HashMap<String, String>>,
    pub writes: AtomicUsize,
}

impl MemorySettings {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }
    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

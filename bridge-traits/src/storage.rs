//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for media blob storage, secure credential
//! storage, and key-value settings storage.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Content-addressed media blob storage
///
/// Holds cached media bodies keyed by their normalized request path
/// (for example `/media/42/stream`). The media proxy is the only writer; the
/// cache validator only ever calls [`BlobStore::exists`].
///
/// Implementations must make a completed `put` visible to subsequent
/// `exists`/`get` calls, and must never expose a partially written body.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::BlobStore;
///
/// async fn warm(store: &dyn BlobStore, body: Bytes) -> Result<()> {
///     store.put("/media/42/stream", body).await
/// }
/// ```
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether a body is stored under `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Read the stored body, `Ok(None)` when absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a complete body, replacing any previous value
    async fn put(&self, key: &str, body: Bytes) -> Result<()>;

    /// Remove a body. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every stored key
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove every stored body, returning the keys that were removed
    async fn clear(&self) -> Result<Vec<String>> {
        let keys = self.keys().await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys)
    }

    /// Size of a stored body in bytes
    async fn size_of(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.get(key).await?.map(|body| body.len() as u64))
    }
}

/// Durable credential storage (Keychain, Keystore, Secret Service).
///
/// The media proxy reads the origin credential from here; it is never
/// copied into ordinary settings storage. Implementations must not log
/// values.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret, replacing any previous value
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read a secret, `Ok(None)` when absent
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a secret. Removing an absent key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Key-value preferences (UserDefaults, SharedPreferences, a desktop
/// settings database).
///
/// Holds the cache policy, the queue snapshot and the resume position, each
/// as a JSON string under its own key.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// `Ok(None)` when the key was never written or was deleted
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore(Mutex<BTreeMap<String, Bytes>>);

    #[async_trait]
    impl BlobStore for MapStore {
        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.0.lock().unwrap().contains_key(key))
        }

        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        async fn put(&self, key: &str, body: Bytes) -> Result<()> {
            self.0.lock().unwrap().insert(key.to_string(), body);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }

        async fn keys(&self) -> Result<Vec<String>> {
            Ok(self.0.lock().unwrap().keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_default_clear_and_size() {
        let store = MapStore::default();
        store.put("/media/a/stream", Bytes::from_static(b"abc")).await.unwrap();
        store.put("/media/b/cover", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(store.size_of("/media/a/stream").await.unwrap(), Some(3));
        assert_eq!(store.size_of("/media/missing/stream").await.unwrap(), None);

        let removed = store.clear().await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.keys().await.unwrap().is_empty());
    }
}

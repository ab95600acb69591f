//! Origin credential lookup for the media proxy

use async_trait::async_trait;
use bridge_traits::storage::SecureStore;
use core_runtime::logging::redact_if_sensitive;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supplies the bearer token used for origin fetches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, `None` when signed out.
    async fn auth_token(&self) -> Option<String>;
}

/// Reads the token from the platform secure store.
pub struct SecureStoreCredentials {
    store: Arc<dyn SecureStore>,
    key: String,
}

impl SecureStoreCredentials {
    pub fn new(store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for SecureStoreCredentials {
    async fn auth_token(&self) -> Option<String> {
        match self.store.get_secret(&self.key).await {
            Ok(Some(raw)) => match String::from_utf8(raw) {
                Ok(token) if !token.trim().is_empty() => {
                    debug!(
                        key = %self.key,
                        token = %redact_if_sensitive("token", &token),
                        "Loaded origin credential"
                    );
                    Some(token.trim().to_string())
                }
                Ok(_) => None,
                Err(_) => {
                    warn!(key = %self.key, "Stored credential is not valid UTF-8");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Credential lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapSecrets(Mutex<HashMap<String, Vec<u8>>>);

    #[async_trait]
    impl SecureStore for MapSecrets {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.0.lock().insert(key.to_string(), value.to_vec());
            Ok(())
        }
        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.0.lock().get(key).cloned())
        }
        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.0.lock().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_token_lookup() {
        let store = Arc::new(MapSecrets::default());
        let credentials = SecureStoreCredentials::new(store.clone(), "origin.access_token");
        assert_eq!(credentials.auth_token().await, None);

        store.set_secret("origin.access_token", b"  ").await.unwrap();
        assert_eq!(credentials.auth_token().await, None);

        store.set_secret("origin.access_token", b"abc\n").await.unwrap();
        assert_eq!(credentials.auth_token().await.as_deref(), Some("abc"));
    }
}

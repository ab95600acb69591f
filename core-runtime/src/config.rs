//! # Core Configuration Module
//!
//! Provides configuration management for the offline media core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary bridges and settings. It enforces
//! fail-fast validation so a missing capability is reported at startup rather
//! than on the first media request.
//!
//! ## Required Dependencies
//!
//! - `SecureStore` - holds the origin credential read by the media proxy
//! - `SettingsStore` - holds the cache policy, queue snapshot and resume position
//! - `BlobStore` - holds cached media bodies
//!
//! ## Optional Dependencies
//!
//! - `HttpClient` - origin fetches on cache miss (required when an origin is set)
//! - `NetworkMonitor` - needed for the Wi-Fi-only download timing
//! - `Clock` - defaults to the system clock
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults for
//! every required bridge (and the HTTP client) are injected automatically.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CachePolicy, CoreConfig, DownloadTiming};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .cache_dir("/path/to/cache")
//!     .origin_base_url("https://music.example.com")
//!     .cache_policy(CachePolicy::default().with_download_timing(DownloadTiming::WifiOnly))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    BlobStore, Clock, HttpClient, NetworkMonitor, SecureStore, SettingsStore, SystemClock,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Secure store key the media proxy reads its bearer credential from.
pub const DEFAULT_CREDENTIAL_KEY: &str = "origin.access_token";

/// Settings key the cache policy is persisted under.
pub const CACHE_POLICY_SETTINGS_KEY: &str = "cache.policy";

// ============================================================================
// Cache Policy
// ============================================================================

/// Per-device override of the server-synced cache-all preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalOverride {
    /// Follow the server-synced preference
    #[default]
    Inherit,
    /// Always cache everything on this device
    Always,
    /// Never bulk-cache on this device
    Never,
}

/// When the download manager may start background fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadTiming {
    /// Start as soon as something is queued
    #[default]
    Always,
    /// Only on a connected, unmetered network
    WifiOnly,
    /// Only when explicitly triggered
    Manual,
}

/// Offline caching policy.
///
/// `cache_all_enabled` is synced from the server and only honoured for
/// authenticated users; `local_override` and `download_timing` are device
/// settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    pub cache_all_enabled: bool,
    pub local_override: LocalOverride,
    pub download_timing: DownloadTiming,
}

impl CachePolicy {
    pub fn with_cache_all(mut self, enabled: bool) -> Self {
        self.cache_all_enabled = enabled;
        self
    }

    pub fn with_local_override(mut self, local_override: LocalOverride) -> Self {
        self.local_override = local_override;
        self
    }

    pub fn with_download_timing(mut self, timing: DownloadTiming) -> Self {
        self.download_timing = timing;
        self
    }

    /// Whether the whole visible library should be prefetched.
    pub fn effective_cache_all(&self, authenticated: bool) -> bool {
        match self.local_override {
            LocalOverride::Always => true,
            LocalOverride::Never => false,
            LocalOverride::Inherit => self.cache_all_enabled && authenticated,
        }
    }

    /// Load the persisted policy, `None` when nothing was saved yet.
    pub async fn load(settings: &dyn SettingsStore) -> Result<Option<Self>> {
        match settings.get_string(CACHE_POLICY_SETTINGS_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, settings: &dyn SettingsStore) -> Result<()> {
        let raw = serde_json::to_string(self)?;
        settings.set_string(CACHE_POLICY_SETTINGS_KEY, &raw).await?;
        Ok(())
    }
}

// ============================================================================
// Core Configuration
// ============================================================================

/// Core configuration for the offline media core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite metadata database
    pub database_path: PathBuf,

    /// Directory for cached media blobs
    pub cache_dir: PathBuf,

    /// Origin the proxy forwards cache misses to, e.g. `https://music.example.com`
    pub origin_base_url: Option<String>,

    /// Secure store key holding the origin credential
    pub credential_key: String,

    pub http_client: Option<Arc<dyn HttpClient>>,

    pub blob_store: Arc<dyn BlobStore>,

    pub secure_store: Arc<dyn SecureStore>,

    pub settings_store: Arc<dyn SettingsStore>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub clock: Arc<dyn Clock>,

    /// Initial cache policy; a persisted policy takes precedence at startup
    pub cache_policy: CachePolicy,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("origin_base_url", &self.origin_base_url)
            .field("credential_key", &self.credential_key)
            .field("http_client", &self.http_client.as_ref().map(|_| "HttpClient"))
            .field("network_monitor", &self.network_monitor.as_ref().map(|_| "NetworkMonitor"))
            .field("cache_policy", &self.cache_policy)
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.credential_key.trim().is_empty() {
            return Err(Error::Config("Credential key cannot be empty".to_string()));
        }

        if let Some(origin) = &self.origin_base_url {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "Origin base URL must be http(s), got '{}'",
                    origin
                )));
            }

            if self.http_client.is_none() {
                return Err(Error::CapabilityMissing {
                    capability: "HttpClient".to_string(),
                    message: "An origin is configured but no HttpClient was provided. \
                             Desktop: enable the 'desktop-shims' feature. \
                             Mobile: inject the platform HTTP adapter."
                        .to_string(),
                });
            }
        }

        if self.cache_policy.download_timing == DownloadTiming::WifiOnly
            && self.network_monitor.is_none()
        {
            return Err(Error::Config(
                "Wi-Fi-only downloads require a NetworkMonitor. \
                 Inject one or choose a different download timing."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Desktop defaults
// ============================================================================

fn capability_missing(capability: &str, desktop_default: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required. \
             Desktop: enable the 'desktop-shims' feature to use {}. \
             Mobile: inject the platform-native adapter.",
            capability, desktop_default
        ),
    }
}

/// Run an async constructor to completion from synchronous builder code.
///
/// Inside a runtime the work moves to a helper thread with its own runtime so
/// the caller's worker is never blocked on itself.
#[cfg(feature = "desktop-shims")]
fn block_on_fresh_runtime<T, F, Fut>(make: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T>>,
{
    use tokio::runtime::{Builder, Handle};

    let run = move || -> Result<T> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create Tokio runtime: {}", e)))?;
        runtime.block_on(make())
    };

    match Handle::try_current() {
        Ok(_) => std::thread::spawn(run).join().map_err(|_| {
            Error::Internal("Helper thread panicked while creating a default bridge".to_string())
        })?,
        Err(_) => run(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(capability_missing("SecureStore", "KeyringSecureStore"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(
    database_path: &Path,
    cache_dir: &Path,
) -> Result<Arc<dyn SettingsStore>> {
    let candidate = database_path
        .parent()
        .map(|parent| parent.join("settings.db"))
        .unwrap_or_else(|| cache_dir.join("settings.db"));

    let store = block_on_fresh_runtime(move || async move {
        bridge_desktop::SqliteSettingsStore::new(candidate)
            .await
            .map_err(Error::from)
    })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(
    _database_path: &Path,
    _cache_dir: &Path,
) -> Result<Arc<dyn SettingsStore>> {
    Err(capability_missing("SettingsStore", "SqliteSettingsStore"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_blob_store(cache_dir: &Path) -> Result<Arc<dyn BlobStore>> {
    let root = cache_dir.join("media");
    let store = block_on_fresh_runtime(move || async move {
        bridge_desktop::FsBlobStore::with_root(root)
            .await
            .map_err(Error::from)
    })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_blob_store(_cache_dir: &Path) -> Result<Arc<dyn BlobStore>> {
    Err(capability_missing("BlobStore", "FsBlobStore"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Option<Arc<dyn HttpClient>> {
    Some(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Option<Arc<dyn HttpClient>> {
    None
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    origin_base_url: Option<String>,
    credential_key: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    cache_policy: CachePolicy,
}

impl CoreConfigBuilder {
    /// Sets the SQLite metadata database path.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the directory cached media is stored under.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the origin cache misses are fetched from. A trailing slash is dropped.
    pub fn origin_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.origin_base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = Some(key.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Missing required bridges fall back to desktop defaults when the
    /// `desktop-shims` feature is enabled, and fail with
    /// [`Error::CapabilityMissing`] otherwise.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&database_path, &cache_dir)?,
        };

        let blob_store = match self.blob_store {
            Some(store) => store,
            None => provide_default_blob_store(&cache_dir)?,
        };

        let http_client = match (self.http_client, &self.origin_base_url) {
            (Some(client), _) => Some(client),
            (None, Some(_)) => provide_default_http_client(),
            (None, None) => None,
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            origin_base_url: self.origin_base_url,
            credential_key: self
                .credential_key
                .unwrap_or_else(|| DEFAULT_CREDENTIAL_KEY.to_string()),
            http_client,
            blob_store,
            secure_store,
            settings_store,
            network_monitor: self.network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            cache_policy: self.cache_policy,
        };

        config.validate()?;

        Ok(config)
    }
}

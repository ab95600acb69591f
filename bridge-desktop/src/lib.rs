//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `BlobStore` using `tokio::fs` with SHA-256 addressed files
//! - `SecureStore` using the `keyring` crate
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `NetworkMonitor` using a TCP reachability check
//!
//! In-memory variants of the stores are exported for tests and for hosts
//! that keep everything in process.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FsBlobStore, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new();
//!     let blobs = FsBlobStore::new().await?;
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod blob_store;
mod http;
mod network;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use blob_store::{FsBlobStore, MemoryBlobStore};
pub use http::ReqwestHttpClient;
pub use network::{DesktopNetworkMonitor, StaticNetworkMonitor};
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::{KeyringSecureStore, MemorySecureStore};

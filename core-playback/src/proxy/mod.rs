//! # Media Proxy
//!
//! Serves cached media with byte-range support and populates the blob cache
//! from origin on authenticated misses.
//!
//! ```text
//! Player ──> ProxyController ──> MediaProxyHandle ──(mpsc)──> proxy task
//!                                                               │
//!                        BlobStore <── get / put (background) ──┤
//!                        HttpClient <── origin fetch (bearer) ──┤
//!                        CacheMessage ──(mpsc, single consumer)─┘
//! ```

pub mod actor;
pub mod controller;
pub mod credentials;
pub mod messages;
pub mod range;
#[cfg(feature = "proxy-server")]
pub mod server;

pub use actor::{MediaProxy, MediaProxyHandle, ProxyDeps};
pub use controller::ProxyController;
pub use credentials::{CredentialProvider, SecureStoreCredentials};
pub use messages::{
    cache_channel, CacheMessage, CacheMessageReceiver, CacheMessageSender, MediaRequest,
    ProxyCommand, ProxyMode,
};
pub use range::{parse_range, ByteRange, RangeError};

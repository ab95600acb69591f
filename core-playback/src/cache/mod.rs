//! # Offline Cache Module
//!
//! Availability checks and background prefetch for stream blobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheValidator                     │
//! │  - is_cached()        (memo, TTL)      │
//! │  - prevalidate_many() (10 in flight)   │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> BlobStore (existence)
//!          └──> CacheStatusRepository (background reconcile)
//!
//! ┌────────────────────────────────────────┐
//! │     DownloadManager                    │
//! │  - enqueue() / trigger()               │
//! │  - queue_status() / subscribe()        │
//! └────────┬───────────────────────────────┘
//!          │
//!          └──> MediaFetcher (media proxy)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheValidator, DownloadRequest};
//!
//! # async fn example(validator: &CacheValidator, downloads: &core_playback::cache::DownloadManager) {
//! if !validator.is_cached("song-1", "/media/song-1/stream").await {
//!     downloads
//!         .enqueue(DownloadRequest::new("song-1", "/media/song-1/stream"))
//!         .await;
//! }
//! # }
//! ```

pub mod config;
pub mod download;
pub mod key;
pub mod stats;
pub mod validator;

pub use config::CacheConfig;
pub use download::{DownloadManager, DownloadManagerDeps, DownloadRequest, MediaFetcher};
pub use key::{cache_key, MediaKind, MediaPath};
pub use stats::{CacheStats, QueueStatus};
pub use validator::CacheValidator;

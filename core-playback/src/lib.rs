//! # Playback & Offline Cache
//!
//! Everything between the library database and the host audio output.
//!
//! ## Overview
//!
//! This module handles:
//! - Cache availability checks with a short-lived memo ([`cache::CacheValidator`])
//! - The media proxy serving cached bytes with HTTP range support ([`proxy`])
//! - Background downloads with network-aware timing ([`cache::DownloadManager`])
//! - The play queue with repeat and shuffle ([`queue`])
//! - Session restore and position persistence ([`position`])
//! - Driving the host audio output ([`player::Player`])
//!
//! The proxy never writes cache status. It reports blob changes as
//! [`proxy::CacheMessage`]s, and a single subscriber applies them to the
//! database.

pub mod cache;
pub mod error;
pub mod player;
pub mod position;
pub mod proxy;
pub mod queue;

#[cfg(test)]
mod test_support;

pub use cache::{
    CacheConfig, CacheStats, CacheValidator, DownloadManager, DownloadManagerDeps,
    DownloadRequest, MediaFetcher, QueueStatus,
};
pub use error::{PlaybackError, Result};
pub use player::{PlaybackAdapter, Player, PlayerDeps, PlayerState, PlayerStatus};
pub use position::{PositionReason, PositionTracker, SavedPosition, SessionStore};
pub use proxy::{
    cache_channel, CacheMessage, CacheMessageReceiver, CacheMessageSender, CredentialProvider,
    MediaProxyHandle, MediaRequest, ProxyController, ProxyDeps, ProxyMode,
    SecureStoreCredentials,
};
pub use queue::{PlaybackQueue, QueueEntry, QueueSnapshot, RepeatMode};

//! # Playback Error Types

use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use thiserror::Error;

/// Errors from the cache, proxy, download and player layers.
///
/// Cache checks never surface these; they fail closed to "not cached".
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Queue / transport
    // ========================================================================
    /// Attempted operation when no track is loaded.
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Queue has no entries.
    #[error("Playback queue is empty")]
    QueueEmpty,

    /// Queue entry id is not in the queue.
    #[error("Queue entry not found: {0}")]
    EntryNotFound(u64),

    /// Song is neither cached nor reachable over the network.
    #[error("Song not available offline: {0}")]
    UnavailableOffline(String),

    /// Platform playback adapter failed.
    #[error("Playback adapter error: {0}")]
    Adapter(String),

    // ========================================================================
    // Cache / proxy
    // ========================================================================
    /// Media proxy task has stopped or never started.
    #[error("Media proxy unavailable")]
    ProxyUnavailable,

    /// Origin or proxy answered a prefetch with a non-200 status.
    #[error("Media fetch failed with status {status}")]
    FetchFailed { status: u16 },

    /// No staged proxy to promote.
    #[error("No staged media proxy")]
    NothingStaged,

    /// Invalid cache or player configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Lower layers
    // ========================================================================
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if playback can continue with another track.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackError::UnavailableOffline(_)
                | PlaybackError::ProxyUnavailable
                | PlaybackError::FetchFailed { .. }
                | PlaybackError::Adapter(_)
        )
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        match self {
            PlaybackError::UnavailableOffline(_) => true,
            PlaybackError::Bridge(e) => e.is_network(),
            _ => false,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

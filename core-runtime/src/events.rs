//! # Event Bus System
//!
//! Typed broadcast events for the offline media core, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain (cache, downloads, library, playback)
//!   wrapped by [`CoreEvent`]
//! - **EventBus**: central broadcast channel; clone it to get more producers
//!
//! ```text
//! ┌────────────────┐  emit   ┌──────────┐  subscribe  ┌─────────────┐
//! │ CacheSyncBridge├────────>│          ├────────────>│ Host / UI   │
//! └────────────────┘         │ EventBus │             └─────────────┘
//! ┌────────────────┐  emit   │          │  subscribe  ┌─────────────┐
//! │ DownloadManager├────────>│          ├────────────>│ Diagnostics │
//! └────────────────┘         └──────────┘             └─────────────┘
//! ```
//!
//! The bus is a fan-out notification channel. It is deliberately not used for
//! proxy → bridge cache messages, which travel over a dedicated single-consumer
//! channel owned by the sync bridge.
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: subscriber missed `n` events; keep receiving.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Download(DownloadEvent::Queued {
//!         song_id: "song-1".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Download(DownloadEvent::Queued { .. })));
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Cache status and proxy events
    Cache(CacheEvent),
    /// Background download events
    Download(DownloadEvent),
    /// Library replica events
    Library(LibraryEvent),
    /// Playback and queue events
    Playback(PlaybackEvent),
}

// ============================================================================
// Cache Events
// ============================================================================

/// Cache status changes as reconciled into the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A song's stream became available offline.
    SongCached {
        song_id: String,
        /// Size of the stored body in bytes.
        size_bytes: u64,
    },
    /// A song's stream was removed from the blob cache.
    SongEvicted { song_id: String },
    /// The proxy could not fetch a song from origin.
    FetchFailed { song_id: String, reason: String },
    /// The whole blob cache was cleared.
    Cleared {
        /// Number of blobs removed.
        removed: usize,
    },
    /// A staged proxy took over request handling.
    ProxyActivated { generation: u64 },
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the background download queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// A song was added to the queue.
    Queued { song_id: String },
    /// A worker started fetching a song.
    Started { song_id: String },
    /// The song is now in the blob cache.
    Completed { song_id: String, size_bytes: u64 },
    /// The fetch failed; the song stays in the error state until re-queued.
    Failed { song_id: String, message: String },
    /// Nothing pending or active remains.
    Drained,
}

// ============================================================================
// Library Events
// ============================================================================

/// Events related to the local library replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// A song was tombstoned locally or by the server.
    SongDeleted { song_id: String },
    /// Playlist membership or details changed.
    PlaylistUpdated { playlist_id: String },
    /// A batch of server records was applied to the replica.
    RemoteApplied {
        entity_type: String,
        applied: u64,
        skipped: u64,
    },
    /// Acknowledged tombstones were physically removed.
    TombstonesPurged { count: u64 },
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events related to playback and the play queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// Playback of a song started.
    Started { song_id: String },
    /// Playback paused.
    Paused {
        song_id: String,
        /// Position when paused (milliseconds).
        position_ms: u64,
    },
    /// Playback resumed after pause.
    Resumed { song_id: String, position_ms: u64 },
    /// Playback stopped.
    Stopped { song_id: String },
    /// Track finished playing naturally.
    Completed { song_id: String },
    /// A seek was performed or a saved position was restored.
    Seeked { song_id: String, position_ms: u64 },
    /// Queue contents or order changed.
    QueueChanged { length: usize },
    /// Shuffle toggled.
    ShuffleChanged { enabled: bool },
    /// Repeat mode changed (`off`, `all`, `one`).
    RepeatModeChanged { mode: String },
    /// Playback error occurred.
    Error {
        song_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus
///     .emit(CoreEvent::Cache(CacheEvent::Cleared { removed: 3 }))
///     .ok();
/// assert!(subscriber.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers that fall behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers; emitters in this
    /// workspace treat that as non-fatal and discard it with `.ok()`.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed; stateful services expose `watch` receivers
    /// for snapshot-then-changes semantics.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

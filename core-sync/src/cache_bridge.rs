//! # Cache Sync Bridge
//!
//! Applies media proxy [`CacheMessage`]s to the cache status projection and
//! drops the validator memo for every song it touches.
//!
//! The bridge owns the only [`CacheMessageReceiver`], so it is the single
//! consumer of proxy output. Delivery is at-least-once: every handler is a
//! plain state upsert, so a replayed message leaves the replica as it was.
//! Rows are never created here; a message for an unknown song is ignored.

use crate::error::Result;
use bridge_traits::time::Clock;
use core_library::repositories::CacheStatusRepository;
use core_playback::cache::CacheValidator;
use core_playback::proxy::{CacheMessage, CacheMessageReceiver};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// What a message did to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The status row was written.
    Applied,
    /// No visible row for the song, or the transition was not allowed.
    Ignored,
    /// Error reports are logged only.
    Logged,
}

/// Totals for one bridge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub failed: u64,
}

pub struct CacheSyncBridge {
    statuses: Arc<dyn CacheStatusRepository>,
    validator: Arc<CacheValidator>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl CacheSyncBridge {
    pub fn new(
        statuses: Arc<dyn CacheStatusRepository>,
        validator: Arc<CacheValidator>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            statuses,
            validator,
            clock,
            events,
        }
    }

    /// Consume `messages` until every sender is dropped.
    pub fn spawn(self, messages: CacheMessageReceiver) -> JoinHandle<BridgeStats> {
        tokio::spawn(self.run(messages))
    }

    pub async fn run(self, mut messages: CacheMessageReceiver) -> BridgeStats {
        let mut stats = BridgeStats::default();
        while let Some(message) = messages.recv().await {
            stats.received += 1;
            match self.apply(&message).await {
                Ok(BridgeOutcome::Applied) => stats.applied += 1,
                Ok(BridgeOutcome::Ignored) | Ok(BridgeOutcome::Logged) => stats.ignored += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(song_id = message.song_id(), error = %e, "Failed to apply cache message");
                }
            }
        }
        info!(?stats, "Cache sync bridge stopped");
        stats
    }

    /// Apply one message.
    #[instrument(skip(self, message), fields(song_id = message.song_id()))]
    pub async fn apply(&self, message: &CacheMessage) -> Result<BridgeOutcome> {
        let now = self.clock.unix_timestamp_millis();
        match message {
            CacheMessage::Added { song_id, size, .. } => {
                if self.statuses.get(song_id).await?.is_none() {
                    debug!("No status row for cached song");
                    return Ok(BridgeOutcome::Ignored);
                }
                let written = self.statuses.mark_cached(song_id, *size, now).await?;
                self.validator.invalidate_song(song_id);
                if !written {
                    return Ok(BridgeOutcome::Ignored);
                }
                self.emit(CacheEvent::SongCached {
                    song_id: song_id.clone(),
                    size_bytes: *size,
                });
                Ok(BridgeOutcome::Applied)
            }
            CacheMessage::Deleted { song_id, .. } => {
                let written = self.statuses.mark_not_cached(song_id, now).await?;
                self.validator.invalidate_song(song_id);
                if !written {
                    return Ok(BridgeOutcome::Ignored);
                }
                self.emit(CacheEvent::SongEvicted {
                    song_id: song_id.clone(),
                });
                Ok(BridgeOutcome::Applied)
            }
            CacheMessage::Error {
                song_id, reason, ..
            } => {
                warn!(%reason, "Proxy reported a fetch failure");
                self.emit(CacheEvent::FetchFailed {
                    song_id: song_id.clone(),
                    reason: reason.clone(),
                });
                Ok(BridgeOutcome::Logged)
            }
        }
    }

    fn emit(&self, event: CacheEvent) {
        self.events.emit(CoreEvent::Cache(event)).ok();
    }
}

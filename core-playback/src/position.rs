//! # Session Persistence
//!
//! Queue snapshots and resume positions stored through the host
//! [`SettingsStore`]. Position writes are throttled while playing and
//! immediate on pause, seek and track change. Writes are best effort: the
//! last completed write wins and failures are only logged.

use crate::error::Result;
use crate::queue::QueueSnapshot;
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const QUEUE_SETTINGS_KEY: &str = "playback.queue";
pub const POSITION_SETTINGS_KEY: &str = "playback.position";

/// Where playback was when last persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub song_id: String,
    pub entry_id: Option<u64>,
    pub position_ms: u64,
    pub saved_at: i64,
}

/// Why a position is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionReason {
    /// Periodic update while playing; throttled
    Playing,
    Paused,
    Seeked,
    TrackChanged,
}

impl PositionReason {
    fn is_immediate(&self) -> bool {
        !matches!(self, PositionReason::Playing)
    }
}

/// JSON documents in the settings store.
#[derive(Clone)]
pub struct SessionStore {
    settings: Arc<dyn SettingsStore>,
}

impl SessionStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    pub async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.settings.set_string(QUEUE_SETTINGS_KEY, &raw).await?;
        Ok(())
    }

    /// Stored queue, `None` when absent or unreadable.
    pub async fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        self.load(QUEUE_SETTINGS_KEY).await
    }

    pub async fn save_position(&self, position: &SavedPosition) -> Result<()> {
        let raw = serde_json::to_string(position)?;
        self.settings.set_string(POSITION_SETTINGS_KEY, &raw).await?;
        Ok(())
    }

    pub async fn load_position(&self) -> Result<Option<SavedPosition>> {
        self.load(POSITION_SETTINGS_KEY).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.settings.delete(QUEUE_SETTINGS_KEY).await?;
        self.settings.delete(POSITION_SETTINGS_KEY).await?;
        Ok(())
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.settings.get_string(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable session data");
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
struct TrackerState {
    last_persisted_at: Option<i64>,
    /// Resume offset waiting for its track to load.
    pending_seek: Option<SavedPosition>,
}

/// Throttles position writes and hands out the resume offset once.
pub struct PositionTracker {
    store: SessionStore,
    clock: Arc<dyn Clock>,
    interval_ms: i64,
    state: Mutex<TrackerState>,
}

impl PositionTracker {
    pub fn new(store: SessionStore, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval_ms: interval.as_millis().min(i64::MAX as u128) as i64,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Persist `position` unless a periodic write is due later.
    /// Returns whether a write was attempted.
    pub async fn record(
        &self,
        reason: PositionReason,
        song_id: &str,
        entry_id: Option<u64>,
        position_ms: u64,
    ) -> bool {
        let now = self.clock.unix_timestamp_millis();
        {
            let mut state = self.state.lock();
            let due = match state.last_persisted_at {
                Some(last) => now - last >= self.interval_ms,
                None => true,
            };
            if !reason.is_immediate() && !due {
                return false;
            }
            state.last_persisted_at = Some(now);
        }

        let position = SavedPosition {
            song_id: song_id.to_string(),
            entry_id,
            position_ms,
            saved_at: now,
        };
        match self.store.save_position(&position).await {
            Ok(()) => debug!(song_id, position_ms, ?reason, "Position saved"),
            Err(e) => warn!(song_id, error = %e, "Failed to save position"),
        }
        true
    }

    /// Remember a restored position to apply on the next load of its song.
    pub fn arm_resume(&self, position: SavedPosition) {
        self.state.lock().pending_seek = Some(position);
    }

    /// Resume offset for the track being loaded. Consumed on the first load
    /// after arming, whether or not the song matches.
    pub fn take_resume_offset(&self, song_id: &str, entry_id: Option<u64>) -> Option<u64> {
        let pending = self.state.lock().pending_seek.take()?;
        let entry_matches = match (pending.entry_id, entry_id) {
            (Some(saved), Some(loading)) => saved == loading,
            _ => true,
        };
        (pending.song_id == song_id && entry_matches && pending.position_ms > 0)
            .then_some(pending.position_ms)
    }

    pub fn has_pending_resume(&self) -> bool {
        self.state.lock().pending_seek.is_some()
    }
}

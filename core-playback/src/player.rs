//! # Player
//!
//! Drives a host [`PlaybackAdapter`] from the [`PlaybackQueue`]. Before a track
//! is loaded its availability is checked: an uncached song on an offline device
//! is reported as a recoverable error instead of being handed to the adapter.
//!
//! State is published through a `watch` channel (current snapshot on
//! subscribe, then every change) and transitions are mirrored on the event
//! bus. Queue snapshots and positions are persisted fire-and-forget.

use crate::cache::key::cache_key;
use crate::cache::validator::CacheValidator;
use crate::error::{PlaybackError, Result};
use crate::position::{PositionReason, PositionTracker};
use crate::queue::{PlaybackQueue, QueueEntry, RepeatMode};
use async_trait::async_trait;
use bridge_traits::network::NetworkMonitor;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

/// Platform audio output.
///
/// Implementations wrap the host media player. URLs point at the media
/// endpoint, so cached and streamed songs look the same to the adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackAdapter: Send + Sync {
    /// Load a track and position it at `start`.
    async fn load(&self, url: &str, start: Duration) -> Result<()>;

    async fn play(&self) -> Result<()>;

    /// Pause playback without releasing resources.
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Stop playback and release resources.
    async fn stop(&self) -> Result<()>;

    /// Seek to an absolute position in the current track.
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Elapsed time in the current track.
    async fn position(&self) -> Result<Duration>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
}

/// Observable player state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerState {
    pub status: PlayerStatus,
    pub song_id: Option<String>,
    pub entry_id: Option<u64>,
    pub position_ms: u64,
    pub shuffle_enabled: bool,
    pub repeat_mode: RepeatMode,
    pub queue_length: usize,
}

/// Collaborators of a [`Player`].
pub struct PlayerDeps {
    pub adapter: Arc<dyn PlaybackAdapter>,
    pub validator: Arc<CacheValidator>,
    pub network: Option<Arc<dyn NetworkMonitor>>,
    pub tracker: Arc<PositionTracker>,
    pub events: EventBus,
    /// Prefix for adapter URLs, e.g. the loopback media endpoint.
    pub media_base_url: Option<String>,
}

pub struct Player {
    queue: Mutex<PlaybackQueue>,
    adapter: Arc<dyn PlaybackAdapter>,
    validator: Arc<CacheValidator>,
    network: Option<Arc<dyn NetworkMonitor>>,
    tracker: Arc<PositionTracker>,
    events: EventBus,
    media_base_url: Option<String>,
    state_tx: watch::Sender<PlayerState>,
}

impl Player {
    pub fn new(deps: PlayerDeps, queue: PlaybackQueue) -> Self {
        let (state_tx, _) = watch::channel(PlayerState::default());
        Self {
            queue: Mutex::new(queue),
            adapter: deps.adapter,
            validator: deps.validator,
            network: deps.network,
            tracker: deps.tracker,
            events: deps.events,
            media_base_url: deps.media_base_url,
            state_tx,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state_tx.borrow().clone()
    }

    /// Current state immediately, then every change.
    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state_tx.subscribe()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Restore the persisted queue and arm the saved resume position.
    /// Playback does not start. Returns whether a queue was restored.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> Result<bool> {
        let store = self.tracker.store();
        let Some(snapshot) = store.load_queue().await? else {
            return Ok(false);
        };

        let mut queue = self.queue.lock().await;
        queue.restore(snapshot);
        let current = queue.current().cloned();

        let mut position_ms = 0;
        if let (Some(saved), Some(entry)) = (store.load_position().await?, &current) {
            if saved.song_id == entry.song_id {
                position_ms = saved.position_ms;
                self.tracker.arm_resume(saved);
            }
        }

        self.publish(&queue, PlayerStatus::Idle, position_ms);
        info!(entries = queue.len(), position_ms, "Playback session restored");
        drop(queue);
        self.emit(PlaybackEvent::QueueChanged {
            length: self.state().queue_length,
        });
        Ok(true)
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Replace the queue and start playing `start_index`.
    pub async fn set_queue(&self, songs: Vec<(String, String)>, start_index: usize) -> Result<()> {
        let entry = {
            let mut queue = self.queue.lock().await;
            queue.replace(songs, start_index);
            self.after_queue_change(&queue);
            queue.current().cloned()
        };
        match entry {
            Some(entry) => self.load_entry(entry).await,
            None => Err(PlaybackError::QueueEmpty),
        }
    }

    pub async fn append(&self, song_id: &str, stream_url: &str) -> u64 {
        let mut queue = self.queue.lock().await;
        let entry_id = queue.append(song_id, stream_url);
        self.after_queue_change(&queue);
        entry_id
    }

    pub async fn play_next(&self, song_id: &str, stream_url: &str) -> u64 {
        let mut queue = self.queue.lock().await;
        let entry_id = queue.play_next(song_id, stream_url);
        self.after_queue_change(&queue);
        entry_id
    }

    /// Remove an entry. Removing the current entry stops playback.
    pub async fn remove(&self, entry_id: u64) -> Result<()> {
        let was_current = self.state().entry_id == Some(entry_id);
        {
            let mut queue = self.queue.lock().await;
            queue.remove(entry_id)?;
            self.after_queue_change(&queue);
        }
        if was_current {
            self.stop().await?;
        }
        Ok(())
    }

    pub async fn jump_to(&self, entry_id: u64) -> Result<()> {
        let entry = self.queue.lock().await.jump_to(entry_id)?.clone();
        self.load_entry(entry).await
    }

    pub async fn toggle_shuffle(&self) -> bool {
        let mut queue = self.queue.lock().await;
        let enabled = queue.toggle_shuffle();
        self.after_queue_change(&queue);
        self.emit(PlaybackEvent::ShuffleChanged { enabled });
        enabled
    }

    pub async fn cycle_repeat_mode(&self) -> RepeatMode {
        let mut queue = self.queue.lock().await;
        let mode = queue.cycle_repeat_mode();
        self.after_queue_change(&queue);
        self.emit(PlaybackEvent::RepeatModeChanged {
            mode: mode.to_string(),
        });
        mode
    }

    pub async fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.queue
            .lock()
            .await
            .play_order()
            .into_iter()
            .cloned()
            .collect()
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Resume when paused, otherwise load the current entry.
    pub async fn play(&self) -> Result<()> {
        if self.state().status == PlayerStatus::Paused {
            return self.resume().await;
        }
        let entry = self.queue.lock().await.current().cloned();
        match entry {
            Some(entry) => self.load_entry(entry).await,
            None => Err(PlaybackError::QueueEmpty),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let state = self.state();
        let song_id = state.song_id.clone().ok_or(PlaybackError::NoTrackLoaded)?;
        self.adapter_call(self.adapter.pause(), Some(&song_id)).await?;
        let position_ms = self.adapter_position().await.unwrap_or(state.position_ms);

        self.update(|s| {
            s.status = PlayerStatus::Paused;
            s.position_ms = position_ms;
        });
        self.persist_position(PositionReason::Paused, &song_id, state.entry_id, position_ms);
        self.emit(PlaybackEvent::Paused {
            song_id,
            position_ms,
        });
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let state = self.state();
        let song_id = state.song_id.clone().ok_or(PlaybackError::NoTrackLoaded)?;
        self.adapter_call(self.adapter.resume(), Some(&song_id)).await?;
        self.update(|s| s.status = PlayerStatus::Playing);
        self.emit(PlaybackEvent::Resumed {
            song_id,
            position_ms: state.position_ms,
        });
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let state = self.state();
        self.adapter_call(self.adapter.stop(), state.song_id.as_deref())
            .await?;
        self.update(|s| s.status = PlayerStatus::Stopped);
        if let Some(song_id) = state.song_id {
            self.emit(PlaybackEvent::Stopped { song_id });
        }
        Ok(())
    }

    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        let state = self.state();
        let song_id = state.song_id.clone().ok_or(PlaybackError::NoTrackLoaded)?;
        self.adapter_call(
            self.adapter.seek(Duration::from_millis(position_ms)),
            Some(&song_id),
        )
        .await?;
        self.update(|s| s.position_ms = position_ms);
        self.persist_position(PositionReason::Seeked, &song_id, state.entry_id, position_ms);
        self.emit(PlaybackEvent::Seeked {
            song_id,
            position_ms,
        });
        Ok(())
    }

    /// Advance per repeat mode; stops at the end with repeat off.
    pub async fn next(&self) -> Result<()> {
        let entry = self.queue.lock().await.next().cloned();
        match entry {
            Some(entry) => self.load_entry(entry).await,
            None => self.stop().await,
        }
    }

    pub async fn previous(&self) -> Result<()> {
        let entry = self.queue.lock().await.previous().cloned();
        match entry {
            Some(entry) => self.load_entry(entry).await,
            None => self.stop().await,
        }
    }

    /// Called by the host when the adapter reaches the end of a track.
    pub async fn track_completed(&self) -> Result<()> {
        if let Some(song_id) = self.state().song_id {
            self.emit(PlaybackEvent::Completed { song_id });
        }
        self.next().await
    }

    /// Periodic position update from the host while playing.
    pub async fn tick(&self) -> Result<u64> {
        let state = self.state();
        let song_id = state.song_id.clone().ok_or(PlaybackError::NoTrackLoaded)?;
        let position_ms = self.adapter_position().await?;
        self.update(|s| s.position_ms = position_ms);
        if state.status == PlayerStatus::Playing {
            self.persist_position(PositionReason::Playing, &song_id, state.entry_id, position_ms);
        }
        Ok(position_ms)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    #[instrument(skip(self, entry), fields(song_id = %entry.song_id))]
    async fn load_entry(&self, entry: QueueEntry) -> Result<()> {
        self.update(|s| {
            s.status = PlayerStatus::Loading;
            s.song_id = Some(entry.song_id.clone());
            s.entry_id = Some(entry.entry_id);
            s.position_ms = 0;
        });

        let cached = self
            .validator
            .is_cached(&entry.song_id, &entry.stream_url)
            .await;
        if !cached && self.is_offline().await {
            warn!("Song is not cached and the device is offline");
            self.update(|s| s.status = PlayerStatus::Stopped);
            let error = PlaybackError::UnavailableOffline(entry.song_id.clone());
            self.emit_error(Some(&entry.song_id), &error);
            return Err(error);
        }

        let offset_ms = self
            .tracker
            .take_resume_offset(&entry.song_id, Some(entry.entry_id))
            .unwrap_or(0);
        let url = self.media_url(&entry.stream_url);
        debug!(%url, offset_ms, cached, "Loading track");

        let loaded = async {
            self.adapter
                .load(&url, Duration::from_millis(offset_ms))
                .await?;
            self.adapter.play().await
        };
        if let Err(e) = loaded.await {
            self.update(|s| s.status = PlayerStatus::Stopped);
            self.emit_error(Some(&entry.song_id), &e);
            return Err(e);
        }

        self.update(|s| {
            s.status = PlayerStatus::Playing;
            s.position_ms = offset_ms;
        });
        self.emit(PlaybackEvent::Started {
            song_id: entry.song_id.clone(),
        });
        if offset_ms > 0 {
            self.emit(PlaybackEvent::Seeked {
                song_id: entry.song_id.clone(),
                position_ms: offset_ms,
            });
        }
        self.persist_position(
            PositionReason::TrackChanged,
            &entry.song_id,
            Some(entry.entry_id),
            offset_ms,
        );
        let snapshot = self.queue.lock().await.snapshot();
        self.persist_queue(snapshot);
        Ok(())
    }

    fn media_url(&self, stream_url: &str) -> String {
        match &self.media_base_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), cache_key(stream_url)),
            None => stream_url.to_string(),
        }
    }

    async fn is_offline(&self) -> bool {
        match &self.network {
            Some(network) => !network.is_connected().await,
            None => false,
        }
    }

    async fn adapter_position(&self) -> Result<u64> {
        let position = self.adapter.position().await?;
        Ok(position.as_millis().min(u64::MAX as u128) as u64)
    }

    async fn adapter_call<F>(&self, call: F, song_id: Option<&str>) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        call.await.map_err(|e| {
            self.emit_error(song_id, &e);
            e
        })
    }

    fn after_queue_change(&self, queue: &PlaybackQueue) {
        self.update(|s| {
            s.queue_length = queue.len();
            s.shuffle_enabled = queue.shuffle_enabled();
            s.repeat_mode = queue.repeat_mode();
        });
        self.emit(PlaybackEvent::QueueChanged {
            length: queue.len(),
        });
        self.persist_queue(queue.snapshot());
    }

    fn publish(&self, queue: &PlaybackQueue, status: PlayerStatus, position_ms: u64) {
        let current = queue.current();
        self.state_tx.send_replace(PlayerState {
            status,
            song_id: current.map(|e| e.song_id.clone()),
            entry_id: current.map(|e| e.entry_id),
            position_ms,
            shuffle_enabled: queue.shuffle_enabled(),
            repeat_mode: queue.repeat_mode(),
            queue_length: queue.len(),
        });
    }

    fn update(&self, apply: impl FnOnce(&mut PlayerState)) {
        self.state_tx.send_modify(apply);
    }

    fn persist_queue(&self, snapshot: crate::queue::QueueSnapshot) {
        let store = self.tracker.store().clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_queue(&snapshot).await {
                warn!(error = %e, "Failed to save queue");
            }
        });
    }

    fn persist_position(
        &self,
        reason: PositionReason,
        song_id: &str,
        entry_id: Option<u64>,
        position_ms: u64,
    ) {
        let tracker = Arc::clone(&self.tracker);
        let song_id = song_id.to_string();
        tokio::spawn(async move {
            tracker
                .record(reason, &song_id, entry_id, position_ms)
                .await;
        });
    }

    fn emit(&self, event: PlaybackEvent) {
        self.events.emit(CoreEvent::Playback(event)).ok();
    }

    fn emit_error(&self, song_id: Option<&str>, error: &PlaybackError) {
        self.emit(PlaybackEvent::Error {
            song_id: song_id.map(str::to_string),
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::position::{SavedPosition, SessionStore};
    use crate::test_support::{MemoryBlobs, MemorySettings};
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkStatus};
    use bridge_traits::storage::BlobStore;
    use bridge_traits::time::{Clock, SystemClock};
    use bytes::Bytes;
    use core_library::db::create_test_pool;
    use core_library::repositories::SqliteCacheStatusRepository;
    use mockall::predicate::eq;

    struct Offline;

    struct NoChanges;

    #[async_trait]
    impl NetworkChangeStream for NoChanges {
        async fn next(&mut self) -> Option<NetworkInfo> {
            None
        }
    }

    #[async_trait]
    impl NetworkMonitor for Offline {
        async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
            Ok(NetworkInfo {
                status: NetworkStatus::Disconnected,
                network_type: None,
                is_metered: false,
                is_expensive: false,
            })
        }

        async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
            Ok(Box::new(NoChanges))
        }
    }

    struct Fixture {
        player: Player,
        blobs: Arc<MemoryBlobs>,
        settings: Arc<MemorySettings>,
        events: EventBus,
    }

    async fn fixture(adapter: MockPlaybackAdapter, offline: bool) -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let blobs = Arc::new(MemoryBlobs::default());
        let settings = Arc::new(MemorySettings::default());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let validator = Arc::new(CacheValidator::new(
            blobs.clone(),
            Arc::new(SqliteCacheStatusRepository::new(pool)),
            clock.clone(),
            &CacheConfig::default(),
        ));
        let tracker = Arc::new(PositionTracker::new(
            SessionStore::new(settings.clone()),
            clock,
            Duration::from_secs(5),
        ));
        let events = EventBus::new(256);
        let network: Option<Arc<dyn NetworkMonitor>> = if offline {
            Some(Arc::new(Offline))
        } else {
            None
        };
        let player = Player::new(
            PlayerDeps {
                adapter: Arc::new(adapter),
                validator,
                network,
                tracker,
                events: events.clone(),
                media_base_url: Some("http://127.0.0.1:9000/".into()),
            },
            PlaybackQueue::new(),
        );
        Fixture {
            player,
            blobs,
            settings,
            events,
        }
    }

    fn songs(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("s{i}"), format!("https://origin.test/media/s{i}/stream")))
            .collect()
    }

    #[tokio::test]
    async fn test_set_queue_loads_through_media_endpoint() {
        let mut adapter = MockPlaybackAdapter::new();
        adapter
            .expect_load()
            .withf(|url, start| url == "http://127.0.0.1:9000/media/s0/stream" && start.is_zero())
            .times(1)
            .returning(|_, _| Ok(()));
        adapter.expect_play().times(1).returning(|| Ok(()));

        let f = fixture(adapter, false).await;
        f.player.set_queue(songs(3), 0).await.unwrap();

        let state = f.player.state();
        assert_eq!(state.status, PlayerStatus::Playing);
        assert_eq!(state.song_id.as_deref(), Some("s0"));
        assert_eq!(state.queue_length, 3);
    }

    #[tokio::test]
    async fn test_uncached_song_offline_is_recoverable_error() {
        let mut adapter = MockPlaybackAdapter::new();
        adapter.expect_load().never();

        let f = fixture(adapter, true).await;
        let mut events = f.events.subscribe();
        let error = f.player.set_queue(songs(1), 0).await.unwrap_err();
        assert!(matches!(error, PlaybackError::UnavailableOffline(ref id) if id == "s0"));
        assert!(error.is_recoverable());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Playback(PlaybackEvent::Error { recoverable, .. }) = event {
                saw_error = recoverable;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_cached_song_plays_offline() {
        let mut adapter = MockPlaybackAdapter::new();
        adapter.expect_load().times(1).returning(|_, _| Ok(()));
        adapter.expect_play().times(1).returning(|| Ok(()));

        let f = fixture(adapter, true).await;
        f.blobs
            .put("/media/s0/stream", Bytes::from_static(b"mp3"))
            .await
            .unwrap();
        f.player.set_queue(songs(1), 0).await.unwrap();
        assert_eq!(f.player.state().status, PlayerStatus::Playing);
    }

    #[tokio::test]
    async fn test_next_stops_at_end_with_repeat_off() {
        let mut adapter = MockPlaybackAdapter::new();
        adapter.expect_load().times(2).returning(|_, _| Ok(()));
        adapter.expect_play().times(2).returning(|| Ok(()));
        adapter.expect_stop().times(1).returning(|| Ok(()));

        let f = fixture(adapter, false).await;
        f.player.set_queue(songs(2), 0).await.unwrap();
        f.player.next().await.unwrap();
        assert_eq!(f.player.state().song_id.as_deref(), Some("s1"));

        f.player.next().await.unwrap();
        assert_eq!(f.player.state().status, PlayerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_pause_and_seek_update_state() {
        let mut adapter = MockPlaybackAdapter::new();
        adapter.expect_load().returning(|_, _| Ok(()));
        adapter.expect_play().returning(|| Ok(()));
        adapter.expect_pause().times(1).returning(|| Ok(()));
        adapter
            .expect_position()
            .returning(|| Ok(Duration::from_millis(12_345)));
        adapter
            .expect_seek()
            .with(eq(Duration::from_millis(30_000)))
            .times(1)
            .returning(|_| Ok(()));

        let f = fixture(adapter, false).await;
        f.player.set_queue(songs(1), 0).await.unwrap();

        f.player.pause().await.unwrap();
        let state = f.player.state();
        assert_eq!(state.status, PlayerStatus::Paused);
        assert_eq!(state.position_ms, 12_345);

        f.player.seek(30_000).await.unwrap();
        assert_eq!(f.player.state().position_ms, 30_000);
    }

    #[tokio::test]
    async fn test_restored_position_applies_once() {
        let mut adapter = MockPlaybackAdapter::new();
        let mut seq = mockall::Sequence::new();
        adapter
            .expect_load()
            .withf(|_, start| *start == Duration::from_millis(42_000))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        adapter
            .expect_load()
            .withf(|_, start| start.is_zero())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        adapter.expect_play().returning(|| Ok(()));

        let f = fixture(adapter, false).await;

        let mut queue = PlaybackQueue::new();
        queue.replace(songs(2), 1);
        let store = SessionStore::new(f.settings.clone());
        store.save_queue(&queue.snapshot()).await.unwrap();
        store
            .save_position(&SavedPosition {
                song_id: "s1".into(),
                entry_id: Some(2),
                position_ms: 42_000,
                saved_at: 0,
            })
            .await
            .unwrap();

        assert!(f.player.restore_session().await.unwrap());
        let state = f.player.state();
        assert_eq!(state.song_id.as_deref(), Some("s1"));
        assert_eq!(state.position_ms, 42_000);
        assert_eq!(state.status, PlayerStatus::Idle);

        f.player.play().await.unwrap();
        assert_eq!(f.player.state().position_ms, 42_000);

        f.player.jump_to(2).await.unwrap();
        assert_eq!(f.player.state().position_ms, 0);
    }
}

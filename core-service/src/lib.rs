//! Core service façade and bootstrap.
//!
//! [`CoreService::init`] wires host-provided bridges from a
//! [`CoreConfig`] into the offline core: the replica database, the cache
//! validator, the media proxy and its cache sync bridge, the download manager
//! and the player. Everything is constructed once per service instance and
//! shared through `Arc`; there is no global state. Desktop apps typically
//! enable the `desktop-shims` feature so missing bridges fall back to the
//! `bridge-desktop` adapters.
//!
//! ```no_run
//! # async fn example(adapter: std::sync::Arc<dyn core_playback::PlaybackAdapter>) -> core_service::Result<()> {
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/tmp/library.db")
//!     .cache_dir("/tmp/cache")
//!     .origin_base_url("https://music.example.com")
//!     .build()?;
//! let core = CoreService::init(config, adapter).await?;
//!
//! let stats = core.cache_stats().await?;
//! println!("{}% available offline", stats.percentage);
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::http::HttpResponse;
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::Clock;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{
    AlbumRepository, CacheStatusRepository, PlaylistRepository, SongRepository,
    SqliteAlbumRepository, SqliteCacheStatusRepository, SqlitePlaylistRepository,
    SqliteSongRepository,
};
use core_library::LibraryError;
use core_playback::cache::{
    CacheConfig, CacheStats, CacheValidator, DownloadManager, DownloadManagerDeps,
    DownloadRequest, QueueStatus,
};
use core_playback::player::{PlaybackAdapter, Player, PlayerDeps};
use core_playback::position::{PositionTracker, SessionStore};
use core_playback::proxy::{
    cache_channel, CredentialProvider, MediaRequest, ProxyController, ProxyDeps, ProxyMode,
    SecureStoreCredentials,
};
use core_playback::queue::PlaybackQueue;
use core_runtime::config::{CachePolicy, CoreConfig};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, LibraryEvent};
use core_sync::{
    ApplyReport, BridgeStats, CacheSyncBridge, DeletionCascade, LocalChanges, RemoteChanges,
    ReplicaSync,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Tunables that are not part of [`CoreConfig`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub cache: CacheConfig,
    /// Prefix the player puts in front of media paths, e.g. the address of
    /// the loopback media endpoint. `None` hands plain paths to the adapter.
    pub media_base_url: Option<String>,
    pub event_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            media_base_url: None,
            event_capacity: 1024,
        }
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    songs: Arc<dyn SongRepository>,
    albums: Arc<dyn AlbumRepository>,
    playlists: Arc<dyn PlaylistRepository>,
    statuses: Arc<dyn CacheStatusRepository>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    validator: Arc<CacheValidator>,
    credentials: Arc<dyn CredentialProvider>,
    proxy: Arc<ProxyController>,
    proxy_deps: ProxyDeps,
    proxy_mode: RwLock<ProxyMode>,
    downloads: DownloadManager,
    player: Arc<Player>,
    deletion: DeletionCascade,
    replica: ReplicaSync,
    policy: RwLock<CachePolicy>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    bridge: Mutex<Option<JoinHandle<BridgeStats>>>,
}

impl CoreService {
    /// Build the service with default tunables.
    pub async fn init(config: CoreConfig, adapter: Arc<dyn PlaybackAdapter>) -> Result<Self> {
        Self::init_with(config, adapter, ServiceOptions::default()).await
    }

    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn init_with(
        config: CoreConfig,
        adapter: Arc<dyn PlaybackAdapter>,
        options: ServiceOptions,
    ) -> Result<Self> {
        options
            .cache
            .validate()
            .map_err(CoreError::InitializationFailed)?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let songs: Arc<dyn SongRepository> = Arc::new(SqliteSongRepository::new(pool.clone()));
        let albums: Arc<dyn AlbumRepository> = Arc::new(SqliteAlbumRepository::new(pool.clone()));
        let playlists: Arc<dyn PlaylistRepository> =
            Arc::new(SqlitePlaylistRepository::new(pool.clone()));
        let statuses: Arc<dyn CacheStatusRepository> =
            Arc::new(SqliteCacheStatusRepository::new(pool));

        let events = EventBus::new(options.event_capacity);
        let clock = config.clock.clone();
        let settings = config.settings_store.clone();
        let policy = match CachePolicy::load(settings.as_ref()).await {
            Ok(Some(saved)) => saved,
            Ok(None) => config.cache_policy,
            Err(e) => {
                warn!(error = %e, "Stored cache policy unreadable, using configured policy");
                config.cache_policy
            }
        };

        let validator = Arc::new(CacheValidator::new(
            config.blob_store.clone(),
            statuses.clone(),
            clock.clone(),
            &options.cache,
        ));

        // Proxy and its single message consumer
        let credentials: Arc<dyn CredentialProvider> = Arc::new(SecureStoreCredentials::new(
            config.secure_store.clone(),
            config.credential_key.clone(),
        ));
        let (messages, receiver) = cache_channel(options.cache.message_channel_capacity);
        let proxy_deps = ProxyDeps {
            blob_store: config.blob_store.clone(),
            http_client: config.http_client.clone(),
            credentials: credentials.clone(),
            origin_base_url: config.origin_base_url.clone(),
            messages,
        };
        let proxy_mode = detect_mode(credentials.as_ref()).await;
        let proxy = Arc::new(ProxyController::new(events.clone()));
        proxy.install(proxy_deps.clone(), proxy_mode).await;
        let bridge = CacheSyncBridge::new(
            statuses.clone(),
            validator.clone(),
            clock.clone(),
            events.clone(),
        )
        .spawn(receiver);

        let downloads = DownloadManager::new(
            DownloadManagerDeps {
                fetcher: proxy.clone(),
                validator: validator.clone(),
                statuses: statuses.clone(),
                network: config.network_monitor.clone(),
                clock: clock.clone(),
                events: events.clone(),
            },
            policy.download_timing,
            options.cache.download_concurrency,
        );
        let mut tasks = Vec::new();
        if let Some(task) = downloads.watch_network() {
            tasks.push(task);
        }

        let tracker = Arc::new(PositionTracker::new(
            SessionStore::new(settings.clone()),
            clock.clone(),
            options.cache.position_persist_interval,
        ));
        let player = Arc::new(Player::new(
            PlayerDeps {
                adapter,
                validator: validator.clone(),
                network: config.network_monitor.clone(),
                tracker,
                events: events.clone(),
                media_base_url: options.media_base_url.clone(),
            },
            PlaybackQueue::new(),
        ));
        if let Err(e) = player.restore_session().await {
            warn!(error = %e, "Could not restore playback session");
        }

        let deletion = DeletionCascade::new(
            songs.clone(),
            statuses.clone(),
            validator.clone(),
            clock.clone(),
            events.clone(),
        );
        let replica = ReplicaSync::new(
            songs.clone(),
            albums.clone(),
            playlists.clone(),
            validator.clone(),
            events.clone(),
        );

        info!(?proxy_mode, ?policy, "Core service initialized");
        Ok(Self {
            inner: Arc::new(ServiceInner {
                songs,
                albums,
                playlists,
                statuses,
                settings,
                clock,
                events,
                validator,
                credentials,
                proxy,
                proxy_deps,
                proxy_mode: RwLock::new(proxy_mode),
                downloads,
                player,
                deletion,
                replica,
                policy: RwLock::new(policy),
                tasks: Mutex::new(tasks),
                bridge: Mutex::new(Some(bridge)),
            }),
        })
    }

    // ========================================================================
    // Cache status
    // ========================================================================

    /// Whether a song can play offline. Never fails; errors read as `false`.
    pub async fn is_song_cached(&self, song_id: &str, stream_url: &str) -> bool {
        self.inner.validator.is_cached(song_id, stream_url).await
    }

    pub async fn prevalidate_songs(&self, songs: Vec<(String, String)>) -> HashMap<String, bool> {
        self.inner.validator.prevalidate_many(songs).await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.inner.statuses.coverage().await?.into())
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.downloads.queue_status()
    }

    /// Current download queue status, then every change.
    pub fn subscribe_queue_status(&self) -> watch::Receiver<QueueStatus> {
        self.inner.downloads.subscribe()
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Delete every cached blob and reset all cache status.
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<usize> {
        let removed = self.inner.proxy.clear_all_cache().await?;
        let reset = self
            .inner
            .statuses
            .reset_all(self.inner.clock.unix_timestamp_millis())
            .await?;
        self.inner.validator.invalidate_all();
        self.emit(CoreEvent::Cache(CacheEvent::Cleared { removed }));
        info!(removed, reset, "Cache cleared");
        Ok(removed)
    }

    /// Remove one song's blobs. Returns whether anything was stored.
    pub async fn evict_song(&self, song_id: &str) -> Result<bool> {
        let removed = self.inner.proxy.evict_song(song_id).await?;
        self.inner.validator.invalidate_song(song_id);
        Ok(removed)
    }

    /// Queue one visible song for download.
    pub async fn download_song(&self, song_id: &str) -> Result<bool> {
        let record = self
            .inner
            .statuses
            .get(song_id)
            .await?
            .ok_or_else(|| LibraryError::not_found("Song", song_id))?;
        Ok(self
            .inner
            .downloads
            .enqueue(DownloadRequest::new(record.song_id, record.stream_url))
            .await)
    }

    /// Queue every visible, uncached song when the effective policy asks for
    /// it. Returns the number of newly queued songs.
    #[instrument(skip(self))]
    pub async fn cache_library(&self) -> Result<usize> {
        let authenticated = self.inner.credentials.auth_token().await.is_some();
        let policy = *self.inner.policy.read();
        if !policy.effective_cache_all(authenticated) {
            return Ok(0);
        }

        let uncached = self.inner.statuses.list_uncached().await?;
        let queued = self
            .inner
            .downloads
            .enqueue_many(
                uncached
                    .into_iter()
                    .map(|record| DownloadRequest::new(record.song_id, record.stream_url)),
            )
            .await;
        info!(queued, "Library queued for offline use");
        Ok(queued)
    }

    /// Start queued downloads in manual timing mode.
    pub fn trigger_downloads(&self) {
        self.inner.downloads.trigger();
    }

    pub fn cache_policy(&self) -> CachePolicy {
        *self.inner.policy.read()
    }

    /// Persist a new policy and apply it to the download queue.
    pub async fn set_cache_policy(&self, policy: CachePolicy) -> Result<usize> {
        policy.save(self.inner.settings.as_ref()).await?;
        *self.inner.policy.write() = policy;
        self.inner
            .downloads
            .set_timing(policy.download_timing)
            .await;
        self.cache_library().await
    }

    // ========================================================================
    // Media proxy
    // ========================================================================

    /// Answer a media request through the active proxy.
    pub async fn fetch_media(&self, request: MediaRequest) -> HttpResponse {
        self.inner.proxy.fetch(request).await
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        *self.inner.proxy_mode.read()
    }

    /// Re-read the credential after a sign-in or sign-out and switch the
    /// proxy between local-only and authenticated fetching.
    pub async fn refresh_credentials(&self) -> Result<ProxyMode> {
        let mode = detect_mode(self.inner.credentials.as_ref()).await;
        self.inner.proxy.set_mode(mode).await?;
        *self.inner.proxy_mode.write() = mode;
        info!(?mode, "Proxy mode refreshed");
        Ok(mode)
    }

    /// Start a replacement proxy. It serves nothing until
    /// [`CoreService::take_control_immediately`] is called.
    pub async fn stage_proxy_upgrade(&self) -> u64 {
        self.inner
            .proxy
            .stage(self.inner.proxy_deps.clone(), self.proxy_mode())
            .await
    }

    /// Route requests to the staged proxy. Never happens on its own, so an
    /// active playback session is not interrupted unless the host asks.
    pub async fn take_control_immediately(&self) -> Result<u64> {
        Ok(self.inner.proxy.take_control_immediately().await?)
    }

    /// Serve the media endpoint on `listener` until it fails.
    #[cfg(feature = "proxy-server")]
    pub async fn serve_media(&self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        core_playback::proxy::server::serve(listener, self.inner.proxy.clone()).await
    }

    // ========================================================================
    // Library
    // ========================================================================

    /// Tombstone a song, reset its cache status and invalidate the validator.
    pub async fn delete_song(&self, song_id: &str) -> Result<()> {
        Ok(self.inner.deletion.delete_song(song_id).await?)
    }

    pub async fn add_song_to_playlist(&self, playlist_id: &str, song_id: &str) -> Result<()> {
        self.inner.playlists.add_song(playlist_id, song_id).await?;
        self.playlist_updated(playlist_id);
        Ok(())
    }

    pub async fn remove_song_from_playlist(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        let removed = self
            .inner
            .playlists
            .remove_song(playlist_id, song_id)
            .await?;
        if removed {
            self.playlist_updated(playlist_id);
        }
        Ok(removed)
    }

    /// Apply a server batch; follow with [`CoreService::cache_library`] to
    /// pick up new songs under a cache-all policy.
    pub async fn apply_remote_changes(&self, changes: RemoteChanges) -> Result<ApplyReport> {
        Ok(self.inner.replica.apply_remote(changes).await?)
    }

    pub async fn pending_changes(&self) -> Result<LocalChanges> {
        Ok(self.inner.replica.pending_changes().await?)
    }

    pub async fn acknowledge_push(&self, pushed: &LocalChanges) -> Result<u64> {
        Ok(self.inner.replica.acknowledge(pushed).await?)
    }

    pub fn songs(&self) -> Arc<dyn SongRepository> {
        self.inner.songs.clone()
    }

    pub fn albums(&self) -> Arc<dyn AlbumRepository> {
        self.inner.albums.clone()
    }

    pub fn playlists(&self) -> Arc<dyn PlaylistRepository> {
        self.inner.playlists.clone()
    }

    // ========================================================================
    // Playback and events
    // ========================================================================

    pub fn player(&self) -> Arc<Player> {
        self.inner.player.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    /// Stop background work. The service must not be used afterwards.
    pub async fn shutdown(&self) {
        self.inner.proxy.shutdown().await;
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(bridge) = self.inner.bridge.lock().take() {
            bridge.abort();
        }
        info!("Core service stopped");
    }

    fn playlist_updated(&self, playlist_id: &str) {
        self.emit(CoreEvent::Library(LibraryEvent::PlaylistUpdated {
            playlist_id: playlist_id.to_string(),
        }));
    }

    fn emit(&self, event: CoreEvent) {
        self.inner.events.emit(event).ok();
    }
}

async fn detect_mode(credentials: &dyn CredentialProvider) -> ProxyMode {
    if credentials.auth_token().await.is_some() {
        ProxyMode::Authenticated
    } else {
        ProxyMode::LocalOnly
    }
}

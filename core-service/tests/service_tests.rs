use async_trait::async_trait;
use bridge_desktop::{MemoryBlobStore, MemorySecureStore, SqliteSettingsStore};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::{BlobStore, SecureStore};
use bytes::Bytes;
use core_library::models::{Playlist, Song, SyncFields};
use core_playback::error::Result as PlaybackResult;
use core_playback::proxy::{MediaRequest, ProxyMode};
use core_playback::PlaybackAdapter;
use core_runtime::config::{CachePolicy, CoreConfig, LocalOverride, DEFAULT_CREDENTIAL_KEY};
use core_service::CoreService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct SilentAdapter;

#[async_trait]
impl PlaybackAdapter for SilentAdapter {
    async fn load(&self, _url: &str, _start: Duration) -> PlaybackResult<()> {
        Ok(())
    }
    async fn play(&self) -> PlaybackResult<()> {
        Ok(())
    }
    async fn pause(&self) -> PlaybackResult<()> {
        Ok(())
    }
    async fn resume(&self) -> PlaybackResult<()> {
        Ok(())
    }
    async fn stop(&self) -> PlaybackResult<()> {
        Ok(())
    }
    async fn seek(&self, _position: Duration) -> PlaybackResult<()> {
        Ok(())
    }
    async fn position(&self) -> PlaybackResult<Duration> {
        Ok(Duration::ZERO)
    }
}

#[derive(Default)]
struct CountingOrigin {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpClient for CountingOrigin {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::new(200).with_body(Bytes::from_static(b"0123456789")))
    }
}

struct Harness {
    core: CoreService,
    origin: Arc<CountingOrigin>,
    blobs: Arc<MemoryBlobStore>,
    secrets: Arc<MemorySecureStore>,
    _dir: TempDir,
}

async fn harness(signed_in: bool, policy: CachePolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let secrets = Arc::new(MemorySecureStore::new());
    if signed_in {
        secrets
            .set_secret(DEFAULT_CREDENTIAL_KEY, b"token-123")
            .await
            .unwrap();
    }
    let origin = Arc::new(CountingOrigin::default());
    let blobs = Arc::new(MemoryBlobStore::new());

    let config = CoreConfig::builder()
        .database_path(dir.path().join("library.db"))
        .cache_dir(dir.path().join("cache"))
        .origin_base_url("https://music.test")
        .http_client(origin.clone())
        .blob_store(blobs.clone())
        .secure_store(secrets.clone())
        .settings_store(Arc::new(SqliteSettingsStore::in_memory().await.unwrap()))
        .cache_policy(policy)
        .build()
        .unwrap();

    let core = CoreService::init(config, Arc::new(SilentAdapter))
        .await
        .unwrap();
    Harness {
        core,
        origin,
        blobs,
        secrets,
        _dir: dir,
    }
}

async fn seed_song(core: &CoreService, id: &str) {
    let mut song = Song::new(format!("Song {id}")).with_id(id);
    song.sync = SyncFields::remote(1);
    core.songs().insert(&song).await.unwrap();
}

async fn wait_for_cached(core: &CoreService, expected: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if core.cache_stats().await.unwrap().cached == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cache status reconciled in time");
}

#[tokio::test]
async fn test_authenticated_playback_populates_cache() {
    let h = harness(true, CachePolicy::default()).await;
    assert_eq!(h.core.proxy_mode(), ProxyMode::Authenticated);
    seed_song(&h.core, "s1").await;

    let response = h.core.fetch_media(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 200);

    wait_for_cached(&h.core, 1).await;
    assert!(h.core.is_song_cached("s1", "/media/s1/stream").await);

    let partial = h
        .core
        .fetch_media(MediaRequest::stream("s1").with_range("bytes=2-5"))
        .await;
    assert_eq!(partial.status, 206);
    assert_eq!(&partial.body[..], b"2345");
    assert_eq!(h.origin.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_guest_miss_is_offline_404() {
    let h = harness(false, CachePolicy::default()).await;
    assert_eq!(h.core.proxy_mode(), ProxyMode::LocalOnly);
    seed_song(&h.core, "s1").await;

    let response = h.core.fetch_media(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 404);
    assert_eq!(h.origin.calls.load(Ordering::SeqCst), 0);
    assert!(!h.core.is_song_cached("s1", "/media/s1/stream").await);
}

#[tokio::test]
async fn test_cache_all_downloads_library_then_clear() {
    let policy = CachePolicy::default().with_local_override(LocalOverride::Always);
    let h = harness(true, policy).await;
    for id in ["a", "b", "c"] {
        seed_song(&h.core, id).await;
    }

    assert_eq!(h.core.cache_library().await.unwrap(), 3);
    wait_for_cached(&h.core, 3).await;

    let stats = h.core.cache_stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert!(stats.is_complete());

    assert_eq!(h.core.clear_cache().await.unwrap(), 3);
    assert_eq!(h.core.cache_stats().await.unwrap().cached, 0);
    assert!(h.blobs.keys().await.unwrap().is_empty());
    assert!(!h.core.is_song_cached("a", "/media/a/stream").await);
}

#[tokio::test]
async fn test_cache_all_requires_sign_in_when_inherited() {
    let policy = CachePolicy::default().with_cache_all(true);
    let h = harness(false, policy).await;
    seed_song(&h.core, "s1").await;

    assert_eq!(h.core.cache_library().await.unwrap(), 0);
    assert!(h.core.queue_status().is_idle());
}

#[tokio::test]
async fn test_delete_song_cascades() {
    let h = harness(false, CachePolicy::default()).await;
    seed_song(&h.core, "s1").await;
    seed_song(&h.core, "s2").await;
    h.blobs
        .put("/media/s1/stream", Bytes::from_static(b"x"))
        .await
        .unwrap();
    assert!(h.core.is_song_cached("s1", "/media/s1/stream").await);

    h.core.delete_song("s1").await.unwrap();

    assert_eq!(h.core.cache_stats().await.unwrap().total, 1);
    assert!(h.core.songs().find_by_id("s1").await.unwrap().is_none());
    assert!(h.core.delete_song("s1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_add_then_remove_from_playlist_restores_count() {
    let h = harness(false, CachePolicy::default()).await;
    seed_song(&h.core, "s1").await;
    seed_song(&h.core, "s2").await;
    let playlist = Playlist::new("Evening");
    let playlists = h.core.playlists();
    playlists.insert(&playlist).await.unwrap();
    h.core
        .add_song_to_playlist(&playlist.id, "s1")
        .await
        .unwrap();
    let before = playlists.song_count(&playlist.id).await.unwrap();

    h.core
        .add_song_to_playlist(&playlist.id, "s2")
        .await
        .unwrap();
    assert!(h
        .core
        .remove_song_from_playlist(&playlist.id, "s2")
        .await
        .unwrap());

    assert!(!playlists.contains_song(&playlist.id, "s2").await.unwrap());
    assert_eq!(playlists.song_count(&playlist.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_proxy_upgrade_waits_for_takeover() {
    let h = harness(false, CachePolicy::default()).await;
    assert!(h.core.take_control_immediately().await.is_err());

    let staged = h.core.stage_proxy_upgrade().await;
    assert_eq!(h.core.take_control_immediately().await.unwrap(), staged);
}

#[tokio::test]
async fn test_sign_in_switches_proxy_mode() {
    let h = harness(false, CachePolicy::default()).await;
    seed_song(&h.core, "s1").await;
    assert_eq!(
        h.core.fetch_media(MediaRequest::stream("s1")).await.status,
        404
    );

    h.secrets
        .set_secret(DEFAULT_CREDENTIAL_KEY, b"token-123")
        .await
        .unwrap();
    assert_eq!(
        h.core.refresh_credentials().await.unwrap(),
        ProxyMode::Authenticated
    );
    assert_eq!(
        h.core.fetch_media(MediaRequest::stream("s1")).await.status,
        200
    );
    assert_eq!(h.origin.calls.load(Ordering::SeqCst), 1);
}

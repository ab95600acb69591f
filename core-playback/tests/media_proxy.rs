use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::BlobStore;
use bytes::Bytes;
use core_playback::proxy::{
    cache_channel, CacheMessage, CacheMessageReceiver, CredentialProvider, MediaRequest,
    ProxyController, ProxyDeps, ProxyMode,
};
use core_playback::PlaybackError;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Blobs {
    blobs: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl BlobStore for Blobs {
    async fn exists(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.blobs.lock().contains_key(key))
    }

    async fn get(&self, key: &str) -> BridgeResult<Option<Bytes>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, body: Bytes) -> BridgeResult<()> {
        self.blobs.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.blobs.lock().keys().cloned().collect())
    }
}

/// Origin that answers every request with a fixed response and counts calls.
struct Origin {
    status: Option<u16>,
    body: Bytes,
    calls: AtomicUsize,
    last_request: Mutex<Option<HttpRequest>>,
}

impl Origin {
    fn answering(status: u16, body: &'static [u8]) -> Self {
        Self {
            status: Some(status),
            body: Bytes::from_static(body),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    fn unreachable() -> Self {
        Self {
            status: None,
            body: Bytes::new(),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for Origin {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);
        match self.status {
            Some(status) => Ok(HttpResponse::new(status).with_body(self.body.clone())),
            None => Err(BridgeError::Network("connection refused".into())),
        }
    }
}

struct Token(Option<&'static str>);

#[async_trait]
impl CredentialProvider for Token {
    async fn auth_token(&self) -> Option<String> {
        self.0.map(str::to_string)
    }
}

struct Harness {
    controller: ProxyController,
    blobs: Arc<Blobs>,
    origin: Arc<Origin>,
    messages: CacheMessageReceiver,
    events: EventBus,
}

async fn harness(origin: Origin, token: Option<&'static str>, mode: ProxyMode) -> Harness {
    let blobs = Arc::new(Blobs::default());
    let origin = Arc::new(origin);
    let (tx, messages) = cache_channel(16);
    let events = EventBus::new(64);
    let controller = ProxyController::new(events.clone());
    controller
        .install(
            ProxyDeps {
                blob_store: blobs.clone(),
                http_client: Some(origin.clone()),
                credentials: Arc::new(Token(token)),
                origin_base_url: Some("https://origin.test/".into()),
                messages: tx,
            },
            mode,
        )
        .await;
    Harness {
        controller,
        blobs,
        origin,
        messages,
        events,
    }
}

async fn next_message(rx: &mut CacheMessageReceiver) -> CacheMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("cache message in time")
        .expect("channel open")
}

#[tokio::test]
async fn test_cached_range_request_returns_partial_content() {
    let h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    let body: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
    h.blobs
        .put("/media/s1/stream", Bytes::from(body.clone()))
        .await
        .unwrap();

    let response = h
        .controller
        .fetch(MediaRequest::stream("s1").with_range("bytes=0-99"))
        .await;

    assert_eq!(response.status, 206);
    assert_eq!(response.header_value("content-range"), Some("bytes 0-99/500"));
    assert_eq!(response.header_value("content-length"), Some("100"));
    assert_eq!(&response.body[..], &body[..100]);
    assert_eq!(h.origin.calls(), 0);
}

#[tokio::test]
async fn test_full_request_returns_whole_blob() {
    let h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    h.blobs
        .put("/media/s1/stream", Bytes::from_static(b"0123456789"))
        .await
        .unwrap();

    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header_value("accept-ranges"), Some("bytes"));
    assert_eq!(&response.body[..], b"0123456789");
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    h.blobs
        .put("/media/s1/stream", Bytes::from_static(b"0123456789"))
        .await
        .unwrap();

    let response = h
        .controller
        .fetch(MediaRequest::stream("s1").with_range("bytes=20-30"))
        .await;
    assert_eq!(response.status, 416);
    assert_eq!(response.header_value("content-range"), Some("bytes */10"));
}

#[tokio::test]
async fn test_miss_without_credential_never_touches_network() {
    let h = harness(
        Origin::answering(200, b"audio"),
        None,
        ProxyMode::Authenticated,
    )
    .await;

    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 404);
    assert_eq!(h.origin.calls(), 0);
}

#[tokio::test]
async fn test_miss_in_local_only_mode_is_404() {
    let h = harness(
        Origin::answering(200, b"audio"),
        Some("secret"),
        ProxyMode::LocalOnly,
    )
    .await;

    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 404);
    assert_eq!(h.origin.calls(), 0);
}

#[tokio::test]
async fn test_authenticated_miss_fetches_and_stores() {
    let mut h = harness(
        Origin::answering(200, b"audio-bytes"),
        Some("secret"),
        ProxyMode::Authenticated,
    )
    .await;

    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"audio-bytes");

    let request = h.origin.last_request.lock().clone().unwrap();
    assert_eq!(request.url, "https://origin.test/media/s1/stream");
    assert_eq!(
        request.header_value("authorization"),
        Some("Bearer secret")
    );

    match next_message(&mut h.messages).await {
        CacheMessage::Added { song_id, size, .. } => {
            assert_eq!(song_id, "s1");
            assert_eq!(size, 11);
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(h.blobs.exists("/media/s1/stream").await.unwrap());

    // Second request is served from the cache.
    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 200);
    assert_eq!(h.origin.calls(), 1);
}

#[tokio::test]
async fn test_origin_failure_is_503_and_reported() {
    let mut h = harness(
        Origin::unreachable(),
        Some("secret"),
        ProxyMode::Authenticated,
    )
    .await;

    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 503);
    assert!(matches!(
        next_message(&mut h.messages).await,
        CacheMessage::Error { ref song_id, .. } if song_id == "s1"
    ));
    assert!(!h.blobs.exists("/media/s1/stream").await.unwrap());
}

#[tokio::test]
async fn test_origin_error_status_is_relayed_without_storing() {
    let mut h = harness(
        Origin::answering(500, b"boom"),
        Some("secret"),
        ProxyMode::Authenticated,
    )
    .await;

    let response = h.controller.fetch(MediaRequest::stream("s1")).await;
    assert_eq!(response.status, 500);
    assert!(matches!(
        next_message(&mut h.messages).await,
        CacheMessage::Error { .. }
    ));
    assert!(h.blobs.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    let response = h.controller.fetch(MediaRequest::new("/elsewhere")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_clear_all_announces_each_stream() {
    let mut h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    for key in ["/media/a/stream", "/media/b/stream", "/media/a/cover"] {
        h.blobs.put(key, Bytes::from_static(b"x")).await.unwrap();
    }

    assert_eq!(h.controller.clear_all_cache().await.unwrap(), 3);

    let mut deleted = vec![
        next_message(&mut h.messages).await.song_id().to_string(),
        next_message(&mut h.messages).await.song_id().to_string(),
    ];
    deleted.sort();
    assert_eq!(deleted, ["a", "b"]);
    assert!(h.messages.try_recv().is_err());
    assert!(h.blobs.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_evict_song_removes_blobs() {
    let mut h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    h.blobs
        .put("/media/s1/stream", Bytes::from_static(b"x"))
        .await
        .unwrap();

    assert!(h.controller.evict_song("s1").await.unwrap());
    assert!(matches!(
        next_message(&mut h.messages).await,
        CacheMessage::Deleted { ref song_id, .. } if song_id == "s1"
    ));

    assert!(!h.controller.evict_song("s1").await.unwrap());
}

#[tokio::test]
async fn test_staged_proxy_waits_for_explicit_takeover() {
    let h = harness(Origin::unreachable(), None, ProxyMode::LocalOnly).await;
    let mut events = h.events.subscribe();
    let first = h.controller.active_generation().unwrap();

    let (tx, _rx) = cache_channel(4);
    let staged = h
        .controller
        .install(
            ProxyDeps {
                blob_store: h.blobs.clone(),
                http_client: None,
                credentials: Arc::new(Token(None)),
                origin_base_url: None,
                messages: tx,
            },
            ProxyMode::LocalOnly,
        )
        .await;

    assert_ne!(first, staged);
    assert!(h.controller.has_staged());
    assert_eq!(h.controller.active_generation(), Some(first));

    assert_eq!(h.controller.take_control_immediately().await.unwrap(), staged);
    assert_eq!(h.controller.active_generation(), Some(staged));
    assert!(!h.controller.has_staged());

    match events.recv().await.unwrap() {
        CoreEvent::Cache(CacheEvent::ProxyActivated { generation }) => {
            assert_eq!(generation, staged)
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(matches!(
        h.controller.take_control_immediately().await,
        Err(PlaybackError::NothingStaged)
    ));
}

//! # Media Proxy Task
//!
//! The proxy runs as its own task and shares nothing with callers; every
//! interaction goes through [`MediaProxyHandle`] as a message. Requests are
//! answered concurrently, control commands are applied in arrival order.
//!
//! Per request:
//! 1. Normalize the URL to a blob key.
//! 2. Hit: answer from the blob, honoring `Range`.
//! 3. Miss in local-only mode or without a credential: 404, no network.
//! 4. Otherwise fetch from origin with a bearer token. A 200 body is stored in
//!    the background and announced with [`CacheMessage::Added`]; the origin
//!    response is relayed unchanged.
//!
//! Internal failures become 404/503 responses. The task itself never exits
//! on a request error.

use crate::cache::download::MediaFetcher;
use crate::cache::key::{MediaKind, MediaPath};
use crate::error::{PlaybackError, Result};
use crate::proxy::credentials::CredentialProvider;
use crate::proxy::messages::{
    CacheMessage, CacheMessageSender, MediaRequest, ProxyCommand, ProxyMessage, ProxyMode,
};
use crate::proxy::range;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::BlobStore;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

const PROXY_MAILBOX_CAPACITY: usize = 64;

/// Collaborators of a proxy instance.
#[derive(Clone)]
pub struct ProxyDeps {
    pub blob_store: Arc<dyn BlobStore>,
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub origin_base_url: Option<String>,
    pub messages: CacheMessageSender,
}

/// Spawns proxy tasks.
pub struct MediaProxy;

impl MediaProxy {
    /// Start a proxy task and return its handle.
    pub fn spawn(deps: ProxyDeps, mode: ProxyMode, generation: u64) -> MediaProxyHandle {
        let (tx, rx) = mpsc::channel(PROXY_MAILBOX_CAPACITY);
        let worker = Arc::new(ProxyWorker { deps });
        tokio::spawn(worker.run(rx, mode, generation));
        info!(generation, ?mode, "Media proxy started");
        MediaProxyHandle { tx, generation }
    }
}

struct ProxyWorker {
    deps: ProxyDeps,
}

impl ProxyWorker {
    async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ProxyMessage>,
        mut mode: ProxyMode,
        generation: u64,
    ) {
        while let Some(message) = rx.recv().await {
            match message {
                ProxyMessage::Request { request, reply } => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        let response = worker.handle(request, mode).await;
                        reply.send(response).ok();
                    });
                }
                ProxyMessage::Command(ProxyCommand::ClearAllCache { reply }) => {
                    reply.send(self.clear_all().await).ok();
                }
                ProxyMessage::Command(ProxyCommand::EvictSong { song_id, reply }) => {
                    reply.send(self.evict(&song_id).await).ok();
                }
                ProxyMessage::Command(ProxyCommand::SetMode(next)) => {
                    info!(generation, from = ?mode, to = ?next, "Media proxy mode changed");
                    mode = next;
                }
                ProxyMessage::Command(ProxyCommand::Shutdown) => break,
            }
        }
        info!(generation, "Media proxy stopped");
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn handle(&self, request: MediaRequest, mode: ProxyMode) -> HttpResponse {
        let Some(path) = MediaPath::parse(&request.url) else {
            return text_response(404, "Not found");
        };
        let key = path.key();

        match self.deps.blob_store.get(&key).await {
            Ok(Some(body)) => {
                debug!(key = %key, "Cache hit");
                return range::respond(body, request.range.as_deref(), path.kind.content_type());
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Blob read failed, treating as miss"),
        }

        if mode == ProxyMode::LocalOnly {
            debug!(key = %key, "Miss in local-only mode");
            return not_available_offline();
        }
        let Some(token) = self.deps.credentials.auth_token().await else {
            debug!(key = %key, "Miss without credential");
            return not_available_offline();
        };
        let (Some(client), Some(origin)) = (&self.deps.http_client, &self.deps.origin_base_url)
        else {
            warn!(key = %key, "No origin configured for authenticated fetch");
            return text_response(503, "Origin unavailable");
        };

        let url = format!("{}{}", origin.trim_end_matches('/'), key);
        let mut origin_request = HttpRequest::new(HttpMethod::Get, url).bearer_token(token);
        if let Some(range) = &request.range {
            origin_request = origin_request.header("Range", range.as_str());
        }

        match client.execute(origin_request).await {
            Ok(response) => {
                if response.status == 200 {
                    self.store_in_background(path, key, response.body.clone());
                } else if !response.is_success() {
                    warn!(key = %key, status = response.status, "Origin rejected media fetch");
                    self.report_error(&path, &key, format!("origin status {}", response.status))
                        .await;
                }
                response
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Origin fetch failed");
                self.report_error(&path, &key, e.to_string()).await;
                text_response(503, "Origin fetch failed")
            }
        }
    }

    fn store_in_background(&self, path: MediaPath, key: String, body: Bytes) {
        let blob_store = Arc::clone(&self.deps.blob_store);
        let messages = self.deps.messages.clone();
        tokio::spawn(async move {
            let size = body.len() as u64;
            let message = match blob_store.put(&key, body).await {
                Ok(()) => {
                    debug!(key = %key, size, "Stored origin response");
                    CacheMessage::Added {
                        song_id: path.song_id.clone(),
                        stream_url: key,
                        size,
                    }
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to store origin response");
                    CacheMessage::Error {
                        song_id: path.song_id.clone(),
                        stream_url: key,
                        reason: e.to_string(),
                    }
                }
            };
            if path.kind == MediaKind::Stream && messages.send(message).await.is_err() {
                debug!("Cache message receiver dropped");
            }
        });
    }

    async fn report_error(&self, path: &MediaPath, key: &str, reason: String) {
        if path.kind != MediaKind::Stream {
            return;
        }
        let message = CacheMessage::Error {
            song_id: path.song_id.clone(),
            stream_url: key.to_string(),
            reason,
        };
        if self.deps.messages.send(message).await.is_err() {
            debug!("Cache message receiver dropped");
        }
    }

    async fn clear_all(&self) -> usize {
        let removed = match self.deps.blob_store.clear().await {
            Ok(removed) => removed,
            Err(e) => {
                error!(error = %e, "Failed to clear blob cache");
                return 0;
            }
        };

        for key in &removed {
            if let Some(path) = MediaPath::parse(key).filter(|p| p.kind == MediaKind::Stream) {
                let message = CacheMessage::Deleted {
                    song_id: path.song_id,
                    stream_url: key.clone(),
                };
                if self.deps.messages.send(message).await.is_err() {
                    debug!("Cache message receiver dropped");
                    break;
                }
            }
        }
        info!(removed = removed.len(), "Blob cache cleared");
        removed.len()
    }

    async fn evict(&self, song_id: &str) -> bool {
        let mut removed = false;
        for kind in [MediaKind::Stream, MediaKind::Cover] {
            let key = MediaPath::new(song_id, kind).key();
            match self.deps.blob_store.exists(&key).await {
                Ok(true) => match self.deps.blob_store.delete(&key).await {
                    Ok(()) => removed = true,
                    Err(e) => warn!(key = %key, error = %e, "Failed to evict blob"),
                },
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to check blob before eviction"),
            }
        }

        let message = CacheMessage::Deleted {
            song_id: song_id.to_string(),
            stream_url: MediaPath::new(song_id, MediaKind::Stream).key(),
        };
        if self.deps.messages.send(message).await.is_err() {
            debug!("Cache message receiver dropped");
        }
        debug!(song_id, removed, "Song evicted from blob cache");
        removed
    }
}

fn text_response(status: u16, message: &'static str) -> HttpResponse {
    HttpResponse::new(status)
        .with_header(range::CONTENT_TYPE, "text/plain")
        .with_body(Bytes::from_static(message.as_bytes()))
}

fn not_available_offline() -> HttpResponse {
    text_response(404, "Not available offline")
}

/// Cloneable handle to a running proxy task.
#[derive(Clone, Debug)]
pub struct MediaProxyHandle {
    tx: mpsc::Sender<ProxyMessage>,
    generation: u64,
}

impl MediaProxyHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Answer a media request. A stopped proxy answers 503.
    pub async fn fetch(&self, request: MediaRequest) -> HttpResponse {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(ProxyMessage::Request { request, reply })
            .await
            .is_err()
        {
            return text_response(503, "Media proxy unavailable");
        }
        rx.await
            .unwrap_or_else(|_| text_response(503, "Media proxy unavailable"))
    }

    /// Delete every blob, returning how many were removed.
    pub async fn clear_all_cache(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.command(ProxyCommand::ClearAllCache { reply }).await?;
        rx.await.map_err(|_| PlaybackError::ProxyUnavailable)
    }

    /// Delete one song's blobs. Returns `true` if anything was stored.
    pub async fn evict_song(&self, song_id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(ProxyCommand::EvictSong {
            song_id: song_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| PlaybackError::ProxyUnavailable)
    }

    pub async fn set_mode(&self, mode: ProxyMode) -> Result<()> {
        self.command(ProxyCommand::SetMode(mode)).await
    }

    pub async fn shutdown(&self) {
        self.command(ProxyCommand::Shutdown).await.ok();
    }

    async fn command(&self, command: ProxyCommand) -> Result<()> {
        self.tx
            .send(ProxyMessage::Command(command))
            .await
            .map_err(|_| PlaybackError::ProxyUnavailable)
    }
}

#[async_trait]
impl MediaFetcher for MediaProxyHandle {
    async fn prefetch(&self, _song_id: &str, stream_url: &str) -> Result<u64> {
        let response = self.fetch(MediaRequest::new(stream_url)).await;
        if response.status == 200 {
            Ok(response.body.len() as u64)
        } else {
            Err(PlaybackError::FetchFailed {
                status: response.status,
            })
        }
    }
}

//! Messages and commands exchanged with the media proxy task

use crate::cache::key::MediaKind;
use bridge_traits::http::{HttpMethod, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Blob cache change observed by the proxy.
///
/// Delivery is at-least-once; consumers must treat each message as an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheMessage {
    Added {
        song_id: String,
        stream_url: String,
        size: u64,
    },
    Deleted {
        song_id: String,
        stream_url: String,
    },
    Error {
        song_id: String,
        stream_url: String,
        reason: String,
    },
}

impl CacheMessage {
    pub fn song_id(&self) -> &str {
        match self {
            CacheMessage::Added { song_id, .. }
            | CacheMessage::Deleted { song_id, .. }
            | CacheMessage::Error { song_id, .. } => song_id,
        }
    }
}

pub type CacheMessageSender = mpsc::Sender<CacheMessage>;

/// Single consumer end of the proxy's change channel.
pub type CacheMessageReceiver = mpsc::Receiver<CacheMessage>;

pub fn cache_channel(capacity: usize) -> (CacheMessageSender, CacheMessageReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Whether a cache miss may go to origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    /// Misses are answered 404 without touching the network.
    #[default]
    LocalOnly,
    /// Misses are fetched from origin with the stored credential.
    Authenticated,
}

/// A `GET /media/{id}/{kind}` request as seen by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub url: String,
    pub range: Option<String>,
}

impl MediaRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn stream(song_id: &str) -> Self {
        Self::new(format!("/media/{song_id}/{}", MediaKind::Stream))
    }

    pub fn cover(song_id: &str) -> Self {
        Self::new(format!("/media/{song_id}/{}", MediaKind::Cover))
    }
}

impl From<&HttpRequest> for MediaRequest {
    fn from(request: &HttpRequest) -> Self {
        Self {
            url: request.url.clone(),
            range: request.header_value("Range").map(str::to_string),
        }
    }
}

impl From<MediaRequest> for HttpRequest {
    fn from(request: MediaRequest) -> Self {
        let http = HttpRequest::new(HttpMethod::Get, request.url);
        match request.range {
            Some(range) => http.header("Range", range),
            None => http,
        }
    }
}

/// Control commands handled by the proxy task.
#[derive(Debug)]
pub enum ProxyCommand {
    /// Delete every cached blob.
    ClearAllCache { reply: oneshot::Sender<usize> },
    /// Delete the stream and cover blobs of one song.
    EvictSong {
        song_id: String,
        reply: oneshot::Sender<bool>,
    },
    SetMode(ProxyMode),
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum ProxyMessage {
    Request {
        request: MediaRequest,
        reply: oneshot::Sender<HttpResponse>,
    },
    Command(ProxyCommand),
}

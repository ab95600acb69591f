//! # Download Manager
//!
//! FIFO prefetch queue that pulls stream blobs into the cache through the
//! media proxy. A dispatcher task hands entries to workers under a fixed-width
//! semaphore; when the queue empties and the last worker finishes the manager
//! goes idle until the next enqueue or trigger.
//!
//! Start policy follows [`DownloadTiming`]:
//! - `Always`: dispatch as soon as something is queued
//! - `WifiOnly`: dispatch only on a connected, unmetered network
//! - `Manual`: dispatch only on [`DownloadManager::trigger`]

use crate::cache::stats::QueueStatus;
use crate::cache::validator::CacheValidator;
use crate::error::Result;
use async_trait::async_trait;
use bridge_traits::network::NetworkMonitor;
use bridge_traits::time::Clock;
use core_library::repositories::CacheStatusRepository;
use core_runtime::config::DownloadTiming;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

/// Fetches a song's stream so it lands in the blob cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch the full stream, returning the body size in bytes.
    async fn prefetch(&self, song_id: &str, stream_url: &str) -> Result<u64>;
}

/// One queued download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub song_id: String,
    pub stream_url: String,
}

impl DownloadRequest {
    pub fn new(song_id: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            song_id: song_id.into(),
            stream_url: stream_url.into(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<DownloadRequest>,
    /// Song ids queued or active; guards against duplicates.
    known: HashSet<String>,
    active: HashSet<String>,
    dispatching: bool,
}

impl QueueState {
    fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.queue.len(),
            active: self.active.len(),
            is_processing: self.dispatching || !self.active.is_empty(),
        }
    }
}

struct Inner {
    state: Mutex<QueueState>,
    timing: Mutex<DownloadTiming>,
    fetcher: Arc<dyn MediaFetcher>,
    validator: Arc<CacheValidator>,
    statuses: Arc<dyn CacheStatusRepository>,
    network: Option<Arc<dyn NetworkMonitor>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    status_tx: watch::Sender<QueueStatus>,
    permits: Arc<Semaphore>,
}

/// Cloneable handle to the prefetch queue.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

/// Collaborators the manager is built from.
pub struct DownloadManagerDeps {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub validator: Arc<CacheValidator>,
    pub statuses: Arc<dyn CacheStatusRepository>,
    pub network: Option<Arc<dyn NetworkMonitor>>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

impl DownloadManager {
    pub fn new(deps: DownloadManagerDeps, timing: DownloadTiming, concurrency: usize) -> Self {
        let (status_tx, _) = watch::channel(QueueStatus::default());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                timing: Mutex::new(timing),
                fetcher: deps.fetcher,
                validator: deps.validator,
                statuses: deps.statuses,
                network: deps.network,
                clock: deps.clock,
                events: deps.events,
                status_tx,
                permits: Arc::new(Semaphore::new(concurrency.max(1))),
            }),
        }
    }

    /// Queue a song. Returns `false` when it is already queued or downloading.
    #[instrument(skip(self, request), fields(song_id = %request.song_id))]
    pub async fn enqueue(&self, request: DownloadRequest) -> bool {
        let added = self.push(request);
        if added {
            self.resume_if_allowed().await;
        }
        added
    }

    /// Queue many songs, returning how many were new.
    pub async fn enqueue_many<I>(&self, requests: I) -> usize
    where
        I: IntoIterator<Item = DownloadRequest>,
    {
        let added = requests
            .into_iter()
            .map(|request| self.push(request))
            .filter(|added| *added)
            .count();
        if added > 0 {
            info!(added, "Queued downloads");
            self.resume_if_allowed().await;
        }
        added
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.state.lock().status()
    }

    /// Current status immediately, then every change.
    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn timing(&self) -> DownloadTiming {
        *self.inner.timing.lock()
    }

    pub async fn set_timing(&self, timing: DownloadTiming) {
        *self.inner.timing.lock() = timing;
        debug!(?timing, "Download timing changed");
        self.resume_if_allowed().await;
    }

    /// Start draining regardless of timing policy.
    pub fn trigger(&self) {
        Inner::start_dispatch(&self.inner);
    }

    /// Start draining if the timing policy currently allows it.
    pub async fn resume_if_allowed(&self) {
        if self.dispatch_allowed().await {
            Inner::start_dispatch(&self.inner);
        }
    }

    /// Resume a wifi-gated queue whenever connectivity changes.
    pub fn watch_network(&self) -> Option<tokio::task::JoinHandle<()>> {
        let network = self.inner.network.clone()?;
        let manager = self.clone();
        Some(tokio::spawn(async move {
            let mut changes = match network.subscribe_changes().await {
                Ok(changes) => changes,
                Err(e) => {
                    warn!(error = %e, "Network change subscription unavailable");
                    return;
                }
            };
            while changes.next().await.is_some() {
                manager.resume_if_allowed().await;
            }
        }))
    }

    fn push(&self, request: DownloadRequest) -> bool {
        let mut state = self.inner.state.lock();
        if !state.known.insert(request.song_id.clone()) {
            return false;
        }
        self.inner
            .events
            .emit(CoreEvent::Download(DownloadEvent::Queued {
                song_id: request.song_id.clone(),
            }))
            .ok();
        state.queue.push_back(request);
        self.inner.publish(&state);
        true
    }

    async fn dispatch_allowed(&self) -> bool {
        match self.timing() {
            DownloadTiming::Always => true,
            DownloadTiming::Manual => false,
            DownloadTiming::WifiOnly => match &self.inner.network {
                Some(network) => network.is_unmetered_connection().await,
                None => true,
            },
        }
    }
}

impl Inner {
    fn publish(&self, state: &QueueState) {
        let status = state.status();
        let was_processing = self.status_tx.borrow().is_processing;
        self.status_tx.send_replace(status);
        if was_processing && !status.is_processing {
            info!("Download queue drained");
            self.events
                .emit(CoreEvent::Download(DownloadEvent::Drained))
                .ok();
        }
    }

    fn start_dispatch(this: &Arc<Self>) {
        {
            let mut state = this.state.lock();
            if state.dispatching || state.queue.is_empty() {
                return;
            }
            state.dispatching = true;
            this.publish(&state);
        }
        let inner = Arc::clone(this);
        tokio::spawn(async move { inner.dispatch().await });
    }

    async fn dispatch(self: Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };

            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(request) => {
                        state.active.insert(request.song_id.clone());
                        self.publish(&state);
                        Some(request)
                    }
                    None => {
                        state.dispatching = false;
                        self.publish(&state);
                        None
                    }
                }
            };

            let Some(request) = next else {
                break;
            };
            let inner = Arc::clone(&self);
            tokio::spawn(async move { inner.run(request, permit).await });
        }
    }

    async fn run(self: Arc<Self>, request: DownloadRequest, _permit: OwnedSemaphorePermit) {
        let song_id = request.song_id.as_str();
        self.events
            .emit(CoreEvent::Download(DownloadEvent::Started {
                song_id: song_id.to_string(),
            }))
            .ok();

        if self.validator.is_cached(song_id, &request.stream_url).await {
            debug!(song_id, "Already cached, skipping download");
            let size_bytes = match self.statuses.get(song_id).await {
                Ok(Some(record)) => record.size_bytes.unwrap_or(0).max(0) as u64,
                _ => 0,
            };
            self.emit_completed(song_id, size_bytes);
        } else {
            if let Err(e) = self
                .statuses
                .mark_pending(song_id, self.clock.unix_timestamp_millis())
                .await
            {
                warn!(song_id, error = %e, "Failed to mark download pending");
            }

            match self.fetcher.prefetch(song_id, &request.stream_url).await {
                Ok(size_bytes) => self.emit_completed(song_id, size_bytes),
                Err(e) => {
                    warn!(song_id, error = %e, "Download failed");
                    if let Err(e) = self
                        .statuses
                        .mark_error(song_id, self.clock.unix_timestamp_millis())
                        .await
                    {
                        warn!(song_id, error = %e, "Failed to record download error");
                    }
                    self.events
                        .emit(CoreEvent::Download(DownloadEvent::Failed {
                            song_id: song_id.to_string(),
                            message: e.to_string(),
                        }))
                        .ok();
                }
            }
        }

        let mut state = self.state.lock();
        state.active.remove(song_id);
        state.known.remove(song_id);
        self.publish(&state);
    }

    fn emit_completed(&self, song_id: &str, size_bytes: u64) {
        debug!(song_id, size_bytes, "Download completed");
        self.events
            .emit(CoreEvent::Download(DownloadEvent::Completed {
                song_id: song_id.to_string(),
                size_bytes,
            }))
            .ok();
    }
}

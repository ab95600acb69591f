//! Owns the active media proxy and an optional staged replacement
//!
//! A staged proxy only takes over through
//! [`ProxyController::take_control_immediately`]; nothing promotes it
//! automatically, so a running session keeps its proxy until the host decides
//! to switch.

use crate::cache::download::MediaFetcher;
use crate::error::{PlaybackError, Result};
use crate::proxy::actor::{MediaProxy, MediaProxyHandle, ProxyDeps};
use crate::proxy::messages::{MediaRequest, ProxyMode};
use async_trait::async_trait;
use bridge_traits::http::HttpResponse;
use bytes::Bytes;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, instrument};

pub struct ProxyController {
    active: RwLock<Option<MediaProxyHandle>>,
    staged: RwLock<Option<MediaProxyHandle>>,
    generations: AtomicU64,
    events: EventBus,
}

impl ProxyController {
    pub fn new(events: EventBus) -> Self {
        Self {
            active: RwLock::new(None),
            staged: RwLock::new(None),
            generations: AtomicU64::new(0),
            events,
        }
    }

    /// Start the first proxy, or stage a replacement when one is running.
    /// Returns the new proxy's generation.
    pub async fn install(&self, deps: ProxyDeps, mode: ProxyMode) -> u64 {
        if self.active_handle().is_some() {
            return self.stage(deps, mode).await;
        }
        let handle = self.spawn(deps, mode);
        let generation = handle.generation();
        *self.active.write() = Some(handle);
        generation
    }

    /// Start a replacement proxy without routing requests to it.
    pub async fn stage(&self, deps: ProxyDeps, mode: ProxyMode) -> u64 {
        let handle = self.spawn(deps, mode);
        let generation = handle.generation();
        let previous = self.staged.write().replace(handle);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        info!(generation, "Media proxy staged");
        generation
    }

    /// Route all further requests to the staged proxy.
    #[instrument(skip(self))]
    pub async fn take_control_immediately(&self) -> Result<u64> {
        let staged = self
            .staged
            .write()
            .take()
            .ok_or(PlaybackError::NothingStaged)?;
        let generation = staged.generation();
        let previous = self.active.write().replace(staged);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        info!(generation, "Staged media proxy took control");
        self.events
            .emit(CoreEvent::Cache(CacheEvent::ProxyActivated { generation }))
            .ok();
        Ok(generation)
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.active_handle().map(|h| h.generation())
    }

    pub fn has_staged(&self) -> bool {
        self.staged.read().is_some()
    }

    /// Answer a media request through the active proxy.
    pub async fn fetch(&self, request: MediaRequest) -> HttpResponse {
        match self.active_handle() {
            Some(handle) => handle.fetch(request).await,
            None => HttpResponse::new(503)
                .with_body(Bytes::from_static(b"Media proxy unavailable")),
        }
    }

    pub async fn clear_all_cache(&self) -> Result<usize> {
        self.require_active()?.clear_all_cache().await
    }

    pub async fn evict_song(&self, song_id: &str) -> Result<bool> {
        self.require_active()?.evict_song(song_id).await
    }

    /// Switch the active proxy, and any staged one, between local-only and
    /// authenticated.
    pub async fn set_mode(&self, mode: ProxyMode) -> Result<()> {
        let staged = self.staged.read().clone();
        if let Some(staged) = staged {
            staged.set_mode(mode).await?;
        }
        self.require_active()?.set_mode(mode).await
    }

    pub async fn shutdown(&self) {
        let staged = self.staged.write().take();
        let active = self.active.write().take();
        for handle in staged.into_iter().chain(active) {
            handle.shutdown().await;
        }
    }

    fn spawn(&self, deps: ProxyDeps, mode: ProxyMode) -> MediaProxyHandle {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        MediaProxy::spawn(deps, mode, generation)
    }

    fn active_handle(&self) -> Option<MediaProxyHandle> {
        self.active.read().clone()
    }

    fn require_active(&self) -> Result<MediaProxyHandle> {
        self.active_handle().ok_or(PlaybackError::ProxyUnavailable)
    }
}

#[async_trait]
impl MediaFetcher for ProxyController {
    async fn prefetch(&self, song_id: &str, stream_url: &str) -> Result<u64> {
        self.require_active()?.prefetch(song_id, stream_url).await
    }
}

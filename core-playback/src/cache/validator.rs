//! # Cache Validator
//!
//! Single entry point for "is this song playable offline". Answers come from a
//! short-lived per-song memo; on a miss the blob store is asked and the replica's
//! cache status is corrected in the background when the two disagree.
//!
//! Every failure is logged and answered with `false`. An availability check
//! must never break playback.

use crate::cache::config::CacheConfig;
use crate::cache::key::cache_key;
use bridge_traits::storage::BlobStore;
use bridge_traits::time::Clock;
use core_library::repositories::CacheStatusRepository;
use futures::stream::{self, StreamExt};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy)]
struct MemoEntry {
    cached: bool,
    stored_at_ms: i64,
}

/// Memoizing availability checker over the blob store.
pub struct CacheValidator {
    blob_store: Arc<dyn BlobStore>,
    statuses: Arc<dyn CacheStatusRepository>,
    clock: Arc<dyn Clock>,
    memo: Mutex<LruCache<String, MemoEntry>>,
    ttl_ms: i64,
    concurrency: usize,
}

impl CacheValidator {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        statuses: Arc<dyn CacheStatusRepository>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.memo_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            blob_store,
            statuses,
            clock,
            memo: Mutex::new(LruCache::new(capacity)),
            ttl_ms: config.memo_ttl.as_millis().min(i64::MAX as u128) as i64,
            concurrency: config.prevalidation_concurrency.max(1),
        }
    }

    /// Whether the song's stream blob is stored locally.
    #[instrument(skip(self, stream_url))]
    pub async fn is_cached(&self, song_id: &str, stream_url: &str) -> bool {
        if let Some(cached) = self.memoized(song_id) {
            return cached;
        }

        let key = cache_key(stream_url);
        let cached = match self.blob_store.exists(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(song_id, error = %e, "Cache check failed, reporting not cached");
                return false;
            }
        };

        self.memo.lock().put(
            song_id.to_string(),
            MemoEntry {
                cached,
                stored_at_ms: self.clock.unix_timestamp_millis(),
            },
        );

        self.spawn_reconcile(song_id.to_string(), key, cached);
        cached
    }

    /// Validate many songs with at most `prevalidation_concurrency` blob
    /// reads in flight.
    pub async fn prevalidate_many<I>(&self, songs: I) -> HashMap<String, bool>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        stream::iter(songs)
            .map(|(song_id, stream_url)| async move {
                let cached = self.is_cached(&song_id, &stream_url).await;
                (song_id, cached)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Forget the memoized answer for one song.
    pub fn invalidate_song(&self, song_id: &str) {
        if self.memo.lock().pop(song_id).is_some() {
            debug!(song_id, "Cache memo invalidated");
        }
    }

    /// Forget every memoized answer.
    pub fn invalidate_all(&self) {
        self.memo.lock().clear();
    }

    pub fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }

    fn memoized(&self, song_id: &str) -> Option<bool> {
        let now = self.clock.unix_timestamp_millis();
        let mut memo = self.memo.lock();
        match memo.get(song_id) {
            Some(entry) if now - entry.stored_at_ms < self.ttl_ms => Some(entry.cached),
            Some(_) => {
                memo.pop(song_id);
                None
            }
            None => None,
        }
    }

    /// Correct the replica's status when it disagrees with the blob store.
    /// Runs detached so the caller never waits on the database.
    fn spawn_reconcile(&self, song_id: String, key: String, cached: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let blob_store = Arc::clone(&self.blob_store);
        let statuses = Arc::clone(&self.statuses);
        let checked_at = self.clock.unix_timestamp_millis();

        runtime.spawn(async move {
            let record = match statuses.get(&song_id).await {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(e) => {
                    debug!(song_id = %song_id, error = %e, "Skipping cache status reconcile");
                    return;
                }
            };
            if record.is_cached() == cached {
                return;
            }

            let result = if cached {
                let size = blob_store.size_of(&key).await.ok().flatten().unwrap_or(0);
                statuses.mark_cached(&song_id, size, checked_at).await
            } else {
                statuses.mark_not_cached(&song_id, checked_at).await
            };

            match result {
                Ok(applied) => {
                    debug!(song_id = %song_id, cached, applied, "Reconciled diverged cache status")
                }
                Err(e) => warn!(song_id = %song_id, error = %e, "Failed to reconcile cache status"),
            }
        });
    }
}

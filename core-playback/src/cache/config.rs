//! Cache, prefetch and persistence tunables

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by the validator, download manager and player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long an `is_cached` answer is trusted before the blob store is
    /// consulted again.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_memo_ttl")]
    pub memo_ttl: Duration,

    /// Maximum number of memoized songs (LRU).
    ///
    /// Default: 2048.
    #[serde(default = "default_memo_capacity")]
    pub memo_capacity: usize,

    /// Concurrent blob store reads during prevalidation.
    ///
    /// Default: 10.
    #[serde(default = "default_concurrency")]
    pub prevalidation_concurrency: usize,

    /// Concurrent fetch-and-store workers in the download manager.
    ///
    /// Default: 10.
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,

    /// Minimum spacing of position writes while playing.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_position_interval")]
    pub position_persist_interval: Duration,

    /// Capacity of the proxy to bridge message channel.
    ///
    /// Default: 256.
    #[serde(default = "default_message_capacity")]
    pub message_channel_capacity: usize,
}

fn default_memo_ttl() -> Duration {
    Duration::from_secs(10)
}

fn default_memo_capacity() -> usize {
    2048
}

fn default_concurrency() -> usize {
    10
}

fn default_position_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_message_capacity() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memo_ttl: default_memo_ttl(),
            memo_capacity: default_memo_capacity(),
            prevalidation_concurrency: default_concurrency(),
            download_concurrency: default_concurrency(),
            position_persist_interval: default_position_interval(),
            message_channel_capacity: default_message_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memo_ttl(mut self, ttl: Duration) -> Self {
        self.memo_ttl = ttl;
        self
    }

    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn with_prevalidation_concurrency(mut self, concurrency: usize) -> Self {
        self.prevalidation_concurrency = concurrency;
        self
    }

    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency;
        self
    }

    pub fn with_position_persist_interval(mut self, interval: Duration) -> Self {
        self.position_persist_interval = interval;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.memo_capacity == 0 {
            return Err("memo_capacity must be at least 1".to_string());
        }
        if self.prevalidation_concurrency == 0 {
            return Err("prevalidation_concurrency must be at least 1".to_string());
        }
        if self.download_concurrency == 0 {
            return Err("download_concurrency must be at least 1".to_string());
        }
        if self.message_channel_capacity == 0 {
            return Err("message_channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

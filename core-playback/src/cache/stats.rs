//! Cache statistics and monitoring

use core_library::repositories::CacheCoverage;
use serde::{Deserialize, Serialize};

/// Offline coverage of the visible library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Visible songs in the replica
    pub total: u64,

    /// Visible songs whose stream is cached
    pub cached: u64,

    /// `cached / total` as a percentage, 0 for an empty library
    pub percentage: f64,
}

impl CacheStats {
    pub fn new(total: u64, cached: u64) -> Self {
        Self::from(CacheCoverage { total, cached })
    }

    /// Songs that still need a download.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.cached)
    }

    /// Returns true if every visible song is playable offline.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.cached >= self.total
    }
}

impl From<CacheCoverage> for CacheStats {
    fn from(coverage: CacheCoverage) -> Self {
        Self {
            total: coverage.total,
            cached: coverage.cached,
            percentage: coverage.percentage(),
        }
    }
}

/// Snapshot of the download queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Entries waiting for a worker
    pub pending: usize,

    /// Entries currently being fetched
    pub active: usize,

    /// Whether the manager is draining the queue
    pub is_processing: bool,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.active == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_percentages() {
        let stats = CacheStats::new(200, 50);
        assert_eq!(stats.percentage, 25.0);
        assert_eq!(stats.remaining(), 150);
        assert!(!stats.is_complete());

        assert!(CacheStats::new(3, 3).is_complete());
    }

    #[test]
    fn test_empty_library() {
        let stats = CacheStats::new(0, 0);
        assert_eq!(stats.percentage, 0.0);
        assert!(!stats.is_complete());
    }

    #[test]
    fn test_queue_status_wire_shape() {
        let status = QueueStatus {
            pending: 2,
            active: 1,
            is_processing: true,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["isProcessing"], true);
        assert_eq!(json["pending"], 2);
        assert!(!status.is_idle());
        assert!(QueueStatus::default().is_idle());
    }
}

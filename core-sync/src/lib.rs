//! # Replica & Cache Sync
//!
//! Keeps the library replica consistent with the blob cache and the server.
//!
//! ## Components
//!
//! - **Cache Sync Bridge** (`cache_bridge`): sole consumer of media proxy
//!   cache messages; reconciles cache status and the validator memo
//! - **Deletion Cascade** (`deletion`): tombstones a song, resets its cache
//!   status and invalidates the validator
//! - **Replica Sync** (`replica`): applies server batches last-write-wins and
//!   drives the push cycle

pub mod cache_bridge;
pub mod deletion;
pub mod error;
pub mod replica;

#[cfg(test)]
mod test_support;

pub use cache_bridge::{BridgeOutcome, BridgeStats, CacheSyncBridge};
pub use deletion::DeletionCascade;
pub use error::{Result, SyncError};
pub use replica::{ApplyCounts, ApplyReport, LocalChanges, RemoteChanges, ReplicaSync};

//! # Play Queue
//!
//! Ordered entries with repeat and shuffle, plus snapshots for session restore.

pub mod play_queue;
pub mod repeat;

pub use play_queue::{PlaybackQueue, QueueEntry, QueueSnapshot};
pub use repeat::RepeatMode;

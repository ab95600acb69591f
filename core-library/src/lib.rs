//! # Library Replica
//!
//! Local replica of the server's library records.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite schema and migrations for songs, albums, playlists and memberships
//! - Sync-tracking fields and the tombstone filter applied to every read
//! - Repositories with pagination, derived aggregates and last-write-wins
//!   reconciliation
//! - The per-song cache status projection

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod sync_filter;

pub use error::{LibraryError, Result};
pub use models::{
    AlbumSummary, ApplyOutcome, CacheState, CacheStatusRecord, PlaylistSummary, SyncFields,
};

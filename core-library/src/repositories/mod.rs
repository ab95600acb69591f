//! # Repositories
//!
//! Trait-based data access over the SQLite replica. Every read goes through
//! the tombstone filter in [`crate::sync_filter`]; the push-cycle helpers
//! (`list_dirty`, `mark_clean`, `purge_acknowledged_tombstones`) are the only
//! calls that see tombstones.
//!
//! - `SongRepository` - songs, including remote reconciliation
//! - `AlbumRepository` - albums and their visible-song aggregates
//! - `PlaylistRepository` - playlists and soft-deleted memberships
//! - `CacheStatusRepository` - the cache status projection of songs

pub mod album;
pub mod cache_status;
pub mod pagination;
pub mod playlist;
pub(crate) mod replica;
pub mod song;

pub use album::{AlbumRepository, SqliteAlbumRepository};
pub use cache_status::{CacheCoverage, CacheStatusRepository, SqliteCacheStatusRepository};
pub use pagination::{Page, PageRequest};
pub use playlist::{PlaylistRepository, SqlitePlaylistRepository};
pub use song::{SongRepository, SqliteSongRepository};

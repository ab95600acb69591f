//! # Song Deletion Cascade
//!
//! Deleting a song touches three layers: its cache status is reset, the row
//! is tombstoned (or removed when it never left the device), and the
//! validator forgets the song. The blob itself is left alone; an in-flight
//! fetch may still store it, and nothing will reference it again until a
//! clear-cache reclaims the space.

use crate::error::Result;
use bridge_traits::time::Clock;
use core_library::repositories::{CacheStatusRepository, SongRepository};
use core_playback::cache::CacheValidator;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct DeletionCascade {
    songs: Arc<dyn SongRepository>,
    statuses: Arc<dyn CacheStatusRepository>,
    validator: Arc<CacheValidator>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl DeletionCascade {
    pub fn new(
        songs: Arc<dyn SongRepository>,
        statuses: Arc<dyn CacheStatusRepository>,
        validator: Arc<CacheValidator>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            songs,
            statuses,
            validator,
            clock,
            events,
        }
    }

    /// Delete a visible song.
    ///
    /// # Errors
    ///
    /// Not-found when the song is missing or already tombstoned.
    #[instrument(skip(self))]
    pub async fn delete_song(&self, song_id: &str) -> Result<()> {
        self.songs.get(song_id).await?;

        // Status writes only reach visible rows, so reset before tombstoning
        self.statuses
            .mark_not_cached(song_id, self.clock.unix_timestamp_millis())
            .await?;
        self.songs.delete(song_id).await?;
        self.validator.invalidate_song(song_id);

        self.events
            .emit(CoreEvent::Library(LibraryEvent::SongDeleted {
                song_id: song_id.to_string(),
            }))
            .ok();
        info!("Song deletion cascaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_song, Fixture};
    use core_library::models::{CacheState, Playlist, SyncFields};
    use core_library::repositories::PlaylistRepository;

    #[tokio::test]
    async fn test_delete_tombstones_and_resets_cache() {
        let f = Fixture::new().await;
        seed_song(&f.songs, "s1").await;
        f.statuses.mark_cached("s1", 3, 1).await.unwrap();
        f.blobs.insert("/media/s1/stream", b"abc");
        assert!(f.validator.is_cached("s1", "/media/s1/stream").await);

        let mut events = f.events.subscribe();
        f.cascade().delete_song("s1").await.unwrap();

        assert!(f.songs.find_by_id("s1").await.unwrap().is_none());
        assert!(f.statuses.get("s1").await.unwrap().is_none());
        assert_eq!(f.validator.memo_len(), 0);
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Library(LibraryEvent::SongDeleted {
                song_id: "s1".into()
            })
        );

        // Tombstone kept for the next push
        let dirty = f.songs.list_dirty().await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].sync.is_deleted);
        assert_eq!(dirty[0].cache_state, CacheState::NotCached);
    }

    #[tokio::test]
    async fn test_deleting_twice_is_not_found() {
        let f = Fixture::new().await;
        seed_song(&f.songs, "s1").await;
        let cascade = f.cascade();

        cascade.delete_song("s1").await.unwrap();
        let error = cascade.delete_song("s1").await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_deleted_song_leaves_playlists() {
        let f = Fixture::new().await;
        seed_song(&f.songs, "s1").await;
        seed_song(&f.songs, "s2").await;
        let mut playlist = Playlist::new("Mix");
        playlist.sync = SyncFields::remote(1);
        f.playlists.insert(&playlist).await.unwrap();
        f.playlists.add_song(&playlist.id, "s1").await.unwrap();
        f.playlists.add_song(&playlist.id, "s2").await.unwrap();

        f.cascade().delete_song("s1").await.unwrap();

        assert!(!f.playlists.contains_song(&playlist.id, "s1").await.unwrap());
        assert_eq!(f.playlists.song_count(&playlist.id).await.unwrap(), 1);
    }
}

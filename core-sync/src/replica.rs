//! # Replica Reconciliation
//!
//! Applies server batches to the local replica and collects local changes
//! for the next push. Conflicts are resolved last-write-wins by the
//! repositories; this module orders the batch so parents land before the
//! rows that reference them, and keeps the cache layer in step with songs
//! the server replaced or deleted.

use crate::error::Result;
use core_library::models::{Album, ApplyOutcome, Playlist, PlaylistSong, Song};
use core_library::repositories::{AlbumRepository, PlaylistRepository, SongRepository};
use core_playback::cache::CacheValidator;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Records pulled from the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteChanges {
    pub albums: Vec<Album>,
    pub songs: Vec<Song>,
    pub playlists: Vec<Playlist>,
    pub memberships: Vec<PlaylistSong>,
}

/// Local records waiting to be pushed, tombstones included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalChanges {
    pub albums: Vec<Album>,
    pub songs: Vec<Song>,
    pub playlists: Vec<Playlist>,
    pub memberships: Vec<PlaylistSong>,
}

impl LocalChanges {
    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
            && self.songs.is_empty()
            && self.playlists.is_empty()
            && self.memberships.is_empty()
    }

    pub fn len(&self) -> usize {
        self.albums.len() + self.songs.len() + self.playlists.len() + self.memberships.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCounts {
    pub applied: u64,
    pub skipped: u64,
}

impl ApplyCounts {
    fn record(&mut self, outcome: ApplyOutcome) {
        if outcome.applied() {
            self.applied += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// Per-entity result of [`ReplicaSync::apply_remote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub albums: ApplyCounts,
    pub songs: ApplyCounts,
    pub playlists: ApplyCounts,
    pub memberships: ApplyCounts,
}

pub struct ReplicaSync {
    songs: Arc<dyn SongRepository>,
    albums: Arc<dyn AlbumRepository>,
    playlists: Arc<dyn PlaylistRepository>,
    validator: Arc<CacheValidator>,
    events: EventBus,
}

impl ReplicaSync {
    pub fn new(
        songs: Arc<dyn SongRepository>,
        albums: Arc<dyn AlbumRepository>,
        playlists: Arc<dyn PlaylistRepository>,
        validator: Arc<CacheValidator>,
        events: EventBus,
    ) -> Self {
        Self {
            songs,
            albums,
            playlists,
            validator,
            events,
        }
    }

    /// Apply a server batch.
    ///
    /// Albums go first, then songs, playlists and memberships. A song the
    /// server deleted is announced like a local deletion.
    #[instrument(skip(self, changes))]
    pub async fn apply_remote(&self, changes: RemoteChanges) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        for album in &changes.albums {
            report.albums.record(self.albums.apply_remote(album).await?);
        }

        for song in &changes.songs {
            let outcome = self.songs.apply_remote(song).await?;
            report.songs.record(outcome);
            if !outcome.applied() {
                continue;
            }
            // The stream url may have changed under the memo
            self.validator.invalidate_song(&song.id);
            if song.sync.is_deleted {
                self.emit(LibraryEvent::SongDeleted {
                    song_id: song.id.clone(),
                });
            }
        }

        for playlist in &changes.playlists {
            report
                .playlists
                .record(self.playlists.apply_remote(playlist).await?);
        }

        let mut touched_playlists: Vec<&str> = Vec::new();
        for membership in &changes.memberships {
            let outcome = self.playlists.apply_remote_membership(membership).await?;
            report.memberships.record(outcome);
            if outcome.applied() && !touched_playlists.contains(&membership.playlist_id.as_str())
            {
                touched_playlists.push(&membership.playlist_id);
            }
        }
        for playlist_id in touched_playlists {
            self.emit(LibraryEvent::PlaylistUpdated {
                playlist_id: playlist_id.to_string(),
            });
        }

        for (entity_type, counts) in [
            ("album", report.albums),
            ("song", report.songs),
            ("playlist", report.playlists),
            ("playlist_song", report.memberships),
        ] {
            if counts.applied + counts.skipped > 0 {
                self.emit(LibraryEvent::RemoteApplied {
                    entity_type: entity_type.to_string(),
                    applied: counts.applied,
                    skipped: counts.skipped,
                });
            }
        }

        info!(?report, "Remote changes applied");
        Ok(report)
    }

    /// Everything modified locally since the last acknowledged push.
    pub async fn pending_changes(&self) -> Result<LocalChanges> {
        let changes = LocalChanges {
            albums: self.albums.list_dirty().await?,
            songs: self.songs.list_dirty().await?,
            playlists: self.playlists.list_dirty().await?,
            memberships: self.playlists.list_dirty_memberships().await?,
        };
        debug!(pending = changes.len(), "Collected local changes");
        Ok(changes)
    }

    /// Mark a pushed batch clean and drop the tombstones it carried.
    /// Returns the number of purged rows.
    #[instrument(skip(self, pushed), fields(pushed = pushed.len()))]
    pub async fn acknowledge(&self, pushed: &LocalChanges) -> Result<u64> {
        let memberships: Vec<(String, String)> = pushed
            .memberships
            .iter()
            .map(|m| (m.playlist_id.clone(), m.song_id.clone()))
            .collect();
        let playlist_ids: Vec<String> = pushed.playlists.iter().map(|p| p.id.clone()).collect();
        let song_ids: Vec<String> = pushed.songs.iter().map(|s| s.id.clone()).collect();
        let album_ids: Vec<String> = pushed.albums.iter().map(|a| a.id.clone()).collect();

        self.playlists.mark_memberships_clean(&memberships).await?;
        self.playlists.mark_clean(&playlist_ids).await?;
        self.songs.mark_clean(&song_ids).await?;
        self.albums.mark_clean(&album_ids).await?;

        let purged = self.playlists.purge_acknowledged_tombstones().await?
            + self.songs.purge_acknowledged_tombstones().await?
            + self.albums.purge_acknowledged_tombstones().await?;
        if purged > 0 {
            self.emit(LibraryEvent::TombstonesPurged { count: purged });
        }
        info!(purged, "Push acknowledged");
        Ok(purged)
    }

    fn emit(&self, event: LibraryEvent) {
        self.events.emit(CoreEvent::Library(event)).ok();
    }
}

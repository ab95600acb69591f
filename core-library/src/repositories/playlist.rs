//! Playlist repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{now_millis, ApplyOutcome, Playlist, PlaylistSong, PlaylistSummary, Song};
use crate::repositories::replica::{self, IdTable, Resolution};
use crate::repositories::{Page, PageRequest};
use crate::sync_filter::{visible, SyncTracked, VISIBLE};
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, SqlitePool};
use tracing::{debug, info};

/// Playlist repository interface.
///
/// Membership is visible only when both the membership row and the song are
/// visible, so a song deleted elsewhere silently leaves every playlist.
#[async_trait]
pub trait PlaylistRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Playlist>>;

    async fn get(&self, id: &str) -> Result<Playlist>;

    async fn insert(&self, playlist: &Playlist) -> Result<()>;

    async fn update(&self, playlist: &Playlist) -> Result<()>;

    /// Delete a visible playlist together with its memberships
    async fn delete(&self, id: &str) -> Result<()>;

    async fn query(&self, page_request: PageRequest) -> Result<Page<Playlist>>;

    /// Append a song. Re-adding a removed song revives its membership.
    ///
    /// # Errors
    /// `NotFound` when either the playlist or the song is not visible.
    async fn add_song(&self, playlist_id: &str, song_id: &str) -> Result<()>;

    /// Remove a song.
    ///
    /// # Returns
    /// - `Ok(true)` if the song was a member
    /// - `Ok(false)` if it was not
    async fn remove_song(&self, playlist_id: &str, song_id: &str) -> Result<bool>;

    async fn contains_song(&self, playlist_id: &str, song_id: &str) -> Result<bool>;

    /// Visible song IDs in playlist order
    async fn song_ids(&self, playlist_id: &str) -> Result<Vec<String>>;

    async fn song_count(&self, playlist_id: &str) -> Result<u32>;

    /// Visible playlists containing a visible membership of the song
    async fn find_by_song(&self, song_id: &str) -> Result<Vec<Playlist>>;

    /// Aggregates over visible memberships of visible songs
    async fn summary(&self, id: &str) -> Result<PlaylistSummary>;

    async fn count(&self) -> Result<i64>;

    async fn apply_remote(&self, playlist: &Playlist) -> Result<ApplyOutcome>;

    async fn apply_remote_membership(&self, membership: &PlaylistSong) -> Result<ApplyOutcome>;

    async fn list_dirty(&self) -> Result<Vec<Playlist>>;

    async fn list_dirty_memberships(&self) -> Result<Vec<PlaylistSong>>;

    async fn mark_clean(&self, ids: &[String]) -> Result<u64>;

    /// Clean memberships keyed by `(playlist_id, song_id)`
    async fn mark_memberships_clean(&self, keys: &[(String, String)]) -> Result<u64>;

    async fn purge_acknowledged_tombstones(&self) -> Result<u64>;
}

/// A membership joined with its song, tombstones on either side included.
#[derive(Debug, FromRow)]
struct MemberRow {
    #[sqlx(flatten)]
    song: Song,
    member_position: i64,
    member_deleted: bool,
}

impl MemberRow {
    fn is_visible(&self) -> bool {
        !self.member_deleted && self.song.is_visible()
    }
}

/// SQLite implementation of PlaylistRepository
pub struct SqlitePlaylistRepository {
    pool: SqlitePool,
}

impl SqlitePlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn validate(playlist: &Playlist) -> Result<()> {
        playlist.validate().map_err(|e| LibraryError::InvalidInput {
            field: "Playlist".to_string(),
            message: e,
        })
    }

    async fn membership(&self, playlist_id: &str, song_id: &str) -> Result<Option<PlaylistSong>> {
        let membership = query_as::<_, PlaylistSong>(
            "SELECT * FROM playlist_songs WHERE playlist_id = ? AND song_id = ?",
        )
        .bind(playlist_id)
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    async fn song_is_visible(&self, song_id: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM songs WHERE id = ? AND {VISIBLE}");
        let count: i64 = query_as(&sql)
            .bind(song_id)
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;
        Ok(count > 0)
    }

    /// Candidates newest-added first, including hidden ones.
    async fn member_rows(&self, playlist_id: &str) -> Result<Vec<MemberRow>> {
        let rows = query_as::<_, MemberRow>(
            r#"
            SELECT s.*, ps.position AS member_position, ps._is_deleted AS member_deleted
            FROM playlist_songs ps
            JOIN songs s ON s.id = ps.song_id
            WHERE ps.playlist_id = ?
            ORDER BY ps.added_at DESC, ps.position DESC
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl PlaylistRepository for SqlitePlaylistRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Playlist>> {
        let sql = format!("SELECT * FROM playlists WHERE id = ? AND {VISIBLE}");
        let playlist = query_as::<_, Playlist>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(playlist)
    }

    async fn get(&self, id: &str) -> Result<Playlist> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| LibraryError::not_found("Playlist", id))
    }

    async fn insert(&self, playlist: &Playlist) -> Result<()> {
        Self::validate(playlist)?;

        query(
            r#"
            INSERT INTO playlists (
                id, name, normalized_name, description, created_at, updated_at,
                _is_dirty, _is_deleted, _is_local_only, _last_modified_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&playlist.id)
        .bind(&playlist.name)
        .bind(&playlist.normalized_name)
        .bind(&playlist.description)
        .bind(playlist.created_at)
        .bind(playlist.updated_at)
        .bind(playlist.sync.is_dirty)
        .bind(playlist.sync.is_deleted)
        .bind(playlist.sync.is_local_only)
        .bind(playlist.sync.last_modified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, playlist: &Playlist) -> Result<()> {
        Self::validate(playlist)?;

        let now = now_millis();
        let sql = format!(
            r#"
            UPDATE playlists
            SET name = ?, normalized_name = ?, description = ?, updated_at = ?,
                _is_dirty = 1, _last_modified_at = ?
            WHERE id = ? AND {VISIBLE}
            "#
        );
        let result = query(&sql)
            .bind(&playlist.name)
            .bind(&playlist.normalized_name)
            .bind(&playlist.description)
            .bind(now)
            .bind(now)
            .bind(&playlist.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("Playlist", &playlist.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let playlist = self.get(id).await?;
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        if playlist.sync.is_local_only {
            query("DELETE FROM playlist_songs WHERE playlist_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            query("DELETE FROM playlists WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        } else {
            query(
                r#"
                UPDATE playlist_songs
                SET _is_deleted = 1, _is_dirty = 1, _last_modified_at = ?
                WHERE playlist_id = ? AND _is_deleted = 0
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            query(
                "UPDATE playlists SET _is_deleted = 1, _is_dirty = 1, _last_modified_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(playlist_id = id, "Playlist deleted");
        Ok(())
    }

    async fn query(&self, page_request: PageRequest) -> Result<Page<Playlist>> {
        let total = self.count().await?;

        let sql = format!(
            "SELECT * FROM playlists WHERE {VISIBLE} ORDER BY normalized_name ASC LIMIT ? OFFSET ?"
        );
        let playlists = query_as::<_, Playlist>(&sql)
            .bind(page_request.limit())
            .bind(page_request.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(playlists, total as u64, page_request))
    }

    async fn add_song(&self, playlist_id: &str, song_id: &str) -> Result<()> {
        self.get(playlist_id).await?;
        if !self.song_is_visible(song_id).await? {
            return Err(LibraryError::not_found("Song", song_id));
        }

        let now = now_millis();
        let (next_position,): (i64,) = query_as(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_songs WHERE playlist_id = ?",
        )
        .bind(playlist_id)
        .fetch_one(&self.pool)
        .await?;

        match self.membership(playlist_id, song_id).await? {
            Some(existing) if existing.is_visible() => {
                debug!(playlist_id, song_id, "Song already in playlist");
            }
            Some(_) => {
                query(
                    r#"
                    UPDATE playlist_songs
                    SET _is_deleted = 0, _is_dirty = 1, _last_modified_at = ?,
                        position = ?, added_at = ?
                    WHERE playlist_id = ? AND song_id = ?
                    "#,
                )
                .bind(now)
                .bind(next_position)
                .bind(now)
                .bind(playlist_id)
                .bind(song_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                query(
                    r#"
                    INSERT INTO playlist_songs (
                        playlist_id, song_id, position, added_at,
                        _is_dirty, _is_deleted, _is_local_only, _last_modified_at
                    )
                    VALUES (?, ?, ?, ?, 1, 0, 1, ?)
                    "#,
                )
                .bind(playlist_id)
                .bind(song_id)
                .bind(next_position)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn remove_song(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        self.get(playlist_id).await?;

        let membership = match self.membership(playlist_id, song_id).await? {
            Some(m) if m.is_visible() => m,
            _ => return Ok(false),
        };

        if membership.sync.is_local_only {
            query("DELETE FROM playlist_songs WHERE playlist_id = ? AND song_id = ?")
                .bind(playlist_id)
                .bind(song_id)
                .execute(&self.pool)
                .await?;
        } else {
            query(
                r#"
                UPDATE playlist_songs
                SET _is_deleted = 1, _is_dirty = 1, _last_modified_at = ?
                WHERE playlist_id = ? AND song_id = ?
                "#,
            )
            .bind(now_millis())
            .bind(playlist_id)
            .bind(song_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(true)
    }

    async fn contains_song(&self, playlist_id: &str, song_id: &str) -> Result<bool> {
        let sql = format!(
            r#"
            SELECT COUNT(*) FROM playlist_songs ps
            JOIN songs s ON s.id = ps.song_id
            JOIN playlists p ON p.id = ps.playlist_id
            WHERE ps.playlist_id = ? AND ps.song_id = ? AND {} AND {} AND {}
            "#,
            visible("ps"),
            visible("s"),
            visible("p")
        );
        let count: i64 = query_as(&sql)
            .bind(playlist_id)
            .bind(song_id)
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;
        Ok(count > 0)
    }

    async fn song_ids(&self, playlist_id: &str) -> Result<Vec<String>> {
        self.get(playlist_id).await?;

        let sql = format!(
            r#"
            SELECT ps.song_id FROM playlist_songs ps
            JOIN songs s ON s.id = ps.song_id
            WHERE ps.playlist_id = ? AND {} AND {}
            ORDER BY ps.position ASC
            "#,
            visible("ps"),
            visible("s")
        );
        let ids = query_as::<_, (String,)>(&sql)
            .bind(playlist_id)
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.into_iter().map(|(id,)| id).collect())?;
        Ok(ids)
    }

    async fn song_count(&self, playlist_id: &str) -> Result<u32> {
        self.get(playlist_id).await?;

        let sql = format!(
            r#"
            SELECT COUNT(*) FROM playlist_songs ps
            JOIN songs s ON s.id = ps.song_id
            WHERE ps.playlist_id = ? AND {} AND {}
            "#,
            visible("ps"),
            visible("s")
        );
        let count: i64 = query_as(&sql)
            .bind(playlist_id)
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;
        Ok(count as u32)
    }

    async fn find_by_song(&self, song_id: &str) -> Result<Vec<Playlist>> {
        let sql = format!(
            r#"
            SELECT p.* FROM playlists p
            JOIN playlist_songs ps ON ps.playlist_id = p.id
            JOIN songs s ON s.id = ps.song_id
            WHERE ps.song_id = ? AND {} AND {} AND {}
            ORDER BY p.normalized_name ASC
            "#,
            visible("p"),
            visible("ps"),
            visible("s")
        );
        let playlists = query_as::<_, Playlist>(&sql)
            .bind(song_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(playlists)
    }

    async fn summary(&self, id: &str) -> Result<PlaylistSummary> {
        let playlist = self.get(id).await?;
        let rows = self.member_rows(id).await?;

        // Newest-added first; hidden candidates are skipped, never borrowed from
        let cover_url = rows
            .iter()
            .filter(|r| r.is_visible())
            .find_map(|r| r.song.cover_url.clone());

        let first_playable_song_id = rows
            .iter()
            .filter(|r| r.is_visible())
            .min_by_key(|r| r.member_position)
            .map(|r| r.song.id.clone());

        let visible_rows: Vec<_> = rows.iter().filter(|r| r.is_visible()).collect();

        Ok(PlaylistSummary {
            song_count: visible_rows.len() as u32,
            total_duration_ms: visible_rows.iter().map(|r| r.song.duration_ms).sum(),
            cover_url,
            first_playable_song_id,
            playlist,
        })
    }

    async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM playlists WHERE {VISIBLE}");
        let count: i64 = query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;
        Ok(count)
    }

    async fn apply_remote(&self, playlist: &Playlist) -> Result<ApplyOutcome> {
        Self::validate(playlist)?;

        let local = replica::sync_fields(&self.pool, IdTable::Playlists, &playlist.id).await?;
        let outcome = match replica::resolve(local.as_ref(), &playlist.sync) {
            Resolution::KeepLocal => ApplyOutcome::SkippedLocalNewer,
            Resolution::Insert => {
                let mut incoming = playlist.clone();
                incoming.sync.is_dirty = false;
                incoming.sync.is_local_only = false;
                self.insert(&incoming).await?;
                ApplyOutcome::Inserted
            }
            Resolution::Overwrite => {
                query(
                    r#"
                    UPDATE playlists
                    SET name = ?, normalized_name = ?, description = ?, created_at = ?, updated_at = ?,
                        _is_dirty = 0, _is_deleted = ?, _is_local_only = 0, _last_modified_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&playlist.name)
                .bind(&playlist.normalized_name)
                .bind(&playlist.description)
                .bind(playlist.created_at)
                .bind(playlist.updated_at)
                .bind(playlist.sync.is_deleted)
                .bind(playlist.sync.last_modified_at)
                .bind(&playlist.id)
                .execute(&self.pool)
                .await?;
                ApplyOutcome::Updated
            }
        };

        debug!(playlist_id = %playlist.id, ?outcome, "Applied remote playlist");
        Ok(outcome)
    }

    async fn apply_remote_membership(&self, membership: &PlaylistSong) -> Result<ApplyOutcome> {
        let local = self
            .membership(&membership.playlist_id, &membership.song_id)
            .await?;

        let outcome = match replica::resolve(local.as_ref().map(|m| &m.sync), &membership.sync) {
            Resolution::KeepLocal => ApplyOutcome::SkippedLocalNewer,
            Resolution::Insert | Resolution::Overwrite => {
                query(
                    r#"
                    INSERT INTO playlist_songs (
                        playlist_id, song_id, position, added_at,
                        _is_dirty, _is_deleted, _is_local_only, _last_modified_at
                    )
                    VALUES (?, ?, ?, ?, 0, ?, 0, ?)
                    ON CONFLICT(playlist_id, song_id) DO UPDATE SET
                        position = excluded.position,
                        added_at = excluded.added_at,
                        _is_dirty = 0,
                        _is_deleted = excluded._is_deleted,
                        _is_local_only = 0,
                        _last_modified_at = excluded._last_modified_at
                    "#,
                )
                .bind(&membership.playlist_id)
                .bind(&membership.song_id)
                .bind(membership.position)
                .bind(membership.added_at)
                .bind(membership.sync.is_deleted)
                .bind(membership.sync.last_modified_at)
                .execute(&self.pool)
                .await?;

                if local.is_some() {
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Inserted
                }
            }
        };

        Ok(outcome)
    }

    async fn list_dirty(&self) -> Result<Vec<Playlist>> {
        let playlists = query_as::<_, Playlist>(
            "SELECT * FROM playlists WHERE _is_dirty = 1 ORDER BY _last_modified_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(playlists)
    }

    async fn list_dirty_memberships(&self) -> Result<Vec<PlaylistSong>> {
        let memberships = query_as::<_, PlaylistSong>(
            "SELECT * FROM playlist_songs WHERE _is_dirty = 1 ORDER BY _last_modified_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(memberships)
    }

    async fn mark_clean(&self, ids: &[String]) -> Result<u64> {
        replica::mark_clean(&self.pool, IdTable::Playlists, ids).await
    }

    async fn mark_memberships_clean(&self, keys: &[(String, String)]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut cleaned = 0;
        for (playlist_id, song_id) in keys {
            cleaned += query(
                "UPDATE playlist_songs SET _is_dirty = 0, _is_local_only = 0 WHERE playlist_id = ? AND song_id = ?",
            )
            .bind(playlist_id)
            .bind(song_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(cleaned)
    }

    async fn purge_acknowledged_tombstones(&self) -> Result<u64> {
        let memberships = replica::purge_acknowledged_tombstones(&self.pool, "playlist_songs").await?;
        let playlists =
            replica::purge_acknowledged_tombstones(&self.pool, IdTable::Playlists.name()).await?;
        Ok(memberships + playlists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::SyncFields;
    use crate::repositories::{SongRepository, SqliteSongRepository};

    async fn setup() -> (SqlitePlaylistRepository, SqliteSongRepository) {
        let pool = create_test_pool().await.unwrap();
        (
            SqlitePlaylistRepository::new(pool.clone()),
            SqliteSongRepository::new(pool),
        )
    }

    fn synced_song(id: &str, created_at: i64) -> Song {
        let mut song = Song::new(id).with_id(id).with_created_at(created_at);
        song.sync = SyncFields::remote(created_at);
        song
    }

    fn synced_playlist(name: &str) -> Playlist {
        let mut playlist = Playlist::new(name);
        playlist.sync = SyncFields::remote(1);
        playlist
    }

    #[tokio::test]
    async fn test_insert_and_find_playlist() {
        let (playlists, _) = setup().await;
        let mut playlist = Playlist::new("My Playlist");
        playlist.description = Some("Workout mix".to_string());
        playlists.insert(&playlist).await.unwrap();

        let found = playlists.find_by_id(&playlist.id).await.unwrap().unwrap();
        assert_eq!(found.name, "My Playlist");
        assert_eq!(found.description.as_deref(), Some("Workout mix"));
    }

    #[tokio::test]
    async fn test_add_then_remove_restores_count() {
        let (playlists, songs) = setup().await;
        let playlist = synced_playlist("Road");
        playlists.insert(&playlist).await.unwrap();
        songs.insert(&synced_song("s1", 1)).await.unwrap();
        songs.insert(&synced_song("s2", 2)).await.unwrap();
        playlists.add_song(&playlist.id, "s1").await.unwrap();

        let before = playlists.song_count(&playlist.id).await.unwrap();
        playlists.add_song(&playlist.id, "s2").await.unwrap();
        assert!(playlists.remove_song(&playlist.id, "s2").await.unwrap());

        assert!(!playlists.contains_song(&playlist.id, "s2").await.unwrap());
        assert_eq!(playlists.song_count(&playlist.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remove_pushed_membership_leaves_tombstone() {
        let (playlists, songs) = setup().await;
        let playlist = synced_playlist("Road");
        playlists.insert(&playlist).await.unwrap();
        songs.insert(&synced_song("s1", 1)).await.unwrap();
        playlists.add_song(&playlist.id, "s1").await.unwrap();
        playlists
            .mark_memberships_clean(&[(playlist.id.clone(), "s1".to_string())])
            .await
            .unwrap();

        assert!(playlists.remove_song(&playlist.id, "s1").await.unwrap());
        assert!(!playlists.contains_song(&playlist.id, "s1").await.unwrap());
        assert_eq!(playlists.song_count(&playlist.id).await.unwrap(), 0);

        let dirty = playlists.list_dirty_memberships().await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].sync.is_deleted);

        // Removing again is a no-op, re-adding revives the row
        assert!(!playlists.remove_song(&playlist.id, "s1").await.unwrap());
        playlists.add_song(&playlist.id, "s1").await.unwrap();
        assert!(playlists.contains_song(&playlist.id, "s1").await.unwrap());
        assert_eq!(playlists.song_count(&playlist.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_song_rejects_hidden_records() {
        let (playlists, songs) = setup().await;
        let playlist = synced_playlist("Road");
        playlists.insert(&playlist).await.unwrap();
        songs.insert(&synced_song("gone", 1)).await.unwrap();
        songs.delete("gone").await.unwrap();

        let err = playlists.add_song(&playlist.id, "gone").await.unwrap_err();
        assert!(err.is_not_found());
        let err = playlists.add_song("missing", "gone").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deleted_song_leaves_every_query_shape() {
        let (playlists, songs) = setup().await;
        let playlist = synced_playlist("Road");
        playlists.insert(&playlist).await.unwrap();
        for (id, at) in [("S1", 1), ("S2", 2), ("S3", 3)] {
            songs.insert(&synced_song(id, at)).await.unwrap();
            playlists.add_song(&playlist.id, id).await.unwrap();
        }
        songs.delete("S3").await.unwrap();

        assert_eq!(
            playlists.song_ids(&playlist.id).await.unwrap(),
            vec!["S1", "S2"]
        );
        assert!(!playlists.contains_song(&playlist.id, "S3").await.unwrap());
        assert!(playlists.find_by_song("S3").await.unwrap().is_empty());
        assert_eq!(playlists.find_by_song("S1").await.unwrap().len(), 1);

        let summary = playlists.summary(&playlist.id).await.unwrap();
        assert_eq!(summary.song_count, 2);
        assert_eq!(summary.cover_url.as_deref(), Some("/media/S2/cover"));
        assert_eq!(summary.first_playable_song_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_deleted_playlist_is_not_found() {
        let (playlists, songs) = setup().await;
        let playlist = synced_playlist("Old");
        playlists.insert(&playlist).await.unwrap();
        songs.insert(&synced_song("s1", 1)).await.unwrap();
        playlists.add_song(&playlist.id, "s1").await.unwrap();
        playlists.delete(&playlist.id).await.unwrap();

        assert!(playlists.find_by_id(&playlist.id).await.unwrap().is_none());
        assert!(playlists.song_ids(&playlist.id).await.unwrap_err().is_not_found());
        assert!(playlists.summary(&playlist.id).await.unwrap_err().is_not_found());
        assert!(playlists.delete(&playlist.id).await.unwrap_err().is_not_found());
        assert!(playlists.find_by_song("s1").await.unwrap().is_empty());
        assert_eq!(playlists.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_membership_apply_and_purge() {
        let (playlists, songs) = setup().await;
        let playlist = synced_playlist("Shared");
        playlists.insert(&playlist).await.unwrap();
        songs.insert(&synced_song("s1", 1)).await.unwrap();

        let mut membership = PlaylistSong {
            playlist_id: playlist.id.clone(),
            song_id: "s1".to_string(),
            position: 0,
            added_at: 5,
            sync: SyncFields::remote(5),
        };
        assert_eq!(
            playlists.apply_remote_membership(&membership).await.unwrap(),
            ApplyOutcome::Inserted
        );
        assert!(playlists.contains_song(&playlist.id, "s1").await.unwrap());

        membership.sync = SyncFields::remote_tombstone(6);
        assert_eq!(
            playlists.apply_remote_membership(&membership).await.unwrap(),
            ApplyOutcome::Updated
        );
        assert!(!playlists.contains_song(&playlist.id, "s1").await.unwrap());
        assert_eq!(playlists.purge_acknowledged_tombstones().await.unwrap(), 1);
    }
}

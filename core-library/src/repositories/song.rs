//! Song repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{now_millis, ApplyOutcome, Song};
use crate::repositories::replica::{self, IdTable, Resolution};
use crate::repositories::{Page, PageRequest};
use crate::sync_filter::{self, VISIBLE};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};
use tracing::{debug, info};

/// Song access for application code. Tombstoned songs are invisible to every
/// read and behave as missing for `get`, `update` and `delete`.
#[async_trait]
pub trait SongRepository: Send + Sync {
    /// Find a visible song by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Song>>;

    /// Visible song or `NotFound`
    async fn get(&self, id: &str) -> Result<Song>;

    async fn insert(&self, song: &Song) -> Result<()>;

    /// Update a visible song and mark it dirty
    ///
    /// # Errors
    /// `NotFound` when the song is absent or tombstoned.
    async fn update(&self, song: &Song) -> Result<()>;

    /// Delete a visible song.
    ///
    /// Songs never pushed to the server are removed outright; anything else
    /// becomes a dirty tombstone so the deletion can be pushed later. The
    /// song's playlist memberships follow the same rule.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Visible songs, most recently created first
    async fn query(&self, page_request: PageRequest) -> Result<Page<Song>>;

    /// Visible songs of an album in track order
    async fn find_by_album(&self, album_id: &str) -> Result<Vec<Song>>;

    /// Most recently created visible song
    async fn most_recent(&self) -> Result<Option<Song>>;

    async fn count(&self) -> Result<i64>;

    /// Upsert a server copy with last-write-wins against local edits.
    async fn apply_remote(&self, song: &Song) -> Result<ApplyOutcome>;

    /// Rows with unpushed changes, tombstones included. Meant for the push
    /// cycle only.
    async fn list_dirty(&self) -> Result<Vec<Song>>;

    async fn mark_clean(&self, ids: &[String]) -> Result<u64>;

    async fn purge_acknowledged_tombstones(&self) -> Result<u64>;
}

/// SQLite implementation of SongRepository
pub struct SqliteSongRepository {
    pool: SqlitePool,
}

impl SqliteSongRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_raw(&self, id: &str) -> Result<Option<Song>> {
        let song = query_as::<_, Song>("SELECT * FROM songs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(song)
    }

    fn validate(song: &Song) -> Result<()> {
        song.validate().map_err(|e| LibraryError::InvalidInput {
            field: "Song".to_string(),
            message: e,
        })
    }
}

#[async_trait]
impl SongRepository for SqliteSongRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Song>> {
        let sql = format!("SELECT * FROM songs WHERE id = ? AND {VISIBLE}");
        let song = query_as::<_, Song>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(song)
    }

    async fn get(&self, id: &str) -> Result<Song> {
        let song = self.find_raw(id).await?;
        sync_filter::require_visible(song, "Song", id)
    }

    async fn insert(&self, song: &Song) -> Result<()> {
        Self::validate(song)?;

        query(
            r#"
            INSERT INTO songs (
                id, title, artist_name, album_id, duration_ms, track_number,
                stream_url, cover_url, cache_state, cache_size_bytes, cache_checked_at,
                created_at, updated_at,
                _is_dirty, _is_deleted, _is_local_only, _last_modified_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&song.id)
        .bind(&song.title)
        .bind(&song.artist_name)
        .bind(&song.album_id)
        .bind(song.duration_ms)
        .bind(song.track_number)
        .bind(&song.stream_url)
        .bind(&song.cover_url)
        .bind(song.cache_state.as_str())
        .bind(song.cache_size_bytes)
        .bind(song.cache_checked_at)
        .bind(song.created_at)
        .bind(song.updated_at)
        .bind(song.sync.is_dirty)
        .bind(song.sync.is_deleted)
        .bind(song.sync.is_local_only)
        .bind(song.sync.last_modified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, song: &Song) -> Result<()> {
        Self::validate(song)?;

        let now = now_millis();
        let sql = format!(
            r#"
            UPDATE songs
            SET title = ?, artist_name = ?, album_id = ?, duration_ms = ?, track_number = ?,
                cover_url = ?, updated_at = ?, _is_dirty = 1, _last_modified_at = ?
            WHERE id = ? AND {VISIBLE}
            "#
        );
        let result = query(&sql)
            .bind(&song.title)
            .bind(&song.artist_name)
            .bind(&song.album_id)
            .bind(song.duration_ms)
            .bind(song.track_number)
            .bind(&song.cover_url)
            .bind(now)
            .bind(now)
            .bind(&song.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("Song", &song.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let song = self.get(id).await?;
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        // Memberships: local-only rows vanish, pushed rows become tombstones
        query("DELETE FROM playlist_songs WHERE song_id = ? AND _is_local_only = 1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        query(
            r#"
            UPDATE playlist_songs
            SET _is_deleted = 1, _is_dirty = 1, _last_modified_at = ?
            WHERE song_id = ? AND _is_deleted = 0
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if song.sync.is_local_only {
            query("DELETE FROM songs WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        } else {
            query(
                r#"
                UPDATE songs
                SET _is_deleted = 1, _is_dirty = 1, _last_modified_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(song_id = id, local_only = song.sync.is_local_only, "Song deleted");
        Ok(())
    }

    async fn query(&self, page_request: PageRequest) -> Result<Page<Song>> {
        let total = self.count().await?;

        let sql = format!(
            "SELECT * FROM songs WHERE {VISIBLE} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let songs = query_as::<_, Song>(&sql)
            .bind(page_request.limit())
            .bind(page_request.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(songs, total as u64, page_request))
    }

    async fn find_by_album(&self, album_id: &str) -> Result<Vec<Song>> {
        let sql = format!(
            r#"
            SELECT * FROM songs
            WHERE album_id = ? AND {VISIBLE}
            ORDER BY track_number IS NULL, track_number ASC, created_at ASC
            "#
        );
        let songs = query_as::<_, Song>(&sql)
            .bind(album_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(songs)
    }

    async fn most_recent(&self) -> Result<Option<Song>> {
        let sql =
            format!("SELECT * FROM songs WHERE {VISIBLE} ORDER BY created_at DESC, id DESC LIMIT 1");
        let song = query_as::<_, Song>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(song)
    }

    async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM songs WHERE {VISIBLE}");
        let count: i64 = query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;
        Ok(count)
    }

    async fn apply_remote(&self, song: &Song) -> Result<ApplyOutcome> {
        Self::validate(song)?;

        let local = replica::sync_fields(&self.pool, IdTable::Songs, &song.id).await?;
        let outcome = match replica::resolve(local.as_ref(), &song.sync) {
            Resolution::KeepLocal => ApplyOutcome::SkippedLocalNewer,
            Resolution::Insert => {
                let mut incoming = song.clone();
                incoming.sync.is_dirty = false;
                incoming.sync.is_local_only = false;
                self.insert(&incoming).await?;
                ApplyOutcome::Inserted
            }
            Resolution::Overwrite => {
                // Cache columns are device local; a new stream url invalidates them
                query(
                    r#"
                    UPDATE songs
                    SET title = ?, artist_name = ?, album_id = ?, duration_ms = ?,
                        track_number = ?, cover_url = ?, created_at = ?, updated_at = ?,
                        cache_state = CASE WHEN stream_url = ? THEN cache_state ELSE 'not_cached' END,
                        cache_size_bytes = CASE WHEN stream_url = ? THEN cache_size_bytes ELSE NULL END,
                        stream_url = ?,
                        _is_dirty = 0, _is_deleted = ?, _is_local_only = 0, _last_modified_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&song.title)
                .bind(&song.artist_name)
                .bind(&song.album_id)
                .bind(song.duration_ms)
                .bind(song.track_number)
                .bind(&song.cover_url)
                .bind(song.created_at)
                .bind(song.updated_at)
                .bind(&song.stream_url)
                .bind(&song.stream_url)
                .bind(&song.stream_url)
                .bind(song.sync.is_deleted)
                .bind(song.sync.last_modified_at)
                .bind(&song.id)
                .execute(&self.pool)
                .await?;
                ApplyOutcome::Updated
            }
        };

        debug!(song_id = %song.id, ?outcome, deleted = song.sync.is_deleted, "Applied remote song");
        Ok(outcome)
    }

    async fn list_dirty(&self) -> Result<Vec<Song>> {
        let songs = query_as::<_, Song>(
            "SELECT * FROM songs WHERE _is_dirty = 1 ORDER BY _last_modified_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(songs)
    }

    async fn mark_clean(&self, ids: &[String]) -> Result<u64> {
        replica::mark_clean(&self.pool, IdTable::Songs, ids).await
    }

    async fn purge_acknowledged_tombstones(&self) -> Result<u64> {
        replica::purge_acknowledged_tombstones(&self.pool, IdTable::Songs.name()).await
    }
}

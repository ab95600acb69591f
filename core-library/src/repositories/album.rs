//! Album repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{now_millis, Album, AlbumSummary, ApplyOutcome, Song};
use crate::repositories::replica::{self, IdTable, Resolution};
use crate::repositories::{Page, PageRequest};
use crate::sync_filter::{self, VISIBLE};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};
use tracing::debug;

#[async_trait]
pub trait AlbumRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Album>>;

    async fn get(&self, id: &str) -> Result<Album>;

    async fn insert(&self, album: &Album) -> Result<()>;

    async fn update(&self, album: &Album) -> Result<()>;

    /// Tombstone a visible album. Its songs are left alone.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Visible albums ordered by name
    async fn query(&self, page_request: PageRequest) -> Result<Page<Album>>;

    /// Aggregates over the album's visible songs
    async fn summary(&self, id: &str) -> Result<AlbumSummary>;

    async fn count(&self) -> Result<i64>;

    async fn apply_remote(&self, album: &Album) -> Result<ApplyOutcome>;

    async fn list_dirty(&self) -> Result<Vec<Album>>;

    async fn mark_clean(&self, ids: &[String]) -> Result<u64>;

    async fn purge_acknowledged_tombstones(&self) -> Result<u64>;
}

/// SQLite implementation of AlbumRepository
pub struct SqliteAlbumRepository {
    pool: SqlitePool,
}

impl SqliteAlbumRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn validate(album: &Album) -> Result<()> {
        album.validate().map_err(|e| LibraryError::InvalidInput {
            field: "Album".to_string(),
            message: e,
        })
    }
}

#[async_trait]
impl AlbumRepository for SqliteAlbumRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Album>> {
        let album = query_as::<_, Album>("SELECT * FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sync_filter::visible_or_none(album))
    }

    async fn get(&self, id: &str) -> Result<Album> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| LibraryError::not_found("Album", id))
    }

    async fn insert(&self, album: &Album) -> Result<()> {
        Self::validate(album)?;

        query(
            r#"
            INSERT INTO albums (
                id, name, normalized_name, artist_name, year, created_at, updated_at,
                _is_dirty, _is_deleted, _is_local_only, _last_modified_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&album.id)
        .bind(&album.name)
        .bind(&album.normalized_name)
        .bind(&album.artist_name)
        .bind(album.year)
        .bind(album.created_at)
        .bind(album.updated_at)
        .bind(album.sync.is_dirty)
        .bind(album.sync.is_deleted)
        .bind(album.sync.is_local_only)
        .bind(album.sync.last_modified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, album: &Album) -> Result<()> {
        Self::validate(album)?;

        let now = now_millis();
        let sql = format!(
            r#"
            UPDATE albums
            SET name = ?, normalized_name = ?, artist_name = ?, year = ?, updated_at = ?,
                _is_dirty = 1, _last_modified_at = ?
            WHERE id = ? AND {VISIBLE}
            "#
        );
        let result = query(&sql)
            .bind(&album.name)
            .bind(&album.normalized_name)
            .bind(&album.artist_name)
            .bind(album.year)
            .bind(now)
            .bind(now)
            .bind(&album.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("Album", &album.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let now = now_millis();
        let sql = format!(
            "UPDATE albums SET _is_deleted = 1, _is_dirty = 1, _last_modified_at = ? WHERE id = ? AND {VISIBLE}"
        );
        let result = query(&sql).bind(now).bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::not_found("Album", id));
        }
        Ok(())
    }

    async fn query(&self, page_request: PageRequest) -> Result<Page<Album>> {
        let total = self.count().await?;

        let sql = format!(
            "SELECT * FROM albums WHERE {VISIBLE} ORDER BY normalized_name ASC LIMIT ? OFFSET ?"
        );
        let albums = query_as::<_, Album>(&sql)
            .bind(page_request.limit())
            .bind(page_request.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(albums, total as u64, page_request))
    }

    async fn summary(&self, id: &str) -> Result<AlbumSummary> {
        let album = self.get(id).await?;

        // Every candidate, tombstones included, newest first
        let candidates = query_as::<_, Song>(
            "SELECT * FROM songs WHERE album_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let cover_url = sync_filter::first_visible_value(&candidates, |s| s.cover_url.clone());

        let mut in_track_order: Vec<&Song> = candidates.iter().collect();
        in_track_order.sort_by_key(|s| (s.track_number.is_none(), s.track_number, s.created_at));
        let first_playable_song_id =
            sync_filter::first_visible(in_track_order.into_iter()).map(|s| s.id.clone());

        let total_duration_ms = candidates
            .iter()
            .filter(|s| !s.sync.is_deleted)
            .map(|s| s.duration_ms)
            .sum();

        Ok(AlbumSummary {
            song_count: sync_filter::count_visible(&candidates),
            total_duration_ms,
            cover_url,
            first_playable_song_id,
            album,
        })
    }

    async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM albums WHERE {VISIBLE}");
        let count: i64 = query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;
        Ok(count)
    }

    async fn apply_remote(&self, album: &Album) -> Result<ApplyOutcome> {
        Self::validate(album)?;

        let local = replica::sync_fields(&self.pool, IdTable::Albums, &album.id).await?;
        let outcome = match replica::resolve(local.as_ref(), &album.sync) {
            Resolution::KeepLocal => ApplyOutcome::SkippedLocalNewer,
            Resolution::Insert => {
                let mut incoming = album.clone();
                incoming.sync.is_dirty = false;
                incoming.sync.is_local_only = false;
                self.insert(&incoming).await?;
                ApplyOutcome::Inserted
            }
            Resolution::Overwrite => {
                query(
                    r#"
                    UPDATE albums
                    SET name = ?, normalized_name = ?, artist_name = ?, year = ?,
                        created_at = ?, updated_at = ?,
                        _is_dirty = 0, _is_deleted = ?, _is_local_only = 0, _last_modified_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&album.name)
                .bind(&album.normalized_name)
                .bind(&album.artist_name)
                .bind(album.year)
                .bind(album.created_at)
                .bind(album.updated_at)
                .bind(album.sync.is_deleted)
                .bind(album.sync.last_modified_at)
                .bind(&album.id)
                .execute(&self.pool)
                .await?;
                ApplyOutcome::Updated
            }
        };

        debug!(album_id = %album.id, ?outcome, "Applied remote album");
        Ok(outcome)
    }

    async fn list_dirty(&self) -> Result<Vec<Album>> {
        let albums = query_as::<_, Album>(
            "SELECT * FROM albums WHERE _is_dirty = 1 ORDER BY _last_modified_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(albums)
    }

    async fn mark_clean(&self, ids: &[String]) -> Result<u64> {
        replica::mark_clean(&self.pool, IdTable::Albums, ids).await
    }

    async fn purge_acknowledged_tombstones(&self) -> Result<u64> {
        replica::purge_acknowledged_tombstones(&self.pool, IdTable::Albums.name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::SyncFields;
    use crate::repositories::{SongRepository, SqliteSongRepository};

    async fn setup() -> (SqliteAlbumRepository, SqliteSongRepository) {
        let pool = create_test_pool().await.unwrap();
        (
            SqliteAlbumRepository::new(pool.clone()),
            SqliteSongRepository::new(pool),
        )
    }

    fn album_song(id: &str, album_id: &str, created_at: i64, track: i32) -> Song {
        let mut song = Song::new(id)
            .with_id(id)
            .with_album(album_id)
            .with_created_at(created_at);
        song.track_number = Some(track);
        song.duration_ms = 1_000;
        song.sync = SyncFields::remote(created_at);
        song
    }

    #[tokio::test]
    async fn test_insert_find_and_query() {
        let (albums, _) = setup().await;
        albums.insert(&Album::new("Zeta", None)).await.unwrap();
        albums.insert(&Album::new("alpha", None)).await.unwrap();

        let page = albums.query(PageRequest::default()).await.unwrap();
        let names: Vec<_> = page.items.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta"]);
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_deleted_album_is_not_found() {
        let (albums, _) = setup().await;
        let album = Album::new("Gone", None);
        albums.insert(&album).await.unwrap();
        albums.delete(&album.id).await.unwrap();

        assert!(albums.find_by_id(&album.id).await.unwrap().is_none());
        assert!(albums.summary(&album.id).await.unwrap_err().is_not_found());
        assert!(albums.update(&album).await.unwrap_err().is_not_found());
        assert!(albums.delete(&album.id).await.unwrap_err().is_not_found());
        assert_eq!(albums.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_summary_recomputes_over_visible_songs() {
        let (albums, songs) = setup().await;
        let album = Album::new("Blue", None);
        albums.insert(&album).await.unwrap();

        songs.insert(&album_song("S1", &album.id, 100, 2)).await.unwrap();
        songs.insert(&album_song("S2", &album.id, 200, 1)).await.unwrap();
        songs.insert(&album_song("S3", &album.id, 300, 3)).await.unwrap();

        let summary = albums.summary(&album.id).await.unwrap();
        assert_eq!(summary.song_count, 3);
        assert_eq!(summary.cover_url.as_deref(), Some("/media/S3/cover"));
        assert_eq!(summary.first_playable_song_id.as_deref(), Some("S2"));

        songs.delete("S3").await.unwrap();
        songs.delete("S2").await.unwrap();

        let summary = albums.summary(&album.id).await.unwrap();
        assert_eq!(summary.song_count, 1);
        assert_eq!(summary.total_duration_ms, 1_000);
        assert_eq!(summary.cover_url.as_deref(), Some("/media/S1/cover"));
        assert_eq!(summary.first_playable_song_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_summary_of_empty_album() {
        let (albums, _) = setup().await;
        let album = Album::new("Empty", None);
        albums.insert(&album).await.unwrap();

        let summary = albums.summary(&album.id).await.unwrap();
        assert_eq!(summary.song_count, 0);
        assert!(summary.cover_url.is_none());
        assert!(summary.first_playable_song_id.is_none());
    }

    #[tokio::test]
    async fn test_apply_remote_tombstone_hides_album() {
        let (albums, _) = setup().await;
        let mut album = Album::new("Remote", None);
        album.sync = SyncFields::remote(10);
        assert_eq!(
            albums.apply_remote(&album).await.unwrap(),
            ApplyOutcome::Inserted
        );

        album.sync = SyncFields::remote_tombstone(20);
        assert_eq!(
            albums.apply_remote(&album).await.unwrap(),
            ApplyOutcome::Updated
        );
        assert!(albums.find_by_id(&album.id).await.unwrap().is_none());
        assert!(albums.list_dirty().await.unwrap().is_empty());
        assert_eq!(albums.purge_acknowledged_tombstones().await.unwrap(), 1);
    }
}

//! Cache status projection of the songs table
//!
//! Writes enforce the cache state machine in SQL: a transition only applies
//! when the current row is in an allowed source state, so replayed or
//! out-of-order messages cannot move a song backwards. Rows are never
//! created here; a song missing from the replica stays missing.

use crate::error::Result;
use crate::models::{CacheState, CacheStatusRecord};
use crate::sync_filter::VISIBLE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, SqlitePool};
use tracing::debug;

/// Visible-library cache coverage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheCoverage {
    pub total: u64,
    pub cached: u64,
}

impl CacheCoverage {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.cached as f64 / self.total as f64) * 100.0
        }
    }
}

#[async_trait]
pub trait CacheStatusRepository: Send + Sync {
    /// Status of a visible song
    async fn get(&self, song_id: &str) -> Result<Option<CacheStatusRecord>>;

    /// Record a queued download.
    ///
    /// # Returns
    /// `Ok(true)` when the row moved to pending. A row already in the target
    /// state with the same size is left untouched, `checked_at` included, and
    /// reports `Ok(false)`; the same holds for every `mark_*` method.
    async fn mark_pending(&self, song_id: &str, checked_at: i64) -> Result<bool>;

    async fn mark_cached(&self, song_id: &str, size_bytes: u64, checked_at: i64) -> Result<bool>;

    async fn mark_not_cached(&self, song_id: &str, checked_at: i64) -> Result<bool>;

    async fn mark_error(&self, song_id: &str, checked_at: i64) -> Result<bool>;

    /// Reset every row to not cached, returning the number of rows changed.
    async fn reset_all(&self, checked_at: i64) -> Result<u64>;

    /// Visible songs in a given state, oldest first
    async fn list_by_state(&self, state: CacheState) -> Result<Vec<CacheStatusRecord>>;

    /// Visible songs whose blob is neither stored nor on its way
    async fn list_uncached(&self) -> Result<Vec<CacheStatusRecord>>;

    async fn coverage(&self) -> Result<CacheCoverage>;
}

pub struct SqliteCacheStatusRepository {
    pool: SqlitePool,
}

impl SqliteCacheStatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn transition(
        &self,
        song_id: &str,
        next: CacheState,
        size_bytes: Option<i64>,
        checked_at: i64,
    ) -> Result<bool> {
        let sources = CacheState::sources_of(next);
        let placeholders = vec!["?"; sources.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE songs
            SET cache_state = ?, cache_size_bytes = ?, cache_checked_at = ?
            WHERE id = ? AND {VISIBLE} AND cache_state IN ({placeholders})
              AND NOT (cache_state = ? AND cache_size_bytes IS ?)
            "#
        );

        let mut statement = query(&sql)
            .bind(next.as_str())
            .bind(size_bytes)
            .bind(checked_at)
            .bind(song_id);
        for source in &sources {
            statement = statement.bind(source.as_str());
        }
        statement = statement.bind(next.as_str()).bind(size_bytes);

        let applied = statement.execute(&self.pool).await?.rows_affected() > 0;
        debug!(song_id, state = %next, applied, "Cache status transition");
        Ok(applied)
    }

    async fn select(&self, filter: &str, bind: Option<&str>) -> Result<Vec<CacheStatusRecord>> {
        let sql = format!(
            r#"
            SELECT id, stream_url, cache_state, cache_size_bytes, cache_checked_at
            FROM songs WHERE {VISIBLE} AND {filter}
            ORDER BY created_at ASC, id ASC
            "#
        );
        let mut statement = query_as::<_, CacheStatusRecord>(&sql);
        if let Some(value) = bind {
            statement = statement.bind(value);
        }
        Ok(statement.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl CacheStatusRepository for SqliteCacheStatusRepository {
    async fn get(&self, song_id: &str) -> Result<Option<CacheStatusRecord>> {
        let mut records = self.select("id = ?", Some(song_id)).await?;
        Ok(records.pop())
    }

    async fn mark_pending(&self, song_id: &str, checked_at: i64) -> Result<bool> {
        self.transition(song_id, CacheState::Pending, None, checked_at)
            .await
    }

    async fn mark_cached(&self, song_id: &str, size_bytes: u64, checked_at: i64) -> Result<bool> {
        let size = i64::try_from(size_bytes).unwrap_or(i64::MAX);
        self.transition(song_id, CacheState::Cached, Some(size), checked_at)
            .await
    }

    async fn mark_not_cached(&self, song_id: &str, checked_at: i64) -> Result<bool> {
        self.transition(song_id, CacheState::NotCached, None, checked_at)
            .await
    }

    async fn mark_error(&self, song_id: &str, checked_at: i64) -> Result<bool> {
        self.transition(song_id, CacheState::Error, None, checked_at)
            .await
    }

    async fn reset_all(&self, checked_at: i64) -> Result<u64> {
        let result = query(
            r#"
            UPDATE songs
            SET cache_state = 'not_cached', cache_size_bytes = NULL, cache_checked_at = ?
            WHERE cache_state != 'not_cached'
            "#,
        )
        .bind(checked_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_state(&self, state: CacheState) -> Result<Vec<CacheStatusRecord>> {
        self.select("cache_state = ?", Some(state.as_str())).await
    }

    async fn list_uncached(&self) -> Result<Vec<CacheStatusRecord>> {
        self.select("cache_state IN ('not_cached', 'error')", None)
            .await
    }

    async fn coverage(&self) -> Result<CacheCoverage> {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(cache_state = 'cached'), 0) FROM songs WHERE {VISIBLE}"
        );
        let (total, cached): (i64, i64) = query_as(&sql).fetch_one(&self.pool).await?;
        Ok(CacheCoverage {
            total: total.max(0) as u64,
            cached: cached.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Song, SyncFields};
    use crate::repositories::{SongRepository, SqliteSongRepository};

    async fn setup(ids: &[&str]) -> (SqliteCacheStatusRepository, SqliteSongRepository) {
        let pool = create_test_pool().await.unwrap();
        let songs = SqliteSongRepository::new(pool.clone());
        for (i, id) in ids.iter().enumerate() {
            let mut song = Song::new(*id).with_id(*id).with_created_at(i as i64);
            song.sync = SyncFields::remote(1);
            songs.insert(&song).await.unwrap();
        }
        (SqliteCacheStatusRepository::new(pool), songs)
    }

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let (repo, _) = setup(&["s1"]).await;

        assert!(repo.mark_pending("s1", 1).await.unwrap());
        assert!(repo.mark_cached("s1", 500, 2).await.unwrap());

        let record = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(record.state, CacheState::Cached);
        assert_eq!(record.size_bytes, Some(500));
        assert_eq!(record.checked_at, Some(2));
        assert_eq!(record.stream_url, "/media/s1/stream");
    }

    #[tokio::test]
    async fn test_cached_cannot_go_back_to_pending_or_error() {
        let (repo, _) = setup(&["s1"]).await;
        repo.mark_cached("s1", 10, 1).await.unwrap();

        assert!(!repo.mark_pending("s1", 2).await.unwrap());
        assert!(!repo.mark_error("s1", 2).await.unwrap());
        assert_eq!(
            repo.get("s1").await.unwrap().unwrap().state,
            CacheState::Cached
        );

        assert!(repo.mark_not_cached("s1", 3).await.unwrap());
        let record = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(record.state, CacheState::NotCached);
        assert_eq!(record.size_bytes, None);
    }

    #[tokio::test]
    async fn test_replaying_cached_is_idempotent() {
        let (repo, _) = setup(&["s1"]).await;
        repo.mark_cached("s1", 42, 7).await.unwrap();
        let once = repo.get("s1").await.unwrap();
        repo.mark_cached("s1", 42, 7).await.unwrap();
        assert_eq!(repo.get("s1").await.unwrap(), once);
    }

    #[tokio::test]
    async fn test_unchanged_replay_keeps_checked_at() {
        let (repo, _) = setup(&["s1"]).await;
        assert!(repo.mark_cached("s1", 42, 7).await.unwrap());

        assert!(!repo.mark_cached("s1", 42, 90).await.unwrap());
        let record = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(record.checked_at, Some(7));

        assert!(repo.mark_cached("s1", 64, 95).await.unwrap());
        let record = repo.get("s1").await.unwrap().unwrap();
        assert_eq!(record.size_bytes, Some(64));
        assert_eq!(record.checked_at, Some(95));

        assert!(repo.mark_not_cached("s1", 100).await.unwrap());
        assert!(!repo.mark_not_cached("s1", 120).await.unwrap());
        assert_eq!(repo.get("s1").await.unwrap().unwrap().checked_at, Some(100));
    }

    #[tokio::test]
    async fn test_unknown_and_tombstoned_songs_are_not_fabricated() {
        let (repo, songs) = setup(&["s1"]).await;
        assert!(!repo.mark_cached("ghost", 1, 1).await.unwrap());
        assert!(repo.get("ghost").await.unwrap().is_none());

        songs.delete("s1").await.unwrap();
        assert!(!repo.mark_cached("s1", 1, 1).await.unwrap());
        assert!(repo.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_coverage_and_reset() {
        let (repo, songs) = setup(&["a", "b", "c", "d"]).await;
        repo.mark_cached("a", 1, 1).await.unwrap();
        repo.mark_cached("b", 1, 1).await.unwrap();
        repo.mark_cached("d", 1, 1).await.unwrap();
        songs.delete("d").await.unwrap();

        let coverage = repo.coverage().await.unwrap();
        assert_eq!(coverage, CacheCoverage { total: 3, cached: 2 });
        assert!((coverage.percentage() - 66.666).abs() < 0.01);

        let uncached: Vec<_> = repo
            .list_uncached()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.song_id)
            .collect();
        assert_eq!(uncached, vec!["c"]);

        assert_eq!(repo.reset_all(9).await.unwrap(), 3);
        assert_eq!(repo.coverage().await.unwrap().cached, 0);
        assert!(repo.list_by_state(CacheState::Cached).await.unwrap().is_empty());
    }

    #[test]
    fn test_empty_coverage_percentage() {
        assert_eq!(CacheCoverage { total: 0, cached: 0 }.percentage(), 0.0);
    }
}

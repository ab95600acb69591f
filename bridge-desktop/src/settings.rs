//! Settings storage in a small SQLite database

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// [`SettingsStore`] over a single `settings(key, value, updated_at)` table.
///
/// Cache policy, queue snapshot and resume position each live under one key
/// as a JSON string; a write replaces the whole value.
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // SQLite URLs want forward slashes on every platform
        let db_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(Self::db_error)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(Self::db_error)?;

        Self::create_schema(&pool).await?;
        debug!(path = ?db_path, "Initialized settings store");
        Ok(Self { pool })
    }

    /// Single-connection in-memory store; the database lives as long as the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(Self::db_error)?;

        Self::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(Self::db_error)?;
        Ok(())
    }

    fn db_error(e: sqlx::Error) -> BridgeError {
        BridgeError::DatabaseError(e.to_string())
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, strftime('%s', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(Self::db_error)?;

        debug!(key, bytes = value.len(), "Stored setting");
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::db_error)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Self::db_error)?;

        debug!(key, "Deleted setting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_overwrite_and_delete() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        assert_eq!(store.get_string("queue.snapshot").await.unwrap(), None);

        store.set_string("queue.snapshot", "{}").await.unwrap();
        store
            .set_string("queue.snapshot", "{\"entries\":[]}")
            .await
            .unwrap();
        assert_eq!(
            store.get_string("queue.snapshot").await.unwrap().as_deref(),
            Some("{\"entries\":[]}")
        );

        store.delete("queue.snapshot").await.unwrap();
        assert_eq!(store.get_string("queue.snapshot").await.unwrap(), None);
        store.delete("queue.snapshot").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.db");

        let store = SqliteSettingsStore::new(path.clone()).await.unwrap();
        store.set_string("playback.position", "{\"position_ms\":42}").await.unwrap();
        drop(store);

        let reopened = SqliteSettingsStore::new(path).await.unwrap();
        assert_eq!(
            reopened.get_string("playback.position").await.unwrap().as_deref(),
            Some("{\"position_ms\":42}")
        );
    }
}

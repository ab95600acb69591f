//! Shared replica bookkeeping: last-write-wins resolution and push-cycle SQL.

use crate::error::Result;
use crate::models::SyncFields;
use sqlx::{query, query_as, SqlitePool};
use tracing::debug;

/// How a server record relates to the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Insert,
    Overwrite,
    KeepLocal,
}

/// Last-write-wins: a dirty local copy strictly newer than the remote one
/// survives, anything else is overwritten.
pub(crate) fn resolve(local: Option<&SyncFields>, remote: &SyncFields) -> Resolution {
    match local {
        None => Resolution::Insert,
        Some(local) if local.is_dirty && local.last_modified_at > remote.last_modified_at => {
            Resolution::KeepLocal
        }
        Some(_) => Resolution::Overwrite,
    }
}

/// Replica tables keyed by a single `id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdTable {
    Songs,
    Albums,
    Playlists,
}

impl IdTable {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            IdTable::Songs => "songs",
            IdTable::Albums => "albums",
            IdTable::Playlists => "playlists",
        }
    }
}

/// Raw sync fields of a row, tombstones included.
pub(crate) async fn sync_fields(
    pool: &SqlitePool,
    table: IdTable,
    id: &str,
) -> Result<Option<SyncFields>> {
    let sql = format!(
        "SELECT _is_dirty, _is_deleted, _is_local_only, _last_modified_at FROM {} WHERE id = ?",
        table.name()
    );
    let fields = query_as::<_, SyncFields>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(fields)
}

/// Clear the dirty and local-only flags after the server acknowledged a push.
pub(crate) async fn mark_clean(pool: &SqlitePool, table: IdTable, ids: &[String]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE {} SET _is_dirty = 0, _is_local_only = 0 WHERE id = ?",
        table.name()
    );
    let mut tx = pool.begin().await?;
    let mut cleaned = 0;
    for id in ids {
        cleaned += query(&sql).bind(id).execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;

    debug!(table = table.name(), cleaned, "Marked records clean");
    Ok(cleaned)
}

/// Physically remove tombstones the server has already acknowledged.
pub(crate) async fn purge_acknowledged_tombstones(pool: &SqlitePool, table: &str) -> Result<u64> {
    let sql = format!("DELETE FROM {table} WHERE _is_deleted = 1 AND _is_dirty = 0");
    let purged = query(&sql).execute(pool).await?.rows_affected();
    if purged > 0 {
        debug!(table, purged, "Purged acknowledged tombstones");
    }
    Ok(purged)
}

//! # Tombstone Filtering
//!
//! Read-time visibility rules for the replica. A record whose `_is_deleted`
//! flag is set is hidden from every read handed to callers, whatever its
//! `_is_dirty` state, and singular lookups treat it exactly like a missing row.
//!
//! Repositories apply the rule in SQL through [`VISIBLE`] / [`visible`].
//! Derived aggregates (counts, covers, first playable song) are computed with
//! the helpers below, which walk candidates in their defined order and skip
//! tombstones instead of borrowing their data.

use crate::error::{LibraryError, Result};
use crate::models::{Album, Playlist, PlaylistSong, Song, SyncFields};

/// SQL predicate for unaliased single-table queries.
pub const VISIBLE: &str = "_is_deleted = 0";

/// SQL predicate qualified with a table alias.
pub fn visible(alias: &str) -> String {
    format!("{alias}._is_deleted = 0")
}

/// Records carrying sync-tracking fields.
pub trait SyncTracked {
    fn sync_fields(&self) -> &SyncFields;

    fn is_visible(&self) -> bool {
        !self.sync_fields().is_deleted
    }
}

impl SyncTracked for SyncFields {
    fn sync_fields(&self) -> &SyncFields {
        self
    }
}

macro_rules! sync_tracked {
    ($($ty:ty),*) => {
        $(impl SyncTracked for $ty {
            fn sync_fields(&self) -> &SyncFields {
                &self.sync
            }
        })*
    };
}

sync_tracked!(Song, Album, Playlist, PlaylistSong);

/// Drop tombstoned records, keeping order.
pub fn visible_only<T: SyncTracked>(records: Vec<T>) -> Vec<T> {
    records.into_iter().filter(|r| r.is_visible()).collect()
}

/// Turn a raw lookup into a visible record or the not-found error.
pub fn require_visible<T: SyncTracked>(record: Option<T>, entity_type: &str, id: &str) -> Result<T> {
    match record {
        Some(record) if record.is_visible() => Ok(record),
        _ => Err(LibraryError::not_found(entity_type, id)),
    }
}

/// Same as [`require_visible`] but as an option.
pub fn visible_or_none<T: SyncTracked>(record: Option<T>) -> Option<T> {
    record.filter(|r| r.is_visible())
}

/// First visible candidate in iteration order.
pub fn first_visible<'a, T, I>(ordered: I) -> Option<&'a T>
where
    T: SyncTracked + 'a,
    I: IntoIterator<Item = &'a T>,
{
    ordered.into_iter().find(|r| r.is_visible())
}

/// Walk candidates in order and return the first visible one that yields a
/// value. Tombstoned candidates never contribute, even when they carry data.
pub fn first_visible_value<'a, T, I, V, F>(ordered: I, mut value: F) -> Option<V>
where
    T: SyncTracked + 'a,
    I: IntoIterator<Item = &'a T>,
    F: FnMut(&'a T) -> Option<V>,
{
    ordered
        .into_iter()
        .filter(|r| r.is_visible())
        .find_map(|r| value(r))
}

pub fn count_visible<'a, T, I>(records: I) -> u32
where
    T: SyncTracked + 'a,
    I: IntoIterator<Item = &'a T>,
{
    records.into_iter().filter(|r| r.is_visible()).count() as u32
}

//! Domain models for the library replica
//!
//! Every replica record embeds [`SyncFields`]. Timestamps are unix milliseconds.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Current time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

// =============================================================================
// Sync tracking
// =============================================================================

/// Sync-tracking columns carried by every replica row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, FromRow)]
pub struct SyncFields {
    /// Local change not yet acknowledged by the server
    #[sqlx(rename = "_is_dirty")]
    #[serde(rename = "_isDirty")]
    pub is_dirty: bool,
    /// Tombstone
    #[sqlx(rename = "_is_deleted")]
    #[serde(rename = "_isDeleted")]
    pub is_deleted: bool,
    /// Created on this device and never pushed
    #[sqlx(rename = "_is_local_only")]
    #[serde(rename = "_isLocalOnly")]
    pub is_local_only: bool,
    #[sqlx(rename = "_last_modified_at")]
    #[serde(rename = "_lastModifiedAt")]
    pub last_modified_at: i64,
}

impl SyncFields {
    /// Fields for a record created locally and not yet pushed.
    pub fn local(now: i64) -> Self {
        Self {
            is_dirty: true,
            is_deleted: false,
            is_local_only: true,
            last_modified_at: now,
        }
    }

    /// Fields for a record as received from the server.
    pub fn remote(last_modified_at: i64) -> Self {
        Self {
            is_dirty: false,
            is_deleted: false,
            is_local_only: false,
            last_modified_at,
        }
    }

    /// Remote copy of a server-side deletion.
    pub fn remote_tombstone(last_modified_at: i64) -> Self {
        Self {
            is_deleted: true,
            ..Self::remote(last_modified_at)
        }
    }
}

// =============================================================================
// Cache status
// =============================================================================

/// Offline availability of a song's stream blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    #[default]
    NotCached,
    Pending,
    Cached,
    Error,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::NotCached => "not_cached",
            CacheState::Pending => "pending",
            CacheState::Cached => "cached",
            CacheState::Error => "error",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-applying the current state is always allowed so message replays are
    /// harmless. `NotCached -> Cached` covers a blob the proxy stored on its
    /// own during playback, which implies a pending step nobody recorded.
    pub fn can_transition_to(&self, next: CacheState) -> bool {
        use CacheState::*;
        if *self == next {
            return true;
        }
        matches!(
            (*self, next),
            (NotCached, Pending)
                | (NotCached, Cached)
                | (Pending, Cached)
                | (Pending, Error)
                | (Pending, NotCached)
                | (Cached, NotCached)
                | (Error, Pending)
                | (Error, Cached)
                | (Error, NotCached)
        )
    }

    /// Source states from which `next` is reachable.
    pub fn sources_of(next: CacheState) -> Vec<CacheState> {
        [
            CacheState::NotCached,
            CacheState::Pending,
            CacheState::Cached,
            CacheState::Error,
        ]
        .into_iter()
        .filter(|state| state.can_transition_to(next))
        .collect()
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CacheState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "not_cached" => Ok(CacheState::NotCached),
            "pending" => Ok(CacheState::Pending),
            "cached" => Ok(CacheState::Cached),
            "error" => Ok(CacheState::Error),
            other => Err(format!("unknown cache state '{other}'")),
        }
    }
}

/// Cache projection of a song row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusRecord {
    #[sqlx(rename = "id")]
    pub song_id: String,
    pub stream_url: String,
    #[sqlx(rename = "cache_state", try_from = "String")]
    pub state: CacheState,
    #[sqlx(rename = "cache_size_bytes")]
    pub size_bytes: Option<i64>,
    #[sqlx(rename = "cache_checked_at")]
    pub checked_at: Option<i64>,
}

impl CacheStatusRecord {
    pub fn is_cached(&self) -> bool {
        self.state == CacheState::Cached
    }
}

// =============================================================================
// Songs
// =============================================================================

/// A playable song as mirrored from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist_name: Option<String>,
    pub album_id: Option<String>,
    pub duration_ms: i64,
    pub track_number: Option<i32>,
    /// Media endpoint path, e.g. `/media/{id}/stream`
    pub stream_url: String,
    pub cover_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub cache_state: CacheState,
    pub cache_size_bytes: Option<i64>,
    pub cache_checked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sync: SyncFields,
}

impl Song {
    /// New local song with the conventional media endpoint paths.
    pub fn new(title: impl Into<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        Self {
            stream_url: format!("/media/{id}/stream"),
            cover_url: Some(format!("/media/{id}/cover")),
            id,
            title: title.into(),
            artist_name: None,
            album_id: None,
            duration_ms: 0,
            track_number: None,
            cache_state: CacheState::NotCached,
            cache_size_bytes: None,
            cache_checked_at: None,
            created_at: now,
            updated_at: now,
            sync: SyncFields::local(now),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.stream_url = format!("/media/{}/stream", self.id);
        self.cover_url = Some(format!("/media/{}/cover", self.id));
        self
    }

    pub fn with_album(mut self, album_id: impl Into<String>) -> Self {
        self.album_id = Some(album_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Song id cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Song title cannot be empty".to_string());
        }
        if self.stream_url.trim().is_empty() {
            return Err("Song stream url cannot be empty".to_string());
        }
        if self.duration_ms < 0 {
            return Err("Duration must be non-negative".to_string());
        }
        Ok(())
    }

    /// The cache projection of this row.
    pub fn cache_status(&self) -> CacheStatusRecord {
        CacheStatusRecord {
            song_id: self.id.clone(),
            stream_url: self.stream_url.clone(),
            state: self.cache_state,
            size_bytes: self.cache_size_bytes,
            checked_at: self.cache_checked_at,
        }
    }
}

// =============================================================================
// Albums
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub artist_name: Option<String>,
    pub year: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sync: SyncFields,
}

impl Album {
    pub fn new(name: impl Into<String>, artist_name: Option<String>) -> Self {
        let name = name.into();
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            normalized_name: normalize(&name),
            name,
            artist_name,
            year: None,
            created_at: now,
            updated_at: now,
            sync: SyncFields::local(now),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Album name cannot be empty".to_string());
        }
        if let Some(year) = self.year {
            if !(1000..=9999).contains(&year) {
                return Err(format!("Invalid year: {year}"));
            }
        }
        Ok(())
    }
}

/// Album aggregates recomputed over visible songs only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub album: Album,
    pub song_count: u32,
    pub total_duration_ms: i64,
    /// Cover of the most recently created visible song
    pub cover_url: Option<String>,
    /// First visible song in track order
    pub first_playable_song_id: Option<String>,
}

// =============================================================================
// Playlists
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sync: SyncFields,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            normalized_name: normalize(&name),
            name,
            description: None,
            created_at: now,
            updated_at: now,
            sync: SyncFields::local(now),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Playlist name cannot be empty".to_string());
        }
        if self.name.len() > 200 {
            return Err("Playlist name too long".to_string());
        }
        Ok(())
    }
}

/// Membership of a song in a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlaylistSong {
    pub playlist_id: String,
    pub song_id: String,
    pub position: i64,
    pub added_at: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub sync: SyncFields,
}

/// Playlist aggregates recomputed over visible memberships of visible songs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub playlist: Playlist,
    pub song_count: u32,
    pub total_duration_ms: i64,
    /// Cover of the most recently added visible song
    pub cover_url: Option<String>,
    /// First visible song in playlist order
    pub first_playable_song_id: Option<String>,
}

/// Result of applying a server record to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    /// The local copy has unpushed changes newer than the remote copy
    SkippedLocalNewer,
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self, ApplyOutcome::SkippedLocalNewer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_state_transitions() {
        use CacheState::*;
        assert!(NotCached.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Cached));
        assert!(Pending.can_transition_to(Error));
        assert!(Cached.can_transition_to(NotCached));
        assert!(Cached.can_transition_to(Cached));

        assert!(!Cached.can_transition_to(Pending));
        assert!(!Cached.can_transition_to(Error));
        assert!(!NotCached.can_transition_to(Error));
    }

    #[test]
    fn test_cache_state_sources() {
        let sources = CacheState::sources_of(CacheState::Error);
        assert_eq!(sources, vec![CacheState::Pending, CacheState::Error]);
    }

    #[test]
    fn test_cache_state_string_roundtrip() {
        for state in [
            CacheState::NotCached,
            CacheState::Pending,
            CacheState::Cached,
            CacheState::Error,
        ] {
            assert_eq!(CacheState::try_from(state.as_str().to_string()), Ok(state));
        }
        assert!(CacheState::try_from("bogus".to_string()).is_err());
    }

    #[test]
    fn test_song_defaults() {
        let song = Song::new("Intro").with_id("s1");
        assert_eq!(song.stream_url, "/media/s1/stream");
        assert_eq!(song.cover_url.as_deref(), Some("/media/s1/cover"));
        assert!(song.sync.is_local_only);
        assert!(song.sync.is_dirty);
        assert!(song.validate().is_ok());
    }

    #[test]
    fn test_song_validation() {
        let mut song = Song::new("Intro");
        song.title = "  ".to_string();
        assert!(song.validate().is_err());

        let mut song = Song::new("Intro");
        song.duration_ms = -1;
        assert!(song.validate().is_err());
    }

    #[test]
    fn test_album_validation() {
        let mut album = Album::new("Blue", None);
        assert_eq!(album.normalized_name, "blue");
        album.year = Some(12);
        assert!(album.validate().is_err());
    }

    #[test]
    fn test_sync_fields_serialize_with_underscore_names() {
        let song = Song::new("Intro");
        let json = serde_json::to_value(&song).unwrap();
        assert_eq!(json["_isDeleted"], serde_json::Value::Bool(false));
        assert_eq!(json["_isLocalOnly"], serde_json::Value::Bool(true));
        assert_eq!(json["cache_state"], "not_cached");
    }
}

//! Replica and cache fixtures shared by unit tests.

use crate::cache_bridge::CacheSyncBridge;
use crate::deletion::DeletionCascade;
use crate::replica::ReplicaSync;
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::BlobStore;
use bridge_traits::time::ManualClock;
use bytes::Bytes;
use core_library::db::create_test_pool;
use core_library::models::{Song, SyncFields};
use core_library::repositories::{
    SongRepository, SqliteAlbumRepository, SqliteCacheStatusRepository,
    SqlitePlaylistRepository, SqliteSongRepository,
};
use core_playback::cache::{CacheConfig, CacheValidator};
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryBlobs {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobs {
    pub fn insert(&self, key: &str, body: &'static [u8]) {
        self.blobs
            .lock()
            .insert(key.to_string(), Bytes::from_static(body));
    }

    pub fn remove(&self, key: &str) {
        self.blobs.lock().remove(key);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn exists(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.blobs.lock().contains_key(key))
    }
    async fn get(&self, key: &str) -> BridgeResult<Option<Bytes>> {
        Ok(self.blobs.lock().get(key).cloned())
    }
    async fn put(&self, key: &str, body: Bytes) -> BridgeResult<()> {
        self.blobs.lock().insert(key.to_string(), body);
        Ok(())
    }
    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }
    async fn keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.blobs.lock().keys().cloned().collect())
    }
}

pub struct Fixture {
    pub songs: Arc<SqliteSongRepository>,
    pub albums: Arc<SqliteAlbumRepository>,
    pub playlists: Arc<SqlitePlaylistRepository>,
    pub statuses: Arc<SqliteCacheStatusRepository>,
    pub blobs: Arc<MemoryBlobs>,
    pub validator: Arc<CacheValidator>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
}

impl Fixture {
    pub async fn new() -> Self {
        let pool = create_test_pool().await.unwrap();
        let statuses = Arc::new(SqliteCacheStatusRepository::new(pool.clone()));
        let blobs = Arc::new(MemoryBlobs::default());
        let clock = Arc::new(ManualClock::default());
        let validator = Arc::new(CacheValidator::new(
            blobs.clone(),
            statuses.clone(),
            clock.clone(),
            &CacheConfig::default(),
        ));
        Self {
            songs: Arc::new(SqliteSongRepository::new(pool.clone())),
            albums: Arc::new(SqliteAlbumRepository::new(pool.clone())),
            playlists: Arc::new(SqlitePlaylistRepository::new(pool)),
            statuses,
            blobs,
            validator,
            clock,
            events: EventBus::new(64),
        }
    }

    pub fn bridge(&self) -> CacheSyncBridge {
        CacheSyncBridge::new(
            self.statuses.clone(),
            self.validator.clone(),
            self.clock.clone(),
            self.events.clone(),
        )
    }

    pub fn cascade(&self) -> DeletionCascade {
        DeletionCascade::new(
            self.songs.clone(),
            self.statuses.clone(),
            self.validator.clone(),
            self.clock.clone(),
            self.events.clone(),
        )
    }

    pub fn replica(&self) -> ReplicaSync {
        ReplicaSync::new(
            self.songs.clone(),
            self.albums.clone(),
            self.playlists.clone(),
            self.validator.clone(),
            self.events.clone(),
        )
    }
}

/// Insert a song as if it had been pulled from the server.
pub async fn seed_song(songs: &SqliteSongRepository, id: &str) -> Song {
    let mut song = Song::new(format!("Song {id}")).with_id(id);
    song.sync = SyncFields::remote(1);
    songs.insert(&song).await.unwrap();
    song
}

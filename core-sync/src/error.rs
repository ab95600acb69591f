use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl SyncError {
    /// True when the target record does not exist or is tombstoned.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Library(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

//! Blob keys for media requests
//!
//! A key is the request path with scheme, host, port, query and fragment
//! removed, so `http://localhost:5173/media/a/stream` and
//! `https://music.example.com/media/a/stream?t=1` share one cache entry.

use std::fmt;

/// The two resources served under `/media/{id}/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Stream,
    Cover,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Stream => "stream",
            MediaKind::Cover => "cover",
        }
    }

    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "stream" => Some(MediaKind::Stream),
            "cover" => Some(MediaKind::Cover),
            _ => None,
        }
    }

    /// Content type used when serving from the blob store.
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Stream => "audio/mpeg",
            MediaKind::Cover => "image/jpeg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `/media/{id}/{kind}` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaPath {
    pub song_id: String,
    pub kind: MediaKind,
}

impl MediaPath {
    pub fn new(song_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            song_id: song_id.into(),
            kind,
        }
    }

    pub fn parse(url: &str) -> Option<Self> {
        let key = cache_key(url);
        let mut segments = key.trim_start_matches('/').split('/');
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some("media"), Some(id), Some(kind), None) if !id.is_empty() => {
                MediaKind::parse(kind).map(|kind| Self::new(id, kind))
            }
            _ => None,
        }
    }

    pub fn key(&self) -> String {
        format!("/media/{}/{}", self.song_id, self.kind)
    }
}

/// Normalize an absolute URL or bare path to its blob key.
pub fn cache_key(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();

    let path = match without_query.find("://") {
        Some(scheme_end) => {
            let after_scheme = &without_query[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(path_start) => &after_scheme[path_start..],
                None => "/",
            }
        }
        None => without_query,
    };

    let mut key = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        key.push('/');
        key.push_str(segment);
    }
    if key.is_empty() {
        key.push('/');
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_and_port_are_stripped() {
        assert_eq!(
            cache_key("http://localhost:5173/media/a1/stream"),
            "/media/a1/stream"
        );
        assert_eq!(
            cache_key("https://music.example.com/media/a1/stream?token=x#t=3"),
            "/media/a1/stream"
        );
        assert_eq!(cache_key("/media/a1/stream"), "/media/a1/stream");
        assert_eq!(cache_key("media//a1/stream/"), "/media/a1/stream");
        assert_eq!(cache_key("https://example.com"), "/");
    }

    #[test]
    fn test_media_path_parse() {
        let path = MediaPath::parse("http://127.0.0.1:8080/media/song-9/cover").unwrap();
        assert_eq!(path.song_id, "song-9");
        assert_eq!(path.kind, MediaKind::Cover);
        assert_eq!(path.key(), "/media/song-9/cover");

        assert!(MediaPath::parse("/media/song-9/lyrics").is_none());
        assert!(MediaPath::parse("/api/songs").is_none());
        assert!(MediaPath::parse("/media/song-9/stream/extra").is_none());
    }
}

//! HTTP byte-range slicing for cached blobs
//!
//! Accepted forms: `bytes=a-b`, `bytes=a-` and the suffix form `bytes=-n`.
//! Multi-range requests and anything unparsable are unsatisfiable.

use bridge_traits::http::HttpResponse;
use bytes::Bytes;

pub const ACCEPT_RANGES: &str = "Accept-Ranges";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const CONTENT_TYPE: &str = "Content-Type";

/// Inclusive byte range within a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered, never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Header is not a single `bytes=` range.
    Malformed,
    /// Range lies outside the blob.
    Unsatisfiable,
}

/// Parse a `Range` header against a blob of `total` bytes.
pub fn parse_range(header: &str, total: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?
        .trim();
    if spec.contains(',') {
        return Err(RangeError::Malformed);
    }
    let (first, last) = spec.split_once('-').ok_or(RangeError::Malformed)?;
    let (first, last) = (first.trim(), last.trim());

    let parse = |s: &str| s.parse::<u64>().map_err(|_| RangeError::Malformed);

    let range = match (first.is_empty(), last.is_empty()) {
        (true, true) => return Err(RangeError::Malformed),
        // Suffix: last n bytes
        (true, false) => {
            let suffix = parse(last)?;
            if suffix == 0 || total == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            ByteRange {
                start: total.saturating_sub(suffix),
                end: total - 1,
            }
        }
        (false, true) => {
            let start = parse(first)?;
            if total == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            ByteRange {
                start,
                end: total - 1,
            }
        }
        (false, false) => ByteRange {
            start: parse(first)?,
            end: parse(last)?,
        },
    };

    if range.start >= total || range.end >= total || range.start > range.end {
        return Err(RangeError::Unsatisfiable);
    }
    Ok(range)
}

/// Build the response for a cached blob, honoring an optional `Range` header.
pub fn respond(body: Bytes, range_header: Option<&str>, content_type: &str) -> HttpResponse {
    let total = body.len() as u64;

    let Some(header) = range_header else {
        return HttpResponse::new(200)
            .with_header(CONTENT_TYPE, content_type)
            .with_header(ACCEPT_RANGES, "bytes")
            .with_header(CONTENT_LENGTH, total.to_string())
            .with_body(body);
    };

    match parse_range(header, total) {
        Ok(range) => {
            // Bounds checked by parse_range against body.len()
            let slice = body.slice(range.start as usize..=range.end as usize);
            HttpResponse::new(206)
                .with_header(CONTENT_TYPE, content_type)
                .with_header(ACCEPT_RANGES, "bytes")
                .with_header(CONTENT_RANGE, range.content_range(total))
                .with_header(CONTENT_LENGTH, range.length().to_string())
                .with_body(slice)
        }
        Err(_) => unsatisfiable(total),
    }
}

pub fn unsatisfiable(total: u64) -> HttpResponse {
    HttpResponse::new(416)
        .with_header(CONTENT_RANGE, format!("bytes */{total}"))
        .with_header(ACCEPT_RANGES, "bytes")
}

//! URI resolution and the fetch boundary.
//!
//! Format loaders never open sockets or files themselves; they call through
//! a [`Fetcher`] so tests can substitute an in-memory stub (grounded on the
//! teacher's own split between `SlidePool` disk access and the scheduler
//! logic that calls it).

use std::sync::Arc;

use url::Url;

use crate::error::{IoError, TileStreamError, TileStreamResult};

/// Resolves a content-relative URI string against its tileset's base URI,
/// per RFC 3986. Relative strings without a scheme resolve against `base`;
/// absolute strings (carrying their own scheme) pass through unchanged.
pub fn resolve_uri(base: &Url, relative: &str) -> TileStreamResult<Url> {
    base.join(relative).map_err(|e| {
        TileStreamError::Format(crate::error::FormatError::MalformedBoundingVolume(format!(
            "could not resolve uri {relative:?} against base {base}: {e}"
        )))
    })
}

/// Boundary trait for retrieving bytes for a resolved URI. Implemented by the
/// embedding application (HTTP client, filesystem, packed archive reader);
/// this crate only ever calls through it.
pub trait Fetcher: Send + Sync {
    fn fetch_bytes(&self, uri: &Url) -> TileStreamResult<bytes::Bytes>;

    fn fetch_text(&self, uri: &Url) -> TileStreamResult<String> {
        let bytes = self.fetch_bytes(uri)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            TileStreamError::Io(IoError::Status {
                status: "invalid-utf8".into(),
                message: e.to_string(),
            })
        })
    }
}

pub type SharedFetcher = Arc<dyn Fetcher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_uri_resolves_against_base() {
        let base = Url::parse("https://example.com/tilesets/root.json").unwrap();
        let resolved = resolve_uri(&base, "../content/tile_0.b3dm").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/content/tile_0.b3dm");
    }

    #[test]
    fn absolute_uri_passes_through() {
        let base = Url::parse("https://example.com/tilesets/root.json").unwrap();
        let resolved = resolve_uri(&base, "https://other.example.com/x.b3dm").unwrap();
        assert_eq!(resolved.as_str(), "https://other.example.com/x.b3dm");
    }
}

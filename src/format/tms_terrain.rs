//! TMS terrain tile loader.
//!
//! 16-byte header, little-endian, validated the same way as the b3dm header:
//!
//! ```text
//! magic           4 bytes  b"TTN\0"
//! byteLength      u32      total length incl. header
//! tileType        u32      opaque to this crate; passed through
//! majorVersion    u16
//! minorVersion    u16
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::bvh::node::{NodeContent, NodeContentPayload};
use crate::content_type::ContentType;
use crate::error::{FormatError, TileStreamError, TileStreamResult};
use crate::fetch::SharedFetcher;
use crate::load_handle::LoadHandle;

use super::{FormatLoader, LoadedPayload};

pub const CONTENT_TYPE: ContentType = ContentType::reserved(3);

const MAGIC: &[u8; 4] = b"TTN\0";
const HEADER_LEN: usize = 16;

fn parse(buf: &[u8]) -> TileStreamResult<LoadedPayload> {
    if buf.len() < HEADER_LEN {
        return Err(FormatError::InconsistentLength {
            claimed: HEADER_LEN,
            actual: buf.len(),
        }
        .into());
    }
    if &buf[0..4] != MAGIC {
        return Err(FormatError::BadMagic {
            expected: MAGIC.to_vec(),
            found: buf[0..4].to_vec(),
        }
        .into());
    }

    let byte_length = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
    if byte_length != buf.len() {
        return Err(FormatError::InconsistentLength {
            claimed: byte_length,
            actual: buf.len(),
        }
        .into());
    }
    let major_version = u16::from_le_bytes(buf[12..14].try_into().unwrap());
    let minor_version = u16::from_le_bytes(buf[14..16].try_into().unwrap());
    if major_version != 1 {
        return Err(FormatError::UnsupportedVersion(major_version as u32).into());
    }

    Ok(LoadedPayload::Terrain {
        body: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        major_version,
        minor_version,
    })
}

pub struct TmsTerrainLoader {
    fetcher: SharedFetcher,
}

impl TmsTerrainLoader {
    pub fn new(fetcher: SharedFetcher) -> Arc<Self> {
        Arc::new(Self { fetcher })
    }
}

impl FormatLoader for TmsTerrainLoader {
    fn load(&self, content: &NodeContent, _fetcher: &SharedFetcher) -> LoadHandle<LoadedPayload> {
        let fetcher = self.fetcher.clone();
        match &content.payload {
            NodeContentPayload::Inline(bytes) => {
                let bytes = bytes.clone();
                LoadHandle::spawn(move || parse(&bytes))
            }
            NodeContentPayload::Uris(uris) => {
                let uri = uris.first().cloned();
                LoadHandle::spawn(move || {
                    let uri_str = uri.ok_or_else(|| {
                        TileStreamError::from(FormatError::MalformedBoundingVolume(
                            "terrain content had no uri".into(),
                        ))
                    })?;
                    let url = url::Url::parse(&uri_str).map_err(|e| {
                        TileStreamError::from(FormatError::MalformedBoundingVolume(format!(
                            "invalid terrain uri {uri_str:?}: {e}"
                        )))
                    })?;
                    let bytes = fetcher.fetch_bytes(&url)?;
                    parse(&bytes)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_terrain() -> Vec<u8> {
        let body = b"heightmap-bytes";
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&((HEADER_LEN + body.len()) as u32).to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn parses_valid_header() {
        let buf = sample_terrain();
        match parse(&buf).unwrap() {
            LoadedPayload::Terrain {
                body,
                major_version,
                minor_version,
            } => {
                assert_eq!(&body[..], b"heightmap-bytes");
                assert_eq!(major_version, 1);
                assert_eq!(minor_version, 0);
            }
            _ => panic!("expected Terrain payload"),
        }
    }

    #[test]
    fn rejects_unsupported_major_version() {
        let mut buf = sample_terrain();
        buf[12] = 2;
        assert!(matches!(
            parse(&buf),
            Err(TileStreamError::Format(FormatError::UnsupportedVersion(2)))
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let buf = vec![0u8; 10];
        assert!(matches!(
            parse(&buf),
            Err(TileStreamError::Format(FormatError::InconsistentLength { .. }))
        ));
    }
}

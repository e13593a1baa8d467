//! Batched 3D Model (`.b3dm`) loader.
//!
//! 28-byte header, little-endian, mirrors the teacher's pack-format idiom of
//! validating magic bytes, version, and declared length against the actual
//! buffer before trusting anything past the header:
//!
//! ```text
//! magic                              4 bytes  b"b3dm"
//! version                            u32
//! byteLength                         u32      total length incl. header
//! featureTableJSONByteLength         u32
//! featureTableBinaryByteLength       u32
//! batchTableJSONByteLength           u32
//! batchTableBinaryByteLength         u32
//! ```
//!
//! followed by the feature table JSON, feature table binary, batch table
//! JSON, batch table binary, and finally the glTF body. Only `RTC_CENTER`
//! (a `[f64; 3]` relative-center-to-origin offset, present when the tile's
//! geometry is stored relative to a local origin rather than the scene
//! origin) is pulled out of the feature table; the remainder of the body is
//! handed upward opaque.

use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;

use crate::bvh::node::{NodeContent, NodeContentPayload};
use crate::content_type::ContentType;
use crate::error::{FormatError, TileStreamError, TileStreamResult};
use crate::fetch::SharedFetcher;
use crate::load_handle::LoadHandle;

use super::{FormatLoader, LoadedPayload};

pub const CONTENT_TYPE: ContentType = ContentType::reserved(2);

const MAGIC: &[u8; 4] = b"b3dm";
const HEADER_LEN: usize = 28;

#[derive(Debug, Deserialize, Default)]
struct FeatureTableJson {
    #[serde(rename = "RTC_CENTER")]
    rtc_center: Option<[f64; 3]>,
}

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

    let u32_at = |offset: usize| u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());

    let version = u32_at(4);
    if version != 1 {
        return Err(FormatError::UnsupportedVersion(version).into());
    }
    let byte_length = u32_at(8) as usize;
    if byte_length != buf.len() {
        return Err(FormatError::InconsistentLength {
            claimed: byte_length,
            actual: buf.len(),
        }
        .into());
    }
    let feature_json_len = u32_at(12) as usize;
    let feature_bin_len = u32_at(16) as usize;
    let batch_json_len = u32_at(20) as usize;
    let batch_bin_len = u32_at(24) as usize;

    let feature_json_start = HEADER_LEN;
    let feature_json_end = feature_json_start + feature_json_len;
    let body_start = feature_json_end + feature_bin_len + batch_json_len + batch_bin_len;
    if body_start > buf.len() {
        return Err(FormatError::InconsistentLength {
            claimed: body_start,
            actual: buf.len(),
        }
        .into());
    }

    let rtc_center = if feature_json_len > 0 {
        let text = std::str::from_utf8(&buf[feature_json_start..feature_json_end]).map_err(|e| {
            FormatError::MalformedBoundingVolume(format!("feature table not utf8: {e}"))
        })?;
        let trimmed = text.trim_end_matches('\0');
        if trimmed.is_empty() {
            None
        } else {
            let parsed: FeatureTableJson =
                serde_json::from_str(trimmed).map_err(FormatError::Json)?;
            parsed.rtc_center
        }
    } else {
        None
    };

    Ok(LoadedPayload::Batched {
        body: Bytes::copy_from_slice(&buf[body_start..]),
        rtc_center,
    })
}

pub struct B3dmLoader {
    fetcher: SharedFetcher,
}

impl B3dmLoader {
    pub fn new(fetcher: SharedFetcher) -> Arc<Self> {
        Arc::new(Self { fetcher })
    }
}

impl FormatLoader for B3dmLoader {
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
                            "b3dm content had no uri".into(),
                        ))
                    })?;
                    let url = url::Url::parse(&uri_str).map_err(|e| {
                        TileStreamError::from(FormatError::MalformedBoundingVolume(format!(
                            "invalid b3dm uri {uri_str:?}: {e}"
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

    fn sample_b3dm(rtc_center: Option<[f64; 3]>) -> Vec<u8> {
        let feature_json = match rtc_center {
            Some(c) => format!(r#"{{"RTC_CENTER":[{},{},{}]}}"#, c[0], c[1], c[2]),
            None => String::new(),
        };
        let body = b"glTF-body-bytes";

        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&1u32.to_le_bytes());
        let byte_length = HEADER_LEN + feature_json.len() + body.len();
        buf.extend_from_slice(&(byte_length as u32).to_le_bytes());
        buf.extend_from_slice(&(feature_json.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(feature_json.as_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = sample_b3dm(None);
        buf[0] = b'x';
        assert!(matches!(
            parse(&buf),
            Err(TileStreamError::Format(FormatError::BadMagic { .. }))
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut buf = sample_b3dm(None);
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            parse(&buf),
            Err(TileStreamError::Format(FormatError::InconsistentLength { .. }))
        ));
    }

    #[test]
    fn extracts_rtc_center_when_present() {
        let buf = sample_b3dm(Some([1.0, 2.0, 3.0]));
        let payload = parse(&buf).unwrap();
        match payload {
            LoadedPayload::Batched { rtc_center, body } => {
                assert_eq!(rtc_center, Some([1.0, 2.0, 3.0]));
                assert_eq!(&body[..], b"glTF-body-bytes");
            }
            _ => panic!("expected Batched payload"),
        }
    }

    #[test]
    fn rtc_center_absent_when_no_feature_table() {
        let buf = sample_b3dm(None);
        match parse(&buf).unwrap() {
            LoadedPayload::Batched { rtc_center, .. } => assert_eq!(rtc_center, None),
            _ => panic!("expected Batched payload"),
        }
    }
}

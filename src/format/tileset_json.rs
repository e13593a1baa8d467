//! OGC 3D Tiles `tileset.json` loader.
//!
//! The JSON schema below mirrors the upstream 3D Tiles spec types directly
//! (asset/root/children/content/boundingVolume/refine), the same shape used
//! by real tileset readers. A fetched tileset document expands into a
//! [`NodeSubtree`]: each JSON `tile` becomes a node, a `tile` carrying
//! `content.uri` gets a [`NodeContent`] so the content-manager can later
//! fetch its payload (itself either a nested tileset, a batched model, or a
//! terrain tile), and inline `children` become the subtree's own children so
//! the caller mounts the whole document under one BVH parent in one step.

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::bvh::node::{
    BoundingVolume as Bv, NodeContent, NodeContentPayload, NodeData, NodeSubtree, RefinementMode,
};
use crate::content_type::ContentType;
use crate::error::{FormatError, TileStreamError, TileStreamResult};
use crate::fetch::{resolve_uri, SharedFetcher};
use crate::load_handle::LoadHandle;

use super::{FormatLoader, LoadedPayload};

pub const CONTENT_TYPE: ContentType = ContentType::reserved(1);

#[derive(Debug, Deserialize)]
struct JsonTileset {
    root: JsonTile,
}

#[derive(Debug, Deserialize)]
struct JsonTile {
    #[serde(rename = "boundingVolume")]
    bounding_volume: JsonBoundingVolume,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    #[serde(default)]
    refine: Option<JsonRefine>,
    #[serde(default)]
    content: Option<JsonTileContent>,
    #[serde(default)]
    children: Vec<JsonTile>,
}

#[derive(Debug, Deserialize)]
struct JsonTileContent {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct JsonBoundingVolume {
    #[serde(rename = "box", default)]
    bounding_box: Option<[f64; 12]>,
    #[serde(default)]
    region: Option<[f64; 6]>,
    #[serde(default)]
    sphere: Option<[f64; 4]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum JsonRefine {
    Add,
    Replace,
}

fn convert_bounding_volume(v: &JsonBoundingVolume) -> TileStreamResult<Bv> {
    if let Some(b) = v.bounding_box {
        return Ok(Bv::Box {
            center: [b[0], b[1], b[2]],
            half_axes: [[b[3], b[4], b[5]], [b[6], b[7], b[8]], [b[9], b[10], b[11]]],
        });
    }
    if let Some(s) = v.sphere {
        return Ok(Bv::Sphere {
            center: [s[0], s[1], s[2]],
            radius: s[3],
        });
    }
    if let Some(r) = v.region {
        return Ok(Bv::Region {
            west: r[0],
            south: r[1],
            east: r[2],
            north: r[3],
            min_height: r[4],
            max_height: r[5],
        });
    }
    Err(FormatError::MalformedBoundingVolume(
        "boundingVolume must carry one of box, region, sphere".into(),
    )
    .into())
}

fn content_type_for_uri(uri: &Url) -> ContentType {
    if uri.path().ends_with(".json") {
        CONTENT_TYPE
    } else if uri.path().ends_with(".b3dm") {
        super::b3dm::CONTENT_TYPE
    } else {
        super::tms_terrain::CONTENT_TYPE
    }
}

/// Recursively convert one JSON tile, and its inline children, into a
/// [`NodeSubtree`], resolving any `content.uri` against `base`.
fn convert_tile(
    tile: &JsonTile,
    base: &Url,
    data_source: crate::DataSourceId,
) -> TileStreamResult<NodeSubtree> {
    let bounds = convert_bounding_volume(&tile.bounding_volume)?;
    let refinement_mode = match tile.refine {
        Some(JsonRefine::Replace) => RefinementMode::Replace,
        Some(JsonRefine::Add) | None => RefinementMode::Add,
    };

    let content = match &tile.content {
        Some(c) => {
            let resolved = resolve_uri(base, &c.uri)?;
            let content_type = content_type_for_uri(&resolved);
            Some(NodeContent::new(
                content_type,
                data_source,
                bounds,
                tile.geometric_error as f32,
                false,
                NodeContentPayload::Uris(vec![resolved.to_string()]),
            ))
        }
        None => None,
    };

    let data = NodeData {
        bounds,
        geometric_error: tile.geometric_error as f32,
        refinement_mode,
        transform: NodeData::identity_transform(),
        content,
    };

    let children = tile
        .children
        .iter()
        .map(|c| convert_tile(c, base, data_source))
        .collect::<TileStreamResult<Vec<_>>>()?;

    Ok(NodeSubtree { data, children })
}

pub struct TilesetJsonLoader {
    fetcher: SharedFetcher,
}

impl TilesetJsonLoader {
    pub fn new(fetcher: SharedFetcher) -> Arc<Self> {
        Arc::new(Self { fetcher })
    }
}

impl FormatLoader for TilesetJsonLoader {
    fn load(&self, content: &NodeContent, _fetcher: &SharedFetcher) -> LoadHandle<LoadedPayload> {
        let uri = match &content.payload {
            NodeContentPayload::Uris(uris) => uris.first().cloned(),
            NodeContentPayload::Inline(_) => None,
        };
        let fetcher = self.fetcher.clone();
        let data_source = content.data_source;

        LoadHandle::spawn(move || {
            let uri_str = uri.ok_or_else(|| {
                TileStreamError::from(FormatError::MalformedBoundingVolume(
                    "tileset json content had no uri".into(),
                ))
            })?;
            let base = Url::parse(&uri_str).map_err(|e| {
                TileStreamError::from(FormatError::MalformedBoundingVolume(format!(
                    "invalid tileset uri {uri_str:?}: {e}"
                )))
            })?;
            let text = fetcher.fetch_text(&base)?;
            let parsed: JsonTileset = serde_json::from_str(&text).map_err(FormatError::Json)?;
            let root_subtree = convert_tile(&parsed.root, &base, data_source)?;
            Ok(LoadedPayload::Children(vec![root_subtree]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticFetcher(Mutex<std::collections::HashMap<String, String>>);

    impl crate::fetch::Fetcher for StaticFetcher {
        fn fetch_bytes(&self, uri: &Url) -> TileStreamResult<bytes::Bytes> {
            self.fetch_text(uri).map(bytes::Bytes::from)
        }
        fn fetch_text(&self, uri: &Url) -> TileStreamResult<String> {
            self.0
                .lock()
                .unwrap()
                .get(uri.as_str())
                .cloned()
                .ok_or_else(|| {
                    crate::error::IoError::Status {
                        status: "404".into(),
                        message: uri.to_string(),
                    }
                    .into()
                })
        }
    }

    fn sample_json() -> &'static str {
        r#"{
            "asset": {"version": "1.0"},
            "geometricError": 500,
            "root": {
                "boundingVolume": {"sphere": [0.0, 0.0, 0.0, 100.0]},
                "geometricError": 200,
                "refine": "ADD",
                "children": [
                    {
                        "boundingVolume": {"sphere": [1.0, 0.0, 0.0, 50.0]},
                        "geometricError": 0,
                        "content": {"uri": "tile_0.b3dm"}
                    }
                ]
            }
        }"#
    }

    fn poll_until_ready<T>(handle: LoadHandle<T>) -> TileStreamResult<T> {
        use crate::load_handle::PollResult;
        loop {
            match handle.poll() {
                PollResult::Ready(r) => return r,
                PollResult::Pending => std::thread::yield_now(),
            }
        }
    }

    #[test]
    fn parses_nested_tiles_and_resolves_content_uri() {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "https://example.com/tileset.json".to_string(),
            sample_json().to_string(),
        );
        let fetcher: SharedFetcher = Arc::new(StaticFetcher(Mutex::new(map)));

        let content = NodeContent::new(
            CONTENT_TYPE,
            crate::DataSourceId::new_for_test(1),
            Bv::Sphere {
                center: [0.0, 0.0, 0.0],
                radius: 1.0,
            },
            500.0,
            true,
            NodeContentPayload::Uris(vec!["https://example.com/tileset.json".into()]),
        );

        let loader = TilesetJsonLoader::new(fetcher.clone());
        let handle = loader.load(&content, &fetcher);

        let result = poll_until_ready(handle);
        match result.unwrap() {
            LoadedPayload::Children(roots) => {
                assert_eq!(roots.len(), 1);
                let root = &roots[0];
                assert_eq!(root.children.len(), 1);
                let leaf = &root.children[0];
                let NodeContentPayload::Uris(uris) = &leaf.data.content.as_ref().unwrap().payload
                else {
                    panic!("expected uri payload");
                };
                assert_eq!(uris[0], "https://example.com/tile_0.b3dm");
            }
            _ => panic!("expected Children payload"),
        }
    }
}

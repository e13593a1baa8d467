//! Shared fixtures for unit tests across the crate.

use std::sync::Arc;

use bytes::Bytes;

use crate::bvh::node::{
    BoundingVolume, NodeContent, NodeContentPayload, NodeData, RefinementMode,
};
use crate::content_type::ContentType;
use crate::error::TileStreamResult;
use crate::fetch::SharedFetcher;
use crate::format::{FormatLoader, LoadedPayload};
use crate::load_handle::LoadHandle;

pub fn root_data() -> NodeData {
    NodeData {
        bounds: BoundingVolume::Sphere {
            center: [0.0, 0.0, 0.0],
            radius: 1_000.0,
        },
        geometric_error: 1_000.0,
        refinement_mode: RefinementMode::Add,
        transform: NodeData::identity_transform(),
        content: None,
    }
}

pub fn leaf_data() -> NodeData {
    NodeData {
        bounds: BoundingVolume::Sphere {
            center: [0.0, 0.0, 0.0],
            radius: 10.0,
        },
        geometric_error: 5.0,
        refinement_mode: RefinementMode::Add,
        transform: NodeData::identity_transform(),
        content: Some(NodeContent::new(
            ContentType::reserved(0),
            crate::DataSourceId::new_for_test(0),
            BoundingVolume::Sphere {
                center: [0.0, 0.0, 0.0],
                radius: 10.0,
            },
            5.0,
            false,
            NodeContentPayload::Inline(Bytes::new()),
        )),
    }
}

/// A loader that resolves immediately with an empty children list. Used to
/// exercise the registry and the content manager without real I/O.
#[derive(Default)]
pub struct StubLoader;

impl FormatLoader for StubLoader {
    fn load(&self, _content: &NodeContent, _fetcher: &SharedFetcher) -> LoadHandle<LoadedPayload> {
        LoadHandle::ready(Ok(LoadedPayload::Children(Vec::new())))
    }
}

pub fn noop_fetcher() -> SharedFetcher {
    struct Noop;
    impl crate::fetch::Fetcher for Noop {
        fn fetch_bytes(&self, uri: &url::Url) -> TileStreamResult<Bytes> {
            Err(crate::error::IoError::Status {
                status: "unreachable".into(),
                message: uri.to_string(),
            }
            .into())
        }
    }
    Arc::new(Noop)
}

//! Format loader boundary and the three concrete loaders this crate ships.

pub mod b3dm;
pub mod tileset_json;
pub mod tms_terrain;

use bytes::Bytes;

use crate::bvh::node::{NodeContent, NodeSubtree};
use crate::fetch::SharedFetcher;
use crate::load_handle::LoadHandle;

/// What a loader hands back once a fetch+decode completes.
#[derive(Debug, Clone)]
pub enum LoadedPayload {
    /// A tileset-json expansion: the node's children, ready to mount.
    Children(Vec<NodeSubtree>),
    /// Decoded batched-3D-model payload, relative to its declared
    /// `RTC_CENTER` if one was present.
    Batched {
        body: Bytes,
        rtc_center: Option<[f64; 3]>,
    },
    /// A terrain tile, opaque past header validation.
    Terrain {
        body: Bytes,
        major_version: u16,
        minor_version: u16,
    },
}

/// A decoder/loader for one content type.
///
/// `load` must not block the calling thread; real I/O happens inside the
/// [`LoadHandle`]'s spawned task. `unload` runs synchronously on the main
/// executor and must be cheap (it exists for formats that hold loader-side
/// state keyed by node, which the teacher's `SlidePool` also does not need —
/// none of the three loaders here do either, so the default is a no-op).
pub trait FormatLoader: Send + Sync {
    fn load(&self, content: &NodeContent, fetcher: &SharedFetcher) -> LoadHandle<LoadedPayload>;

    fn unload(&self, _content: &NodeContent) {}
}

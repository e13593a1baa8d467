//! Universal decoder pipeline for streaming hierarchically tiled geospatial
//! scenes.
//!
//! This crate provides:
//! - A flat-arena bounding-volume hierarchy with generation-tagged handles
//! - A target-state controller that decides what should be expanded from
//!   per-observer screen-space error
//! - An expansion scheduler that drives loaded/visible state towards the
//!   target under a concurrency budget, with cooperative load cancellation
//! - A small processing graph (observer mux, decoder demux, instantiator)
//!   gluing the above to a command buffer the embedding renderer drains
//! - Format loaders for OGC 3D Tiles tilesets, batched 3D models, and TMS
//!   terrain tiles
//! - A mesh-editing utility (plane cut, edge extrude, combine-and-dispose)

pub mod bvh;
pub mod command;
pub mod config;
pub mod content_manager;
pub mod content_type;
pub mod error;
pub mod fetch;
pub mod format;
pub mod graph;
pub mod load_handle;
pub mod mesh;
pub mod node_id;
pub mod priority_queue;
pub mod revert;
pub mod scheduler;
pub mod target_state;

#[cfg(test)]
pub(crate) mod test_utils;

use std::sync::atomic::{AtomicU64, Ordering};

use bvh::Bvh;
use command::{command_buffer, CommandBufferReceiver, IdGenerator};
use config::StreamingConfig;
use content_manager::NodeContentManager;
use content_type::LoaderTable;
use error::TileStreamResult;
use fetch::SharedFetcher;
use scheduler::ExpansionScheduler;
use target_state::{Observer, TargetStateController};

/// Identifies which data source (tileset, terrain layer) mounted a BVH
/// subtree, so `Bvh::unmount` can remove exactly that source's tiles
/// without disturbing anything else mounted under the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSourceId(u64);

impl DataSourceId {
    #[cfg(test)]
    pub fn new_for_test(id: u64) -> Self {
        Self(id)
    }
}

/// Issues fresh [`DataSourceId`]s. One per embedding application.
#[derive(Default)]
pub struct DataSourceIdGenerator {
    next: AtomicU64,
}

impl DataSourceIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> DataSourceId {
        DataSourceId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Top-level orchestrator wiring the BVH, target-state controller,
/// expansion scheduler, content manager, and loader registry into the
/// per-tick loop an embedding application drives.
pub struct TileStreamEngine {
    pub bvh: Bvh,
    pub loaders: LoaderTable,
    pub config: StreamingConfig,
    fetcher: SharedFetcher,
    target_state: TargetStateController,
    scheduler: ExpansionScheduler,
    content: NodeContentManager,
    ids: IdGenerator,
    data_sources: DataSourceIdGenerator,
}

impl TileStreamEngine {
    pub fn new(root: bvh::NodeData, fetcher: SharedFetcher, config: StreamingConfig) -> (Self, CommandBufferReceiver) {
        let (commands, receiver) = command_buffer(1024);
        let sse_threshold = 16.0;
        let engine = Self {
            bvh: Bvh::new(root),
            loaders: LoaderTable::new(),
            config,
            fetcher,
            target_state: TargetStateController::new(sse_threshold),
            scheduler: ExpansionScheduler::new(),
            content: NodeContentManager::new(commands),
            ids: IdGenerator::new(),
            data_sources: DataSourceIdGenerator::new(),
        };
        (engine, receiver)
    }

    /// Register the three built-in loaders (tileset-json, b3dm, tms
    /// terrain) under their reserved content types.
    pub fn register_builtin_loaders(&self) {
        self.loaders.register(
            format::tileset_json::CONTENT_TYPE,
            format::tileset_json::TilesetJsonLoader::new(self.fetcher.clone()),
        );
        self.loaders.register(
            format::b3dm::CONTENT_TYPE,
            format::b3dm::B3dmLoader::new(self.fetcher.clone()),
        );
        self.loaders.register(
            format::tms_terrain::CONTENT_TYPE,
            format::tms_terrain::TmsTerrainLoader::new(self.fetcher.clone()),
        );
    }

    pub fn new_data_source(&self) -> DataSourceId {
        self.data_sources.next()
    }

    /// Mount a new data source's root nodes under the BVH root.
    pub fn mount(
        &mut self,
        source: DataSourceId,
        children: impl IntoIterator<Item = bvh::NodeData>,
    ) -> TileStreamResult<Vec<node_id::NodeId>> {
        self.bvh.mount(source, children)
    }

    pub fn unmount(&mut self, source: DataSourceId) {
        self.bvh.unmount(source);
    }

    /// Run one full tick: recompute target state against `observers`, then
    /// drive current state towards it.
    pub fn tick(&mut self, observers: &[Box<dyn Observer>]) -> TileStreamResult<()> {
        self.target_state
            .update(&mut self.bvh, observers, &self.loaders);
        self.scheduler.tick(
            &mut self.bvh,
            &mut self.content,
            &self.loaders,
            &self.fetcher,
            &self.config,
            &self.ids,
        )
    }
}

//! The node-content state machine.
//!
//! A single FIFO queue drives every node's load/unload/visibility
//! transition. Each node may have at most one non-completed queue entry at
//! a time — trying to enqueue a second is an `InvariantViolation`, the same
//! "one active operation" rule the teacher's in-flight dedup set enforces
//! for tile decodes.

use std::collections::{HashMap, VecDeque};

use crate::bvh::{Bvh, CurrentState};
use crate::command::{Command, CommandBuffer};
use crate::content_type::LoaderTable;
use crate::error::{InvariantViolation, TileStreamResult};
use crate::fetch::SharedFetcher;
use crate::format::LoadedPayload;
use crate::load_handle::{LoadHandle, PollResult};
use crate::node_id::NodeId;
use crate::revert::RevertibleCommandStack;

enum QueueItem {
    FinishLoading {
        node: NodeId,
        handle: LoadHandle<LoadedPayload>,
    },
    LoadLater {
        node: NodeId,
    },
    Unload {
        node: NodeId,
    },
    Update {
        node: NodeId,
        visible: bool,
    },
}

fn item_node(item: &QueueItem) -> NodeId {
    match item {
        QueueItem::FinishLoading { node, .. }
        | QueueItem::LoadLater { node }
        | QueueItem::Unload { node }
        | QueueItem::Update { node, .. } => *node,
    }
}

pub struct NodeContentManager {
    queue: VecDeque<QueueItem>,
    active: HashMap<NodeId, ()>,
    commands: CommandBuffer,
    /// One revert stack per node with an applied load, so unloading one
    /// node never touches another node's allocations.
    node_stacks: HashMap<NodeId, RevertibleCommandStack>,
    /// The render instance allocated for a node, if its content resolved to
    /// a renderable (batched model) rather than a pure expansion.
    node_instances: HashMap<NodeId, crate::command::InstanceId>,
    /// Nodes whose most recent load attempt failed. `load` is a no-op for a
    /// failed node so a persistently broken tile doesn't re-hit its loader
    /// every tick.
    failed: HashMap<NodeId, ()>,
}

impl NodeContentManager {
    pub fn new(commands: CommandBuffer) -> Self {
        Self {
            queue: VecDeque::new(),
            active: HashMap::new(),
            commands,
            node_stacks: HashMap::new(),
            node_instances: HashMap::new(),
            failed: HashMap::new(),
        }
    }

    fn claim(&mut self, node: NodeId) -> TileStreamResult<()> {
        if self.active.insert(node, ()).is_some() {
            return Err(InvariantViolation::ConcurrentNodeOperation(node).into());
        }
        Ok(())
    }

    /// Begin loading `node`'s content via the registered loader. Fails if
    /// the node already has a pending operation, has no content, or its
    /// content type has no registered loader.
    pub fn load(
        &mut self,
        bvh: &Bvh,
        node: NodeId,
        loaders: &LoaderTable,
        fetcher: &SharedFetcher,
    ) -> TileStreamResult<()> {
        if self.failed.contains_key(&node) {
            return Ok(());
        }
        let content = bvh
            .data(node)
            .and_then(|d| d.content.as_ref())
            .ok_or_else(|| InvariantViolation::Other(format!("node {node} has no content")))?;
        let loader = loaders.get(content.content_type)?;
        self.claim(node)?;
        let handle = loader.load(content, fetcher);
        self.queue.push_back(QueueItem::FinishLoading { node, handle });
        Ok(())
    }

    /// Defer `node` to be retried next tick (e.g. the request budget was
    /// exhausted this tick).
    pub fn load_later(&mut self, node: NodeId) -> TileStreamResult<()> {
        self.claim(node)?;
        self.queue.push_back(QueueItem::LoadLater { node });
        Ok(())
    }

    pub fn unload(&mut self, node: NodeId) -> TileStreamResult<()> {
        self.claim(node)?;
        self.queue.push_back(QueueItem::Unload { node });
        Ok(())
    }

    pub fn update_visibility(&mut self, node: NodeId, visible: bool) -> TileStreamResult<()> {
        self.claim(node)?;
        self.queue.push_back(QueueItem::Update { node, visible });
        Ok(())
    }

    pub fn has_pending(&self, node: NodeId) -> bool {
        self.active.contains_key(&node)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Process every item currently in the queue once. Items whose load
    /// hasn't resolved yet are requeued for the next tick; everything else
    /// resolves within this call.
    pub fn process_all(
        &mut self,
        bvh: &mut Bvh,
        ids: &crate::command::IdGenerator,
    ) -> TileStreamResult<()> {
        let pending = std::mem::take(&mut self.queue);
        for item in pending {
            self.process_one(item, bvh, ids)?;
        }
        Ok(())
    }

    fn process_one(
        &mut self,
        item: QueueItem,
        bvh: &mut Bvh,
        ids: &crate::command::IdGenerator,
    ) -> TileStreamResult<()> {
        let node = item_node(&item);
        match item {
            QueueItem::FinishLoading { node, handle } => match handle.poll() {
                PollResult::Pending => {
                    self.queue.push_back(QueueItem::FinishLoading { node, handle });
                }
                PollResult::Ready(Ok(payload)) => {
                    let mut stack = RevertibleCommandStack::new(self.commands.clone());
                    if let Some(instance) = apply_payload(bvh, node, payload, &mut stack, ids)? {
                        self.node_instances.insert(node, instance);
                    }
                    self.node_stacks.insert(node, stack);
                    bvh.set_current_state(
                        node,
                        CurrentState {
                            loaded: true,
                            visible: bvh.current_state(node).visible,
                        },
                    );
                    self.active.remove(&node);
                }
                PollResult::Ready(Err(err)) => {
                    tracing::warn!(%node, %err, "load failed, leaving node collapsed");
                    if let Some(mut stack) = self.node_stacks.remove(&node) {
                        stack.revert()?;
                    }
                    self.node_instances.remove(&node);
                    self.failed.insert(node, ());
                    self.active.remove(&node);
                }
            },
            QueueItem::LoadLater { node } => {
                // Caller observes `has_pending` stays false after this so it
                // can re-issue `load` next tick.
                self.active.remove(&node);
            }
            QueueItem::Unload { node } => {
                if let Some(mut stack) = self.node_stacks.remove(&node) {
                    stack.revert()?;
                }
                self.node_instances.remove(&node);
                bvh.set_current_state(node, CurrentState::NONE);
                self.active.remove(&node);
            }
            QueueItem::Update { node, visible } => {
                let current = bvh.current_state(node);
                bvh.set_current_state(
                    node,
                    CurrentState {
                        loaded: current.loaded,
                        visible,
                    },
                );
                if let Some(&instance) = self.node_instances.get(&node) {
                    self.commands
                        .push(Command::UpdateVisibility { instance, visible })?;
                }
                self.active.remove(&node);
            }
        }
        Ok(())
    }
}

/// Applies a resolved payload's allocations and returns the render instance
/// created for it, if any (pure tileset expansions create none).
fn apply_payload(
    bvh: &mut Bvh,
    node: NodeId,
    payload: LoadedPayload,
    commands: &mut RevertibleCommandStack,
    ids: &crate::command::IdGenerator,
) -> TileStreamResult<Option<crate::command::InstanceId>> {
    match payload {
        LoadedPayload::Children(subtrees) => {
            for subtree in subtrees {
                bvh.mount_subtree(node, subtree)?;
            }
            Ok(None)
        }
        LoadedPayload::Batched { body, rtc_center } => {
            let mesh = ids.next_mesh_id();
            let material = ids.next_material_id();
            let instance = ids.next_instance_id();
            let mut transform = bvh
                .data(node)
                .map(|d| d.transform)
                .unwrap_or_else(crate::bvh::node::NodeData::identity_transform);
            if let Some(center) = rtc_center {
                transform[0][3] += center[0];
                transform[1][3] += center[1];
                transform[2][3] += center[2];
            }
            commands.queue_atomic(vec![
                Command::AllocateMesh {
                    mesh,
                    vertex_data: std::sync::Arc::from(body.to_vec().into_boxed_slice()),
                },
                Command::AllocateMaterial { material },
                Command::AllocateInstance {
                    instance,
                    node,
                    mesh,
                    material,
                    transform,
                },
            ])?;
            Ok(Some(instance))
        }
        LoadedPayload::Terrain { body, .. } => {
            let mesh = ids.next_mesh_id();
            commands.push(Command::AllocateMesh {
                mesh,
                vertex_data: std::sync::Arc::from(body.to_vec().into_boxed_slice()),
            })?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{command_buffer, IdGenerator};
    use crate::content_type::LoaderTable;
    use crate::test_utils::{leaf_data, noop_fetcher, root_data, StubLoader};
    use std::sync::Arc;

    fn setup() -> (
        Bvh,
        LoaderTable,
        SharedFetcher,
        NodeContentManager,
        crate::command::CommandBufferReceiver,
    ) {
        let bvh = Bvh::new(root_data());
        let loaders = LoaderTable::new();
        let fetcher = noop_fetcher();
        let (buf, rx) = command_buffer(16);
        (bvh, loaders, fetcher, NodeContentManager::new(buf), rx)
    }

    #[test]
    fn second_load_on_same_node_is_rejected() {
        let (mut bvh, loaders, fetcher, mut mgr, _rx) = setup();
        let root = bvh.root_id();
        let child = bvh.add_node(root, leaf_data()).unwrap();
        let tag = bvh
            .data(child)
            .unwrap()
            .content
            .as_ref()
            .unwrap()
            .content_type;
        loaders.register(tag, Arc::new(StubLoader));

        mgr.load(&bvh, child, &loaders, &fetcher).unwrap();
        assert!(mgr.load(&bvh, child, &loaders, &fetcher).is_err());
    }

    #[test]
    fn finished_load_mounts_children_and_marks_loaded() {
        let (mut bvh, loaders, fetcher, mut mgr, _rx) = setup();
        let root = bvh.root_id();
        let child = bvh.add_node(root, leaf_data()).unwrap();
        let tag = bvh
            .data(child)
            .unwrap()
            .content
            .as_ref()
            .unwrap()
            .content_type;
        loaders.register(tag, Arc::new(StubLoader));

        mgr.load(&bvh, child, &loaders, &fetcher).unwrap();
        let ids = IdGenerator::new();
        mgr.process_all(&mut bvh, &ids).unwrap();

        assert!(bvh.current_state(child).loaded);
        assert!(!mgr.has_pending(child));
    }

    #[test]
    fn unload_reverts_and_clears_loaded_flag() {
        let (mut bvh, loaders, fetcher, mut mgr, _rx) = setup();
        let root = bvh.root_id();
        let child = bvh.add_node(root, leaf_data()).unwrap();
        let tag = bvh
            .data(child)
            .unwrap()
            .content
            .as_ref()
            .unwrap()
            .content_type;
        loaders.register(tag, Arc::new(StubLoader));

        mgr.load(&bvh, child, &loaders, &fetcher).unwrap();
        let ids = IdGenerator::new();
        mgr.process_all(&mut bvh, &ids).unwrap();

        mgr.unload(child).unwrap();
        mgr.process_all(&mut bvh, &ids).unwrap();
        assert!(!bvh.current_state(child).loaded);
    }

    struct RtcCenterLoader;

    impl crate::format::FormatLoader for RtcCenterLoader {
        fn load(
            &self,
            _content: &crate::bvh::node::NodeContent,
            _fetcher: &SharedFetcher,
        ) -> LoadHandle<LoadedPayload> {
            LoadHandle::ready(Ok(LoadedPayload::Batched {
                body: bytes::Bytes::from_static(b"gltf-body"),
                rtc_center: Some([1.0, 2.0, 3.0]),
            }))
        }
    }

    #[test]
    fn rtc_center_is_folded_into_instance_transform() {
        let (mut bvh, loaders, fetcher, mut mgr, rx) = setup();
        let root = bvh.root_id();
        let child = bvh.add_node(root, leaf_data()).unwrap();
        let tag = bvh
            .data(child)
            .unwrap()
            .content
            .as_ref()
            .unwrap()
            .content_type;
        loaders.register(tag, Arc::new(RtcCenterLoader));

        mgr.load(&bvh, child, &loaders, &fetcher).unwrap();
        let ids = IdGenerator::new();
        mgr.process_all(&mut bvh, &ids).unwrap();

        let mut transform = None;
        while let Ok(command) = rx.try_recv_for_test() {
            if let Command::AllocateInstance { transform: t, .. } = command {
                transform = Some(t);
            }
        }
        let transform = transform.expect("expected an AllocateInstance command");
        assert_eq!(transform[0][3], 1.0);
        assert_eq!(transform[1][3], 2.0);
        assert_eq!(transform[2][3], 3.0);
    }
}

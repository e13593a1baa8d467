//! Flat arena BVH store.
//!
//! Records live in a contiguous `Vec` slot arena (a freelist of indices, the
//! way the teacher's caches index by a flat key rather than walking owned
//! pointers). Child lists live in a second, smaller side arena ("indirection
//! blocks") so fixed-size `Record`s don't grow with fan-out. Parent/child
//! links are plain integer ids — never owning references — so cycles are
//! structurally impossible.

pub mod node;

use std::collections::HashMap;

use crate::error::{InvariantViolation, TileStreamResult};
use crate::node_id::NodeId;

pub use node::{
    BoundingVolume, CurrentState, ErrorSpecification, NodeContent, NodeContentPayload, NodeData,
    NodeSubtree, RefinementMode, SchedulerCache, TargetState,
};

enum Slot {
    Occupied(Record),
    Free { next_free: Option<u32>, generation: u32 },
}

struct Record {
    generation: u32,
    data: NodeData,
    parent: NodeId,
    children_block: Option<u32>,
    depth: u32,
    current_state: CurrentState,
    target_state: TargetState,
    error_spec: ErrorSpecification,
    scheduler_cache: SchedulerCache,
}

/// Side arena of variable-length child-id lists, indexed by a small integer
/// ("children-block id"). Reuses freed blocks via a freelist, same shape as
/// the main node arena.
#[derive(Default)]
struct ChildrenArena {
    blocks: Vec<Option<Vec<NodeId>>>,
    free: Vec<u32>,
}

impl ChildrenArena {
    fn alloc(&mut self, children: Vec<NodeId>) -> u32 {
        if let Some(idx) = self.free.pop() {
            self.blocks[idx as usize] = Some(children);
            idx
        } else {
            self.blocks.push(Some(children));
            (self.blocks.len() - 1) as u32
        }
    }

    fn get(&self, block: u32) -> &[NodeId] {
        self.blocks[block as usize].as_deref().unwrap_or(&[])
    }

    fn push_child(&mut self, block: u32, child: NodeId) {
        self.blocks[block as usize]
            .get_or_insert_with(Vec::new)
            .push(child);
    }

    fn remove_child(&mut self, block: u32, child: NodeId) {
        if let Some(list) = self.blocks[block as usize].as_mut() {
            list.retain(|&id| id != child);
        }
    }

    fn free(&mut self, block: u32) {
        self.blocks[block as usize] = None;
        self.free.push(block);
    }
}

/// The BVH store. Not thread-safe by design — all mutation happens on the
/// single cooperative main executor (content manager, target-state
/// controller, expansion scheduler).
pub struct Bvh {
    slots: Vec<Slot>,
    free: Vec<u32>,
    children: ChildrenArena,
    root: NodeId,
    /// Root's direct children grouped by the data source that mounted them,
    /// so `unmount` can remove exactly the tiles a source added.
    mounts: HashMap<crate::DataSourceId, Vec<NodeId>>,
}

impl Bvh {
    /// Construct a new BVH with an empty root node.
    pub fn new(root_data: NodeData) -> Self {
        let mut store = Self {
            slots: Vec::new(),
            free: Vec::new(),
            children: ChildrenArena::default(),
            root: NodeId::NULL,
            mounts: HashMap::new(),
        };
        let root_id = store.insert_record(Record {
            generation: 0,
            data: root_data,
            parent: NodeId::NULL,
            children_block: None,
            depth: 0,
            current_state: CurrentState::NONE,
            target_state: TargetState::Expanded,
            error_spec: ErrorSpecification::default(),
            scheduler_cache: SchedulerCache::default(),
        });
        store.root = root_id;
        store
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    fn insert_record(&mut self, mut record: Record) -> NodeId {
        if let Some(idx) = self.free.pop() {
            let generation = match self.slots[idx as usize] {
                Slot::Free { generation, .. } => generation + 1,
                Slot::Occupied(_) => unreachable!("freelist pointed at occupied slot"),
            };
            record.generation = generation;
            self.slots[idx as usize] = Slot::Occupied(record);
            NodeId::new(idx, generation)
        } else {
            record.generation = 0;
            self.slots.push(Slot::Occupied(record));
            NodeId::new((self.slots.len() - 1) as u32, 0)
        }
    }

    fn record(&self, id: NodeId) -> Option<&Record> {
        match self.slots.get(id.index() as usize) {
            Some(Slot::Occupied(r)) if r.generation == id.generation() => Some(r),
            _ => None,
        }
    }

    fn record_mut(&mut self, id: NodeId) -> Option<&mut Record> {
        match self.slots.get_mut(id.index() as usize) {
            Some(Slot::Occupied(r)) if r.generation == id.generation() => Some(r),
            _ => None,
        }
    }

    /// Add a child of `parent`. The child's content, if any, gets its
    /// back-pointer bound to the new id (fails if it was already bound).
    pub fn add_node(&mut self, parent: NodeId, data: NodeData) -> TileStreamResult<NodeId> {
        let parent_depth = self
            .record(parent)
            .map(|r| r.depth)
            .ok_or_else(|| InvariantViolation::Other(format!("unknown parent {parent:?}")))?;

        let record = Record {
            generation: 0,
            data,
            parent,
            children_block: None,
            depth: parent_depth + 1,
            current_state: CurrentState::NONE,
            target_state: TargetState::Collapsed,
            error_spec: ErrorSpecification::default(),
            scheduler_cache: SchedulerCache::default(),
        };
        // `insert_record` may hand back a recycled slot with a bumped
        // generation instead of a fresh one, so the content's back-pointer
        // must be bound to the id it actually returns, never a precomputed
        // guess.
        let id = self.insert_record(record);
        if let Some(content) = self.record_mut(id).and_then(|r| r.data.content.as_mut()) {
            content.bind_node_id(id)?;
        }

        let parent_rec = self
            .record_mut(parent)
            .expect("parent validated above");
        match parent_rec.children_block {
            Some(block) => self.children.push_child(block, id),
            None => {
                let block = self.children.alloc(vec![id]);
                self.record_mut(parent).unwrap().children_block = Some(block);
            }
        }

        Ok(id)
    }

    /// Mount `children` as new roots-of-a-subtree under the BVH root, under
    /// a given data source id, so they can later be removed together via
    /// `unmount`.
    pub fn mount(
        &mut self,
        source: crate::DataSourceId,
        children: impl IntoIterator<Item = NodeData>,
    ) -> TileStreamResult<Vec<NodeId>> {
        let root = self.root;
        let mut ids = Vec::new();
        for data in children {
            ids.push(self.add_node(root, data)?);
        }
        self.mounts.entry(source).or_default().extend(ids.iter().copied());
        Ok(ids)
    }

    /// Mount a whole [`NodeSubtree`] under `parent`, preserving its nested
    /// parent/child structure. Returns the id of the subtree's own root
    /// node.
    pub fn mount_subtree(
        &mut self,
        parent: NodeId,
        subtree: NodeSubtree,
    ) -> TileStreamResult<NodeId> {
        let id = self.add_node(parent, subtree.data)?;
        for child in subtree.children {
            self.mount_subtree(id, child)?;
        }
        Ok(id)
    }

    /// Remove every tile added by `source`'s mount, recursively.
    pub fn unmount(&mut self, source: crate::DataSourceId) {
        if let Some(ids) = self.mounts.remove(&source) {
            for id in ids {
                self.remove_node(id);
            }
        }
    }

    /// Remove a node and its entire subtree. O(children) per node removed.
    pub fn remove_node(&mut self, id: NodeId) {
        let Some(rec) = self.record(id) else { return };
        let parent = rec.parent;
        let children_block = rec.children_block;

        if let Some(block) = children_block {
            let child_ids: Vec<NodeId> = self.children.get(block).to_vec();
            for child in child_ids {
                self.remove_node(child);
            }
            self.children.free(block);
        }

        if !parent.is_null() {
            if let Some(parent_rec) = self.record(parent) {
                if let Some(block) = parent_rec.children_block {
                    self.children.remove_child(block, id);
                }
            }
        }

        let generation = match &self.slots[id.index() as usize] {
            Slot::Occupied(r) => r.generation,
            Slot::Free { .. } => return,
        };
        self.slots[id.index() as usize] = Slot::Free {
            next_free: None,
            generation,
        };
        self.free.push(id.index());
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.record(id).and_then(|r| r.children_block) {
            Some(block) => self.children.get(block),
            None => &[],
        }
    }

    pub fn parent(&self, id: NodeId) -> NodeId {
        self.record(id).map(|r| r.parent).unwrap_or(NodeId::NULL)
    }

    pub fn depth(&self, id: NodeId) -> u32 {
        self.record(id).map(|r| r.depth).unwrap_or(0)
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.record(id).map(|r| &r.data)
    }

    pub fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.record_mut(id).map(|r| &mut r.data)
    }

    pub fn current_state(&self, id: NodeId) -> CurrentState {
        self.record(id).map(|r| r.current_state).unwrap_or_default()
    }

    pub fn set_current_state(&mut self, id: NodeId, state: CurrentState) {
        if let Some(r) = self.record_mut(id) {
            r.current_state = state;
        }
    }

    pub fn target_state(&self, id: NodeId) -> TargetState {
        self.record(id).map(|r| r.target_state).unwrap_or_default()
    }

    pub fn set_target_state(&mut self, id: NodeId, state: TargetState) {
        if let Some(r) = self.record_mut(id) {
            r.target_state = state;
        }
    }

    pub fn error_spec(&self, id: NodeId) -> ErrorSpecification {
        self.record(id).map(|r| r.error_spec).unwrap_or_default()
    }

    pub fn set_error_spec(&mut self, id: NodeId, spec: ErrorSpecification) {
        if let Some(r) = self.record_mut(id) {
            r.error_spec = spec;
        }
    }

    pub fn scheduler_cache(&self, id: NodeId) -> SchedulerCache {
        self.record(id).map(|r| r.scheduler_cache).unwrap_or_default()
    }

    pub fn set_scheduler_cache(&mut self, id: NodeId, cache: SchedulerCache) {
        if let Some(r) = self.record_mut(id) {
            r.scheduler_cache = cache;
        }
    }

    /// Reset every node's scheduler cache. Called once between ticks.
    pub fn reset_scheduler_caches(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Occupied(r) = slot {
                r.scheduler_cache = SchedulerCache::default();
            }
        }
    }

    /// Breadth-first traversal starting at `start`, visiting a node before
    /// its children. Used by the target-state controller.
    pub fn walk_breadth_first(&self, start: NodeId, mut visit: impl FnMut(&Self, NodeId)) {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(start);
        while let Some(id) = queue.pop_front() {
            visit(self, id);
            queue.extend(self.children(id).iter().copied());
        }
    }

    /// True iff every ancestor of `id` up to the root is expanded. Used to
    /// validate the invariant "target.expanded implies all ancestors
    /// expanded".
    pub fn ancestors_all_expanded(&self, id: NodeId) -> bool {
        let mut cur = self.parent(id);
        while !cur.is_null() {
            if self.target_state(cur) != TargetState::Expanded {
                return false;
            }
            cur = self.parent(cur);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{leaf_data, root_data};

    #[test]
    fn root_has_depth_zero_and_null_parent() {
        let bvh = Bvh::new(root_data());
        assert_eq!(bvh.depth(bvh.root_id()), 0);
        assert!(bvh.parent(bvh.root_id()).is_null());
    }

    #[test]
    fn child_depth_is_parent_depth_plus_one() {
        let mut bvh = Bvh::new(root_data());
        let root = bvh.root_id();
        let child = bvh.add_node(root, leaf_data()).unwrap();
        let grandchild = bvh.add_node(child, leaf_data()).unwrap();

        assert_eq!(bvh.depth(child), bvh.depth(root) + 1);
        assert_eq!(bvh.depth(grandchild), bvh.depth(child) + 1);
    }

    #[test]
    fn children_listed_in_insertion_order() {
        let mut bvh = Bvh::new(root_data());
        let root = bvh.root_id();
        let a = bvh.add_node(root, leaf_data()).unwrap();
        let b = bvh.add_node(root, leaf_data()).unwrap();
        let c = bvh.add_node(root, leaf_data()).unwrap();
        assert_eq!(bvh.children(root), &[a, b, c]);
    }

    #[test]
    fn remove_node_drops_subtree() {
        let mut bvh = Bvh::new(root_data());
        let root = bvh.root_id();
        let a = bvh.add_node(root, leaf_data()).unwrap();
        let b = bvh.add_node(a, leaf_data()).unwrap();
        assert_eq!(bvh.len(), 3);

        bvh.remove_node(a);
        assert_eq!(bvh.len(), 1);
        assert!(bvh.data(a).is_none());
        assert!(bvh.data(b).is_none());
        assert!(bvh.children(root).is_empty());
    }

    #[test]
    fn freed_slots_are_reused_with_new_generation() {
        let mut bvh = Bvh::new(root_data());
        let root = bvh.root_id();
        let a = bvh.add_node(root, leaf_data()).unwrap();
        bvh.remove_node(a);
        let b = bvh.add_node(root, leaf_data()).unwrap();

        // Same slot index reused, but `a` (the stale handle) must not
        // resolve to `b`'s data.
        assert_eq!(a.index_for_test(), b.index_for_test());
        assert_ne!(a, b);
        assert!(bvh.data(a).is_none());
        assert!(bvh.data(b).is_some());
    }

    #[test]
    fn mount_and_unmount_round_trip() {
        let mut bvh = Bvh::new(root_data());
        let source = crate::DataSourceId::new_for_test(1);
        let ids = bvh.mount(source, vec![leaf_data(), leaf_data()]).unwrap();
        assert_eq!(bvh.len(), 3);
        assert_eq!(bvh.children(bvh.root_id()).len(), 2);

        bvh.unmount(source);
        assert_eq!(bvh.len(), 1);
        for id in ids {
            assert!(bvh.data(id).is_none());
        }
    }

    #[test]
    fn content_node_id_bound_once() {
        let mut bvh = Bvh::new(root_data());
        let root = bvh.root_id();
        let child = bvh.add_node(root, leaf_data()).unwrap();
        let content = bvh.data(child).unwrap().content.as_ref().unwrap();
        assert_eq!(content.node_id(), Some(child));
    }

    #[test]
    fn ancestors_all_expanded_detects_collapsed_ancestor() {
        let mut bvh = Bvh::new(root_data());
        let root = bvh.root_id();
        let a = bvh.add_node(root, leaf_data()).unwrap();
        let b = bvh.add_node(a, leaf_data()).unwrap();

        bvh.set_target_state(root, TargetState::Expanded);
        bvh.set_target_state(a, TargetState::Collapsed);
        assert!(!bvh.ancestors_all_expanded(b));

        bvh.set_target_state(a, TargetState::Expanded);
        assert!(bvh.ancestors_all_expanded(b));
    }
}

//! The expansion scheduler: drives current state towards target state under
//! a per-tick concurrency budget.
//!
//! Two phases per tick:
//!
//! 1. **Load/unload reconciliation.** Walk the BVH, compare each node's
//!    target state against its current state, and enqueue the nodes that
//!    differ into a priority queue ordered by screen-space error (so the
//!    most visually important mismatches are serviced first when the
//!    concurrency budget can't cover everything). Pop from the queue,
//!    issuing `load`/`unload` through the [`NodeContentManager`] until the
//!    budget is exhausted; anything left over simply gets re-enqueued next
//!    tick, since it's still mismatched.
//! 2. **Visibility reconciliation.** A bottom-up pass sets each loaded
//!    node's desired visibility: `Add`-refined nodes are visible whenever
//!    loaded and expanded; `Replace`-refined nodes stay visible until every
//!    child has itself finished loading and is expanded, so there's never a
//!    visible gap while children stream in.
//!
//! Cancellation is cooperative, not preemptive: a load that's in flight when
//! its target flips to collapsed is allowed to finish. Once it lands
//! (`current.loaded == true` with `target == Collapsed`), the very next
//! reconciliation pass sees the mismatch and issues an unload — the same
//! code path as any other collapse, no special-cased cancel branch needed.

use crate::bvh::{Bvh, RefinementMode, TargetState};
use crate::command::IdGenerator;
use crate::config::StreamingConfig;
use crate::content_manager::NodeContentManager;
use crate::content_type::LoaderTable;
use crate::error::TileStreamResult;
use crate::fetch::SharedFetcher;
use crate::node_id::NodeId;
use crate::priority_queue::PriorityQueue;

pub struct ExpansionScheduler {
    queue: PriorityQueue<NodeId>,
}

impl ExpansionScheduler {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
        }
    }

    /// Run one scheduling tick.
    pub fn tick(
        &mut self,
        bvh: &mut Bvh,
        content: &mut NodeContentManager,
        loaders: &LoaderTable,
        fetcher: &SharedFetcher,
        config: &StreamingConfig,
        ids: &IdGenerator,
    ) -> TileStreamResult<()> {
        if config.streaming_mode == crate::config::StreamingMode::Paused {
            tracing::trace!("scheduler tick skipped: streaming paused");
            return Ok(());
        }

        self.queue.clear();
        collect_mismatches(bvh, bvh.root_id(), &mut self.queue);

        let mut budget = config
            .maximum_simultaneous_content_requests
            .saturating_sub(content.pending_count());
        tracing::trace!(mismatches = self.queue.len(), budget, "scheduler tick start");

        while let Some(node) = self.queue.pop_min() {
            let target = bvh.target_state(node);
            let current = bvh.current_state(node);
            match (target, current.loaded) {
                (TargetState::Expanded, false) => {
                    if content.has_pending(node) {
                        continue;
                    }
                    if budget == 0 {
                        continue;
                    }
                    content.load(bvh, node, loaders, fetcher)?;
                    budget -= 1;
                }
                (TargetState::Collapsed, true) => {
                    if !content.has_pending(node) {
                        content.unload(node)?;
                    }
                }
                _ => {}
            }
        }

        content.process_all(bvh, ids)?;

        // A load whose target flipped to collapsed while in flight lands
        // here as loaded-but-unwanted; unload it immediately rather than
        // waiting a whole extra tick.
        let mut cancelled = Vec::new();
        collect_cancelled(bvh, bvh.root_id(), &mut cancelled);
        for node in cancelled {
            if !content.has_pending(node) {
                content.unload(node)?;
            }
        }
        content.process_all(bvh, ids)?;

        reconcile_visibility(bvh, content, bvh.root_id())?;
        content.process_all(bvh, ids)?;

        Ok(())
    }
}

impl Default for ExpansionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_mismatches(bvh: &Bvh, node: NodeId, queue: &mut PriorityQueue<NodeId>) {
    bvh.walk_breadth_first(node, |bvh, id| {
        let target = bvh.target_state(id);
        let current = bvh.current_state(id);
        let mismatched = match target {
            TargetState::Expanded => !current.loaded,
            TargetState::Collapsed => current.loaded,
        };
        if mismatched {
            // The queue dequeues lowest-priority-first; negate the error so
            // the most visually important mismatch still comes out first.
            let priority = -bvh.error_spec(id).screen_space_error;
            queue.push(id, priority);
        }
    });
}

fn collect_cancelled(bvh: &Bvh, node: NodeId, out: &mut Vec<NodeId>) {
    bvh.walk_breadth_first(node, |bvh, id| {
        if bvh.target_state(id) == TargetState::Collapsed && bvh.current_state(id).loaded {
            out.push(id);
        }
    });
}

/// Bottom-up visibility pass. Returns once every loaded node's visibility
/// has been queued to match its desired state.
fn reconcile_visibility(
    bvh: &mut Bvh,
    content: &mut NodeContentManager,
    node: NodeId,
) -> TileStreamResult<()> {
    let children: Vec<NodeId> = bvh.children(node).to_vec();
    for child in &children {
        reconcile_visibility(bvh, content, *child)?;
    }

    let Some(data) = bvh.data(node) else {
        return Ok(());
    };
    let current = bvh.current_state(node);
    if !current.loaded {
        return Ok(());
    }

    let want_visible = match bvh.target_state(node) {
        TargetState::Collapsed => false,
        TargetState::Expanded => {
            if data.refinement_mode == RefinementMode::Replace && !children.is_empty() {
                let children_ready = children.iter().all(|&c| {
                    bvh.current_state(c).loaded && bvh.target_state(c) == TargetState::Expanded
                });
                !children_ready
            } else {
                true
            }
        }
    };

    if current.visible != want_visible {
        content.update_visibility(node, want_visible)?;
    }
    Ok(())
}

//! Target-state controller: decides, once per tick, which nodes *should* be
//! expanded given the current observers.
//!
//! A top-down breadth-first walk from the BVH root, computing a
//! screen-space error per node per observer and keeping the worst (largest)
//! across observers. Mirrors the clearance-distance/SSE math real 3D Tiles
//! clients use: `sse = (geometricError * viewportHeightPx) / (denom *
//! distance)`, where `denom = 2 * tan(fovY / 2)`. A node only gets visited
//! if its parent was expanded — collapsed subtrees keep last tick's target
//! state, satisfying the invariant that an expanded node's ancestors are
//! always expanded too.

use crate::bvh::{Bvh, ErrorSpecification, TargetState};
use crate::content_type::LoaderTable;
use crate::node_id::NodeId;

/// Per-frame camera parameters for one observer.
pub trait Observer {
    fn position(&self) -> [f64; 3];
    fn viewport_height_px(&self) -> f64;
    fn vertical_fov_radians(&self) -> f64;
}

/// Distance from `observer_pos` to the nearest point on a sphere; floored at
/// a small epsilon so a node straddling the observer never divides by zero.
pub fn sphere_clearance_distance(observer_pos: [f64; 3], center: [f64; 3], radius: f64) -> f64 {
    let dx = observer_pos[0] - center[0];
    let dy = observer_pos[1] - center[1];
    let dz = observer_pos[2] - center[2];
    let distance_to_center = (dx * dx + dy * dy + dz * dz).sqrt();
    (distance_to_center - radius).max(1e-3)
}

/// Screen-space error of a node with the given geometric error, as seen by
/// an observer at `distance` with viewport height `viewport_height_px` and
/// vertical field of view `fov_y_radians`.
pub fn compute_sse(
    geometric_error: f64,
    viewport_height_px: f64,
    fov_y_radians: f64,
    distance: f64,
) -> f64 {
    let denom = 2.0 * (fov_y_radians / 2.0).tan();
    (geometric_error * viewport_height_px) / (denom * distance)
}

pub struct TargetStateController {
    pub sse_threshold: f64,
}

impl TargetStateController {
    pub fn new(sse_threshold: f64) -> Self {
        Self { sse_threshold }
    }

    /// Recompute every visited node's `ErrorSpecification` and `TargetState`
    /// against `observers`. Nodes whose content is marked `always_expand`
    /// (e.g. an unrefined tileset root) are always expanded regardless of
    /// SSE.
    pub fn update(&self, bvh: &mut Bvh, observers: &[Box<dyn Observer>], loaders: &LoaderTable) {
        let root = bvh.root_id();
        self.visit(bvh, root, observers, loaders);
    }

    fn visit(
        &self,
        bvh: &mut Bvh,
        node: NodeId,
        observers: &[Box<dyn Observer>],
        loaders: &LoaderTable,
    ) {
        let Some(data) = bvh.data(node) else { return };
        let (center, radius) = data.bounds.bounding_sphere();
        let geometric_error = data.geometric_error as f64;
        let always_expand = data
            .content
            .as_ref()
            .map(|c| c.always_expand)
            .unwrap_or(false);

        let worst_sse = observers
            .iter()
            .map(|observer| {
                let distance = sphere_clearance_distance(observer.position(), center, radius);
                compute_sse(
                    geometric_error,
                    observer.viewport_height_px(),
                    observer.vertical_fov_radians(),
                    distance,
                )
            })
            .fold(0.0_f64, f64::max);

        bvh.set_error_spec(
            node,
            ErrorSpecification {
                screen_space_error: worst_sse,
            },
        );

        let wants_expansion =
            always_expand || observers.is_empty() || worst_sse > self.sse_threshold;
        // A node can't leapfrog past children whose content has no
        // registered loader — it would expand past data it can never
        // actually resolve, so it stays collapsed instead.
        let expanded = wants_expansion && children_resolvable(bvh, node, loaders);
        bvh.set_target_state(
            node,
            if expanded {
                TargetState::Expanded
            } else {
                TargetState::Collapsed
            },
        );

        if expanded {
            for child in bvh.children(node).to_vec() {
                self.visit(bvh, child, observers, loaders);
            }
        }
    }
}

/// True if every mounted child of `node` either has no content (a pure
/// structural node) or content whose type has a registered loader. A node
/// with no children yet is vacuously resolvable — it's the node's own
/// content, not its children's, that drives whether it can load.
fn children_resolvable(bvh: &Bvh, node: NodeId, loaders: &LoaderTable) -> bool {
    bvh.children(node).iter().all(|&child| {
        match bvh.data(child).and_then(|d| d.content.as_ref()) {
            Some(content) => loaders.is_registered(content.content_type),
            None => true,
        }
    })
}

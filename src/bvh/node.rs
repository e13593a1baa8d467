//! Per-node data types stored in the BVH arena.

use crate::content_type::ContentType;
use crate::node_id::NodeId;

/// Axis-aligned double-precision bounds, or one of the two alternate shapes
/// the OGC 3D Tiles format allows. Kept as an enum rather than always an AABB
/// because the target-state controller's `error(observer, bounds)` and the
/// mesh-editing plane cut both need the tightest shape available, and OGC
/// tilesets commonly ship sphere/region volumes directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    /// Center + three half-length axis vectors (an oriented box).
    Box {
        center: [f64; 3],
        half_axes: [[f64; 3]; 3],
    },
    /// Center + radius.
    Sphere { center: [f64; 3], radius: f64 },
    /// Geodetic region: [west, south, east, north, min_height, max_height]
    /// in radians/meters, per EPSG:4979.
    Region {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        min_height: f64,
        max_height: f64,
    },
}

impl BoundingVolume {
    /// Cheapest conservative bounding sphere for any of the three shapes.
    pub fn bounding_sphere(&self) -> ([f64; 3], f64) {
        match *self {
            BoundingVolume::Sphere { center, radius } => (center, radius),
            BoundingVolume::Box { center, half_axes } => {
                let radius = half_axes
                    .iter()
                    .map(|a| (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt())
                    .sum();
                (center, radius)
            }
            BoundingVolume::Region {
                west,
                south,
                east,
                north,
                min_height,
                max_height,
            } => {
                // Not geodetically exact — adequate as a coarse conservative
                // sphere for screen-space-error estimation; exact WGS84
                // projection is an external collaborator (geodetic math).
                let center = [
                    (west + east) / 2.0,
                    (south + north) / 2.0,
                    (min_height + max_height) / 2.0,
                ];
                let radius = ((east - west).abs() + (north - south).abs() + (max_height - min_height).abs())
                    .max(1.0);
                (center, radius)
            }
        }
    }
}

/// `add` (parent stays visible alongside loaded children) or `replace`
/// (parent is hidden once all children are loaded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementMode {
    Add,
    Replace,
}

/// Fixed-size per-node spatial/refinement data.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub bounds: BoundingVolume,
    pub geometric_error: f32,
    pub refinement_mode: RefinementMode,
    /// Row-major 4x4 double-precision transform relative to the parent.
    pub transform: [[f64; 4]; 4],
    pub content: Option<NodeContent>,
}

impl NodeData {
    pub fn identity_transform() -> [[f64; 4]; 4] {
        let mut m = [[0.0; 4]; 4];
        for i in 0..4 {
            m[i][i] = 1.0;
        }
        m
    }
}

/// The loadable payload a format loader consumes, plus the invariant-tracked
/// back-pointer to the node that owns it.
#[derive(Debug, Clone)]
pub struct NodeContent {
    pub content_type: ContentType,
    pub data_source: crate::DataSourceId,
    pub bounds: BoundingVolume,
    pub geometric_error: f32,
    /// A tile that must always be expanded regardless of screen-space error
    /// (e.g. a tileset root awaiting its first refinement decision).
    pub always_expand: bool,
    pub payload: NodeContentPayload,
    /// Set exactly once, by `Bvh::add_node`, and never again.
    node_id: Option<NodeId>,
}

impl NodeContent {
    pub fn new(
        content_type: ContentType,
        data_source: crate::DataSourceId,
        bounds: BoundingVolume,
        geometric_error: f32,
        always_expand: bool,
        payload: NodeContentPayload,
    ) -> Self {
        Self {
            content_type,
            data_source,
            bounds,
            geometric_error,
            always_expand,
            payload,
            node_id: None,
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    /// Bind this content to its owning node. Must only be called once; a
    /// second call is an `InvariantViolation` (double-set node id).
    pub(crate) fn bind_node_id(
        &mut self,
        id: NodeId,
    ) -> Result<(), crate::error::InvariantViolation> {
        match self.node_id {
            None => {
                self.node_id = Some(id);
                Ok(())
            }
            Some(_) => Err(crate::error::InvariantViolation::ContentNodeIdAlreadySet(id)),
        }
    }
}

/// Subtype data carried by [`NodeContent`]: either a set of resolvable URIs
/// or an inline payload already in memory.
#[derive(Debug, Clone)]
pub enum NodeContentPayload {
    Uris(Vec<String>),
    Inline(bytes::Bytes),
}

/// Two-bit `{loaded?, visible?}` field. Transitions are performed only by
/// the content manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentState {
    pub loaded: bool,
    pub visible: bool,
}

impl CurrentState {
    pub const NONE: CurrentState = CurrentState {
        loaded: false,
        visible: false,
    };
}

/// One-bit `{collapsed | expanded}` field. Written only by the target-state
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Collapsed,
    Expanded,
}

impl Default for TargetState {
    fn default() -> Self {
        TargetState::Collapsed
    }
}

/// Screen-space-error choice recorded by the target-state controller for a
/// visited node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorSpecification {
    pub screen_space_error: f64,
}

/// Per-node scratch memoized by the expansion scheduler within a single
/// tick; reset between ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerCache {
    pub enqueued_this_tick: bool,
    pub tick_priority: f64,
}

/// A node plus its not-yet-mounted inline subtree, as produced by a loader
/// that expands one fetch into many nodes (the tileset-json loader's
/// nested-tile document). `Bvh::mount_subtree` walks this to create the
/// matching chain of BVH parent/child edges.
#[derive(Debug, Clone)]
pub struct NodeSubtree {
    pub data: NodeData,
    pub children: Vec<NodeSubtree>,
}

//! Mesh-editing utility used by format loaders that must reshape geometry
//! before it reaches the instantiator (clipping a batched tile to a
//! partition boundary, building a skirt around a terrain tile's edge).
//!
//! Vertex and index buffers grow by doubling, like the BVH's own backing
//! `Vec`s, rather than growing by a fixed increment — cheap amortized
//! pushes at the cost of occasional over-allocation.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: [f32; 3],
    pub d: f32,
}

impl Plane {
    /// Signed distance from `point` to the plane; positive is the side the
    /// normal points to.
    pub fn signed_distance(&self, point: [f32; 3]) -> f32 {
        dot(self.normal, point) + self.d
    }
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn lerp3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// An indexed triangle mesh. Indices are always a multiple of 3 (one triplet
/// per triangle).
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn reserve_doubling(buf_len: usize, buf_cap: usize, additional: usize) -> usize {
        if buf_len + additional <= buf_cap {
            0
        } else {
            (buf_cap.max(1) * 2).max(buf_len + additional) - buf_cap
        }
    }

    pub fn push_vertex(&mut self, v: [f32; 3]) -> u32 {
        let extra = Self::reserve_doubling(self.vertices.len(), self.vertices.capacity(), 1);
        if extra > 0 {
            self.vertices.reserve(extra);
        }
        self.vertices.push(v);
        (self.vertices.len() - 1) as u32
    }

    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        let extra = Self::reserve_doubling(self.indices.len(), self.indices.capacity(), 3);
        if extra > 0 {
            self.indices.reserve(extra);
        }
        self.indices.extend_from_slice(&[a, b, c]);
    }

    pub fn triangle(&self, i: usize) -> [u32; 3] {
        [
            self.indices[i * 3],
            self.indices[i * 3 + 1],
            self.indices[i * 3 + 2],
        ]
    }

    /// Sum of triangle areas (2D-projected via cross product magnitude / 2).
    pub fn total_area(&self) -> f32 {
        (0..self.triangle_count())
            .map(|i| {
                let [a, b, c] = self.triangle(i);
                triangle_area(
                    self.vertices[a as usize],
                    self.vertices[b as usize],
                    self.vertices[c as usize],
                )
            })
            .sum()
    }
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn length(v: [f32; 3]) -> f32 {
    dot(v, v).sqrt()
}

fn triangle_area(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> f32 {
    length(cross(sub(b, a), sub(c, a))) * 0.5
}

/// Output of [`cut`]: the geometry on each side of the plane, plus the
/// edges the plane introduced (as vertex index pairs into `positive`) so a
/// caller can close the hole left behind with [`edge_extrude`].
pub struct CutResult {
    pub positive: Mesh,
    pub negative: Mesh,
    pub cut_edges: Vec<(u32, u32)>,
}

/// Partition `mesh` against `plane`: `positive` gets the geometry on the
/// side the normal points to, `negative` gets the rest. Triangles fully on
/// one side pass through unchanged to that side; triangles straddling the
/// plane are split, with the crossing edges getting new, interpolated
/// vertices on both sides.
pub fn cut(mesh: &Mesh, plane: Plane) -> CutResult {
    let mut positive = Mesh::new();
    let mut negative = Mesh::new();
    let mut cut_edges = Vec::new();

    for i in 0..mesh.triangle_count() {
        let [ia, ib, ic] = mesh.triangle(i);
        let verts = [
            mesh.vertices[ia as usize],
            mesh.vertices[ib as usize],
            mesh.vertices[ic as usize],
        ];
        let dist = verts.map(|v| plane.signed_distance(v));
        let inside: Vec<usize> = (0..3).filter(|&k| dist[k] >= 0.0).collect();

        match inside.len() {
            0 => {
                let ids = verts.map(|v| negative.push_vertex(v));
                negative.push_triangle(ids[0], ids[1], ids[2]);
            }
            3 => {
                let ids = verts.map(|v| positive.push_vertex(v));
                positive.push_triangle(ids[0], ids[1], ids[2]);
            }
            1 | 2 => {
                cut_edges.push(split_triangle(&mut positive, &mut negative, verts, dist, &inside));
            }
            _ => unreachable!(),
        }
    }

    CutResult {
        positive,
        negative,
        cut_edges,
    }
}

/// Splits one straddling triangle, pushing the kept fragment to `positive`
/// and the discarded fragment to `negative`. Returns the cut edge
/// introduced, as indices into `positive`.
fn split_triangle(
    positive: &mut Mesh,
    negative: &mut Mesh,
    verts: [[f32; 3]; 3],
    dist: [f32; 3],
    inside: &[usize],
) -> (u32, u32) {
    let edge_cross = |i: usize, j: usize| -> [f32; 3] {
        let t = dist[i] / (dist[i] - dist[j]);
        lerp3(verts[i], verts[j], t)
    };

    if inside.len() == 1 {
        let i = inside[0];
        let (j, k) = other_two(i);
        let p_ij = edge_cross(i, j);
        let p_ik = edge_cross(i, k);

        let vi = positive.push_vertex(verts[i]);
        let vij = positive.push_vertex(p_ij);
        let vik = positive.push_vertex(p_ik);
        positive.push_triangle(vi, vij, vik);

        let vj = negative.push_vertex(verts[j]);
        let vk = negative.push_vertex(verts[k]);
        let nik = negative.push_vertex(p_ik);
        let nij = negative.push_vertex(p_ij);
        negative.push_triangle(vj, vk, nik);
        negative.push_triangle(vj, nik, nij);

        (vij, vik)
    } else {
        let outside = (0..3).find(|k| !inside.contains(k)).unwrap();
        let (i, j) = other_two(outside);
        let p_i = edge_cross(i, outside);
        let p_j = edge_cross(j, outside);

        let vi = positive.push_vertex(verts[i]);
        let vj = positive.push_vertex(verts[j]);
        let pj = positive.push_vertex(p_j);
        let pi = positive.push_vertex(p_i);
        positive.push_triangle(vi, vj, pj);
        positive.push_triangle(vi, pj, pi);

        let npj = negative.push_vertex(p_j);
        let noutside = negative.push_vertex(verts[outside]);
        let npi = negative.push_vertex(p_i);
        negative.push_triangle(npj, noutside, npi);

        (pj, pi)
    }
}

fn other_two(i: usize) -> (usize, usize) {
    match i {
        0 => (1, 2),
        1 => (0, 2),
        2 => (0, 1),
        _ => unreachable!(),
    }
}

/// Duplicate a boundary edge (given as a vertex index pair in winding
/// order) offset by `direction`, and stitch a winding-consistent quad
/// between the original edge and its duplicate.
pub fn edge_extrude(mesh: &mut Mesh, edge: (u32, u32), direction: [f32; 3]) {
    let (a, b) = edge;
    let pa = mesh.vertices[a as usize];
    let pb = mesh.vertices[b as usize];
    let pa2 = [pa[0] + direction[0], pa[1] + direction[1], pa[2] + direction[2]];
    let pb2 = [pb[0] + direction[0], pb[1] + direction[1], pb[2] + direction[2]];
    let a2 = mesh.push_vertex(pa2);
    let b2 = mesh.push_vertex(pb2);
    // Winding matches the original a->b edge direction so the extruded
    // quad's outward normal is consistent with the source face.
    mesh.push_triangle(a, b, b2);
    mesh.push_triangle(a, b2, a2);
}

/// Concatenate every mesh in `meshes` into one, offsetting indices, and
/// consume the inputs (the "dispose" half of combine-and-dispose: callers
/// must not keep using the source meshes afterwards).
pub fn combine_and_dispose(meshes: Vec<Mesh>) -> Mesh {
    let mut out = Mesh::new();
    for mesh in meshes {
        let base = out.vertices.len() as u32;
        out.vertices.extend(mesh.vertices);
        out.indices.extend(mesh.indices.into_iter().map(|i| i + base));
    }
    out
}

/// Replace `target`'s buffers with `source`'s, reusing `target`'s
/// allocation when it's already large enough instead of dropping and
/// reallocating.
pub fn assign_to_mesh(target: &mut Mesh, source: Mesh) {
    target.vertices.clear();
    target.vertices.extend(source.vertices);
    target.indices.clear();
    target.indices.extend(source.indices);
}

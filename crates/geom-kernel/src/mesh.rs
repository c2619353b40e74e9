//! Mesh-level helpers shared by construction, booleans and validation:
//! vertex welding, integral properties, polygon triangulation and
//! rigid transforms.

use std::collections::HashMap;

use nalgebra::Vector3;

use anvil_types::Aabb;

use crate::types::{MassProperties, SolidBrep, Triangle};

/// Welding quantum, in millimetres. Coordinates are snapped to this grid
/// when rebuilding a mesh, so numerically-identical points produced by
/// different plane intersections collapse to one vertex.
pub const WELD_QUANTUM: f64 = 1e-7;

/// Triangles with less area than this are dropped as slivers.
pub const SLIVER_AREA: f64 = 1e-12;

fn weld_key(p: [f64; 3]) -> [i64; 3] {
    [
        (p[0] / WELD_QUANTUM).round() as i64,
        (p[1] / WELD_QUANTUM).round() as i64,
        (p[2] / WELD_QUANTUM).round() as i64,
    ]
}

/// Incrementally welds positions while triangles are appended.
#[derive(Default)]
pub struct MeshBuilder {
    positions: Vec<[f64; 3]>,
    lookup: HashMap<[i64; 3], u32>,
    triangles: Vec<Triangle>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex(&mut self, p: [f64; 3]) -> u32 {
        let key = weld_key(p);
        if let Some(&idx) = self.lookup.get(&key) {
            return idx;
        }
        let idx = self.positions.len() as u32;
        self.positions.push(p);
        self.lookup.insert(key, idx);
        idx
    }

    /// Append a triangle, dropping degenerate ones.
    pub fn triangle(&mut self, a: [f64; 3], b: [f64; 3], c: [f64; 3], face: u32) {
        let ia = self.vertex(a);
        let ib = self.vertex(b);
        let ic = self.vertex(c);
        if ia == ib || ib == ic || ic == ia {
            return;
        }
        if triangle_area(a, b, c) < SLIVER_AREA {
            return;
        }
        self.triangles.push(Triangle {
            v: [ia, ib, ic],
            face,
        });
    }

    /// Append a convex polygon as a triangle fan.
    pub fn convex_polygon(&mut self, points: &[[f64; 3]], face: u32) {
        for i in 1..points.len().saturating_sub(1) {
            self.triangle(points[0], points[i], points[i + 1], face);
        }
    }

    pub fn finish(self, faces: Vec<crate::types::FaceInfo>) -> SolidBrep {
        SolidBrep {
            positions: self.positions,
            triangles: self.triangles,
            faces,
        }
    }
}

pub fn triangle_area(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> f64 {
    let ab = Vector3::from(b) - Vector3::from(a);
    let ac = Vector3::from(c) - Vector3::from(a);
    ab.cross(&ac).norm() / 2.0
}

/// Signed volume of the mesh via the divergence theorem. Positive for a
/// closed mesh with outward-facing triangles.
pub fn signed_volume(brep: &SolidBrep) -> f64 {
    let mut six_v = 0.0;
    for t in &brep.triangles {
        let a = Vector3::from(brep.positions[t.v[0] as usize]);
        let b = Vector3::from(brep.positions[t.v[1] as usize]);
        let c = Vector3::from(brep.positions[t.v[2] as usize]);
        six_v += a.dot(&b.cross(&c));
    }
    six_v / 6.0
}

pub fn surface_area(brep: &SolidBrep) -> f64 {
    brep.triangles
        .iter()
        .map(|t| {
            triangle_area(
                brep.positions[t.v[0] as usize],
                brep.positions[t.v[1] as usize],
                brep.positions[t.v[2] as usize],
            )
        })
        .sum()
}

/// Volume, area and centre of mass in one pass.
pub fn mass_properties(brep: &SolidBrep) -> MassProperties {
    let mut six_v = 0.0;
    let mut area = 0.0;
    let mut moment = Vector3::zeros();
    for t in &brep.triangles {
        let a = Vector3::from(brep.positions[t.v[0] as usize]);
        let b = Vector3::from(brep.positions[t.v[1] as usize]);
        let c = Vector3::from(brep.positions[t.v[2] as usize]);
        let det = a.dot(&b.cross(&c));
        six_v += det;
        // Centroid of the origin-tetrahedron weighted by its signed volume.
        moment += (a + b + c) * (det / 24.0);
        area += (b - a).cross(&(c - a)).norm() / 2.0;
    }
    let volume = six_v / 6.0;
    let com = if volume.abs() > 1e-12 {
        moment / volume
    } else {
        Vector3::zeros()
    };
    MassProperties {
        volume,
        surface_area: area,
        center_of_mass: [com.x, com.y, com.z],
    }
}

pub fn bounding_box(brep: &SolidBrep) -> Option<Aabb> {
    Aabb::from_points(brep.positions.iter().copied())
}

/// Per-edge use counts keyed by the undirected vertex pair: (forward uses,
/// backward uses) relative to the pair's canonical ordering.
pub fn edge_uses(brep: &SolidBrep) -> HashMap<(u32, u32), (u32, u32)> {
    let mut uses: HashMap<(u32, u32), (u32, u32)> = HashMap::new();
    for t in &brep.triangles {
        for k in 0..3 {
            let a = t.v[k];
            let b = t.v[(k + 1) % 3];
            if a < b {
                uses.entry((a, b)).or_default().0 += 1;
            } else {
                uses.entry((b, a)).or_default().1 += 1;
            }
        }
    }
    uses
}

/// Euler characteristic V − E + F over the triangulated boundary. Equals
/// 2 − 2g for a closed orientable surface of genus g.
pub fn euler_characteristic(brep: &SolidBrep) -> i64 {
    let mut used = vec![false; brep.positions.len()];
    for t in &brep.triangles {
        for &v in &t.v {
            used[v as usize] = true;
        }
    }
    let v = used.iter().filter(|u| **u).count() as i64;
    let e = edge_uses(brep).len() as i64;
    let f = brep.triangles.len() as i64;
    v - e + f
}

/// Rigid-transform every vertex with rotation `r` (row-major 3×3) and
/// translation `t`.
pub fn transform(brep: &SolidBrep, r: &[[f64; 3]; 3], t: [f64; 3]) -> SolidBrep {
    let mut out = brep.clone();
    for p in &mut out.positions {
        let v = [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ];
        *p = v;
    }
    out
}

pub fn translate(brep: &SolidBrep, t: [f64; 3]) -> SolidBrep {
    transform(brep, &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], t)
}

/// Rotation about an axis through `origin` by `angle` (Rodrigues).
pub fn rotation_matrix(axis: [f64; 3], angle: f64) -> [[f64; 3]; 3] {
    let u = Vector3::from(axis).normalize();
    let (s, c) = angle.sin_cos();
    let ic = 1.0 - c;
    [
        [
            c + u.x * u.x * ic,
            u.x * u.y * ic - u.z * s,
            u.x * u.z * ic + u.y * s,
        ],
        [
            u.y * u.x * ic + u.z * s,
            c + u.y * u.y * ic,
            u.y * u.z * ic - u.x * s,
        ],
        [
            u.z * u.x * ic - u.y * s,
            u.z * u.y * ic + u.x * s,
            c + u.z * u.z * ic,
        ],
    ]
}

pub fn rotate_about(brep: &SolidBrep, origin: [f64; 3], axis: [f64; 3], angle: f64) -> SolidBrep {
    let r = rotation_matrix(axis, angle);
    let o = Vector3::from(origin);
    let ro = Vector3::new(
        r[0][0] * o.x + r[0][1] * o.y + r[0][2] * o.z,
        r[1][0] * o.x + r[1][1] * o.y + r[1][2] * o.z,
        r[2][0] * o.x + r[2][1] * o.y + r[2][2] * o.z,
    );
    let t = o - ro;
    transform(brep, &r, [t.x, t.y, t.z])
}

/// Reflect across the plane through `point` with unit `normal`, flipping
/// triangle winding to keep the result outward-oriented.
pub fn mirror(brep: &SolidBrep, point: [f64; 3], normal: [f64; 3]) -> SolidBrep {
    let n = Vector3::from(normal).normalize();
    let p0 = Vector3::from(point);
    let mut out = brep.clone();
    for p in &mut out.positions {
        let v = Vector3::from(*p);
        let d = (v - p0).dot(&n);
        let m = v - n * (2.0 * d);
        *p = [m.x, m.y, m.z];
    }
    for t in &mut out.triangles {
        t.v.swap(1, 2);
    }
    out
}

/// Flip all triangle windings (inside-out).
pub fn flip(brep: &mut SolidBrep) {
    for t in &mut brep.triangles {
        t.v.swap(1, 2);
    }
}

/// Concatenate two disjoint meshes into one brep, offsetting the second
/// mesh's face tags.
pub fn concat(a: &SolidBrep, b: &SolidBrep) -> SolidBrep {
    let mut builder = MeshBuilder::new();
    for t in &a.triangles {
        builder.triangle(
            a.positions[t.v[0] as usize],
            a.positions[t.v[1] as usize],
            a.positions[t.v[2] as usize],
            t.face,
        );
    }
    let offset = a.faces.len() as u32;
    for t in &b.triangles {
        builder.triangle(
            b.positions[t.v[0] as usize],
            b.positions[t.v[1] as usize],
            b.positions[t.v[2] as usize],
            t.face + offset,
        );
    }
    let mut faces = a.faces.clone();
    faces.extend(b.faces.iter().cloned());
    builder.finish(faces)
}

/// Ear-clipping triangulation of a simple polygon given in CCW order.
/// Returns index triples into `points`.
pub fn triangulate_polygon(points: &[[f64; 2]]) -> Vec<[usize; 3]> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }
    if n == 3 {
        return vec![[0, 1, 2]];
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    let cross = |o: [f64; 2], a: [f64; 2], b: [f64; 2]| -> f64 {
        (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
    };
    let inside = |a: [f64; 2], b: [f64; 2], c: [f64; 2], p: [f64; 2]| -> bool {
        cross(a, b, p) > 0.0 && cross(b, c, p) > 0.0 && cross(c, a, p) > 0.0
    };

    let mut guard = 0usize;
    while indices.len() > 3 && guard < n * n {
        guard += 1;
        let m = indices.len();
        let mut clipped = false;
        for i in 0..m {
            let prev = indices[(i + m - 1) % m];
            let curr = indices[i];
            let next = indices[(i + 1) % m];
            let (a, b, c) = (points[prev], points[curr], points[next]);
            // Reflex corners cannot be ears.
            if cross(a, b, c) <= 1e-15 {
                continue;
            }
            let blocked = indices
                .iter()
                .filter(|&&j| j != prev && j != curr && j != next)
                .any(|&j| inside(a, b, c, points[j]));
            if blocked {
                continue;
            }
            triangles.push([prev, curr, next]);
            indices.remove(i);
            clipped = true;
            break;
        }
        if !clipped {
            // Numerically stuck (collinear run): clip the first corner and
            // let sliver filtering discard it.
            let prev = indices[indices.len() - 1];
            let curr = indices[0];
            let next = indices[1];
            triangles.push([prev, curr, next]);
            indices.remove(0);
        }
    }
    if indices.len() == 3 {
        triangles.push([indices[0], indices[1], indices[2]]);
    }
    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceInfo, SurfaceClass};

    fn unit_box() -> SolidBrep {
        crate::native::NativeKernel::default()
            .primitive_brep(&crate::types::PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [1.0, 1.0, 1.0],
            })
            .unwrap()
    }

    #[test]
    fn box_mass_properties() {
        let b = unit_box();
        let mp = mass_properties(&b);
        assert!((mp.volume - 1.0).abs() < 1e-12);
        assert!((mp.surface_area - 6.0).abs() < 1e-12);
        for axis in 0..3 {
            assert!((mp.center_of_mass[axis] - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn box_euler_characteristic_is_two() {
        assert_eq!(euler_characteristic(&unit_box()), 2);
    }

    #[test]
    fn box_edges_all_paired() {
        for (_, (fwd, bwd)) in edge_uses(&unit_box()) {
            assert_eq!(fwd, 1);
            assert_eq!(bwd, 1);
        }
    }

    #[test]
    fn mirror_preserves_volume_sign() {
        let b = unit_box();
        let m = mirror(&b, [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert!((signed_volume(&m) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn triangulate_concave_polygon() {
        // An L-shape: 6 vertices, area 3.
        let pts = vec![
            [0.0, 0.0],
            [2.0, 0.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 2.0],
            [0.0, 2.0],
        ];
        let tris = triangulate_polygon(&pts);
        assert_eq!(tris.len(), 4);
        let area: f64 = tris
            .iter()
            .map(|t| {
                let a = pts[t[0]];
                let b = pts[t[1]];
                let c = pts[t[2]];
                ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])).abs() / 2.0
            })
            .sum();
        assert!((area - 3.0).abs() < 1e-12);
    }

    #[test]
    fn weld_collapses_nearby_vertices() {
        let mut builder = MeshBuilder::new();
        let a = builder.vertex([0.0, 0.0, 0.0]);
        let b = builder.vertex([1e-9, 0.0, 0.0]);
        assert_eq!(a, b);
        let brep = builder.finish(vec![FaceInfo {
            surface: SurfaceClass::Planar,
        }]);
        assert_eq!(brep.positions.len(), 1);
    }
}

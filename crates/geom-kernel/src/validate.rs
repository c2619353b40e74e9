//! Topology validation of boundary meshes: closure, manifoldness,
//! orientation, degeneracy, Euler consistency and self-intersection.

use std::collections::HashMap;

use nalgebra::Vector3;

use anvil_types::TopologyCode;

use crate::mesh::{self, triangle_area};
use crate::types::SolidBrep;

/// Penetration deeper than this counts as a self-intersection.
const PENETRATION_EPSILON: f64 = 1e-6;

/// Result of validating a solid's topology.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_closed: bool,
    pub is_manifold: bool,
    pub shell_count: usize,
    pub euler_characteristic: i64,
    /// Total genus across shells, when the characteristic is consistent.
    pub genus: Option<u32>,
    pub codes: Vec<TopologyCode>,
    pub messages: Vec<String>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.codes.is_empty()
    }

    fn push(&mut self, code: TopologyCode, message: String) {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
        self.messages.push(message);
    }
}

/// Run the full validation suite on a brep.
pub fn validate(brep: &SolidBrep) -> ValidationReport {
    let mut report = ValidationReport {
        is_closed: true,
        is_manifold: true,
        shell_count: 0,
        euler_characteristic: 0,
        genus: None,
        codes: Vec::new(),
        messages: Vec::new(),
    };

    if brep.triangles.is_empty() {
        report.is_closed = false;
        report.is_manifold = false;
        report.push(
            TopologyCode::OpenShell,
            "solid has no boundary triangles".to_string(),
        );
        return report;
    }

    check_edges(brep, &mut report);
    check_faces(brep, &mut report);
    check_vertices(brep, &mut report);
    check_shells(brep, &mut report);

    if report.is_closed && mesh::signed_volume(brep) < 0.0 {
        report.push(
            TopologyCode::WrongFaceOrientation,
            "negative enclosed volume: normals point inward".to_string(),
        );
    }

    check_self_intersection(brep, &mut report);
    report
}

fn check_edges(brep: &SolidBrep, report: &mut ValidationReport) {
    for ((a, b), (fwd, bwd)) in mesh::edge_uses(brep) {
        let total = fwd + bwd;
        if total == 1 {
            report.is_closed = false;
            report.push(
                TopologyCode::OpenShell,
                format!("edge {a}-{b} bounds only one triangle"),
            );
        } else if total > 2 {
            report.is_manifold = false;
            report.push(
                TopologyCode::NonManifoldEdge,
                format!("edge {a}-{b} is shared by {total} triangles"),
            );
        } else if fwd != 1 || bwd != 1 {
            report.push(
                TopologyCode::WrongFaceOrientation,
                format!("edge {a}-{b} is traversed twice in the same direction"),
            );
        }

        let pa = brep.positions[a as usize];
        let pb = brep.positions[b as usize];
        let len = (Vector3::from(pa) - Vector3::from(pb)).norm();
        if len < 1e-9 {
            report.push(
                TopologyCode::DegenerateEdge,
                format!("edge {a}-{b} has near-zero length"),
            );
        }
    }
}

fn check_faces(brep: &SolidBrep, report: &mut ValidationReport) {
    let mut face_area = vec![0.0f64; brep.faces.len()];
    for t in &brep.triangles {
        if (t.face as usize) < face_area.len() {
            face_area[t.face as usize] += triangle_area(
                brep.positions[t.v[0] as usize],
                brep.positions[t.v[1] as usize],
                brep.positions[t.v[2] as usize],
            );
        }
    }
    for (i, area) in face_area.iter().enumerate() {
        if *area < 1e-9 {
            report.push(
                TopologyCode::DegenerateFace,
                format!("logical face {i} has near-zero area"),
            );
        }
    }
}

/// A vertex is manifold when its incident triangles form one connected fan.
fn check_vertices(brep: &SolidBrep, report: &mut ValidationReport) {
    let mut incident: HashMap<u32, Vec<usize>> = HashMap::new();
    for (ti, t) in brep.triangles.iter().enumerate() {
        for &v in &t.v {
            incident.entry(v).or_default().push(ti);
        }
    }

    for (v, tris) in incident {
        if tris.len() < 2 {
            continue;
        }
        // Union-find over this vertex's triangles, joined through shared edges.
        let mut parent: Vec<usize> = (0..tris.len()).collect();
        fn find(parent: &mut Vec<usize>, i: usize) -> usize {
            if parent[i] != i {
                let root = find(parent, parent[i]);
                parent[i] = root;
            }
            parent[i]
        }
        for i in 0..tris.len() {
            for j in (i + 1)..tris.len() {
                let ta = &brep.triangles[tris[i]];
                let tb = &brep.triangles[tris[j]];
                let shared = ta
                    .v
                    .iter()
                    .filter(|x| tb.v.contains(x))
                    .count();
                if shared >= 2 {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    parent[ri] = rj;
                }
            }
        }
        let mut roots: Vec<usize> = (0..tris.len()).map(|i| find(&mut parent, i)).collect();
        roots.sort_unstable();
        roots.dedup();
        if roots.len() > 1 {
            report.is_manifold = false;
            report.push(
                TopologyCode::NonManifoldVertex,
                format!("vertex {v} joins {} disconnected fans", roots.len()),
            );
        }
    }
}

/// Split triangles into shells and check each shell's Euler characteristic.
fn check_shells(brep: &SolidBrep, report: &mut ValidationReport) {
    let n = brep.triangles.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    let mut by_edge: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (ti, t) in brep.triangles.iter().enumerate() {
        for k in 0..3 {
            let a = t.v[k];
            let b = t.v[(k + 1) % 3];
            let key = if a < b { (a, b) } else { (b, a) };
            by_edge.entry(key).or_default().push(ti);
        }
    }
    for tris in by_edge.values() {
        for pair in tris.windows(2) {
            let (ra, rb) = (find(&mut parent, pair[0]), find(&mut parent, pair[1]));
            parent[ra] = rb;
        }
    }

    let mut shells: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        shells.entry(root).or_default().push(i);
    }
    report.shell_count = shells.len();

    let mut total_chi = 0i64;
    let mut total_genus = 0u32;
    let mut consistent = true;
    for tris in shells.values() {
        let mut verts: Vec<u32> = tris
            .iter()
            .flat_map(|&ti| brep.triangles[ti].v)
            .collect();
        verts.sort_unstable();
        verts.dedup();
        let mut edges: Vec<(u32, u32)> = Vec::new();
        for &ti in tris {
            let t = &brep.triangles[ti];
            for k in 0..3 {
                let a = t.v[k];
                let b = t.v[(k + 1) % 3];
                edges.push(if a < b { (a, b) } else { (b, a) });
            }
        }
        edges.sort_unstable();
        edges.dedup();
        let chi = verts.len() as i64 - edges.len() as i64 + tris.len() as i64;
        total_chi += chi;
        // Closed orientable shells satisfy χ = 2 − 2g.
        if chi > 2 || chi % 2 != 0 {
            consistent = false;
        } else {
            total_genus += ((2 - chi) / 2) as u32;
        }
    }
    report.euler_characteristic = total_chi;
    if consistent && report.is_closed && report.is_manifold {
        report.genus = Some(total_genus);
    } else if !consistent {
        report.push(
            TopologyCode::NonManifoldVertex,
            format!("Euler characteristic {total_chi} inconsistent with a closed surface"),
        );
    }
}

fn check_self_intersection(brep: &SolidBrep, report: &mut ValidationReport) {
    let n = brep.triangles.len();
    let mut boxes: Vec<([f64; 3], [f64; 3], usize)> = Vec::with_capacity(n);
    for (i, t) in brep.triangles.iter().enumerate() {
        let mut lo = [f64::MAX; 3];
        let mut hi = [f64::MIN; 3];
        for &v in &t.v {
            let p = brep.positions[v as usize];
            for a in 0..3 {
                lo[a] = lo[a].min(p[a]);
                hi[a] = hi[a].max(p[a]);
            }
        }
        boxes.push((lo, hi, i));
    }
    boxes.sort_by(|a, b| a.0[0].partial_cmp(&b.0[0]).unwrap_or(std::cmp::Ordering::Equal));

    for i in 0..n {
        let (lo_i, hi_i, ti) = boxes[i];
        for &(lo_j, hi_j, tj) in boxes.iter().skip(i + 1) {
            if lo_j[0] > hi_i[0] {
                break;
            }
            if lo_j[1] > hi_i[1] || hi_j[1] < lo_i[1] || lo_j[2] > hi_i[2] || hi_j[2] < lo_i[2] {
                continue;
            }
            let ta = &brep.triangles[ti];
            let tb = &brep.triangles[tj];
            if ta.v.iter().any(|v| tb.v.contains(v)) {
                continue;
            }
            if triangles_penetrate(brep, ta.v, tb.v) {
                report.push(
                    TopologyCode::SelfIntersection,
                    "boundary triangles penetrate each other".to_string(),
                );
                return;
            }
        }
    }
}

/// True when an edge of one triangle pierces the interior of the other by
/// more than the penetration tolerance. Touching contacts are allowed.
fn triangles_penetrate(brep: &SolidBrep, a: [u32; 3], b: [u32; 3]) -> bool {
    let pa: Vec<Vector3<f64>> = a
        .iter()
        .map(|&v| Vector3::from(brep.positions[v as usize]))
        .collect();
    let pb: Vec<Vector3<f64>> = b
        .iter()
        .map(|&v| Vector3::from(brep.positions[v as usize]))
        .collect();
    edges_pierce(&pa, &pb) || edges_pierce(&pb, &pa)
}

fn edges_pierce(edges_of: &[Vector3<f64>], tri: &[Vector3<f64>]) -> bool {
    let n = (tri[1] - tri[0]).cross(&(tri[2] - tri[0]));
    let norm = n.norm();
    if norm < 1e-15 {
        return false;
    }
    let n = n / norm;
    for k in 0..3 {
        let p = edges_of[k];
        let q = edges_of[(k + 1) % 3];
        let dp = (p - tri[0]).dot(&n);
        let dq = (q - tri[0]).dot(&n);
        if dp.abs() < PENETRATION_EPSILON || dq.abs() < PENETRATION_EPSILON {
            continue;
        }
        if dp * dq > 0.0 {
            continue;
        }
        let t = dp / (dp - dq);
        let x = p + (q - p) * t;
        // Barycentric point-in-triangle with a strict interior margin.
        let v0 = tri[1] - tri[0];
        let v1 = tri[2] - tri[0];
        let v2 = x - tri[0];
        let d00 = v0.dot(&v0);
        let d01 = v0.dot(&v1);
        let d11 = v1.dot(&v1);
        let d20 = v2.dot(&v0);
        let d21 = v2.dot(&v1);
        let denom = d00 * d11 - d01 * d01;
        if denom.abs() < 1e-15 {
            continue;
        }
        let beta = (d11 * d20 - d01 * d21) / denom;
        let gamma = (d00 * d21 - d01 * d20) / denom;
        let alpha = 1.0 - beta - gamma;
        let margin = 1e-6;
        if alpha > margin && beta > margin && gamma > margin {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeKernel;
    use crate::types::{PrimitiveSpec, Triangle};

    fn unit_box() -> SolidBrep {
        NativeKernel::default()
            .primitive_brep(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [1.0, 1.0, 1.0],
            })
            .unwrap()
    }

    #[test]
    fn box_validates_clean() {
        let report = validate(&unit_box());
        assert!(report.valid(), "codes: {:?}", report.messages);
        assert!(report.is_closed);
        assert!(report.is_manifold);
        assert_eq!(report.shell_count, 1);
        assert_eq!(report.euler_characteristic, 2);
        assert_eq!(report.genus, Some(0));
    }

    #[test]
    fn missing_triangle_reports_open_shell() {
        let mut brep = unit_box();
        brep.triangles.pop();
        let report = validate(&brep);
        assert!(!report.is_closed);
        assert!(report.codes.contains(&TopologyCode::OpenShell));
    }

    #[test]
    fn inverted_box_reports_orientation() {
        let mut brep = unit_box();
        crate::mesh::flip(&mut brep);
        let report = validate(&brep);
        assert!(report.codes.contains(&TopologyCode::WrongFaceOrientation));
    }

    #[test]
    fn duplicated_triangle_reports_non_manifold_edge() {
        let mut brep = unit_box();
        let t = brep.triangles[0];
        brep.triangles.push(Triangle { v: t.v, face: t.face });
        let report = validate(&brep);
        assert!(report.codes.contains(&TopologyCode::NonManifoldEdge));
    }

    #[test]
    fn empty_brep_is_invalid() {
        let report = validate(&SolidBrep::default());
        assert!(!report.valid());
    }
}

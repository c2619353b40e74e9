//! Boolean operations on closed triangle meshes via BSP clipping.
//!
//! The classic solid-CSG scheme: build a BSP tree per operand, clip each
//! operand's polygons against the other tree, combine, and re-triangulate.
//! Polygons carry their logical-face tag through every split, so the result
//! keeps CAD-level face identity (a drilled hole contributes one
//! cylindrical face, not hundreds of triangles' worth).

use nalgebra::Vector3;

use crate::mesh::MeshBuilder;
use crate::types::{FaceInfo, KernelError, SolidBrep};

/// Plane-side classification tolerance, in millimetres.
const PLANE_EPSILON: f64 = 1e-5;

const COPLANAR: u8 = 0;
const FRONT: u8 = 1;
const BACK: u8 = 2;
const SPANNING: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BooleanOp {
    Union,
    Subtract,
    Intersect,
}

#[derive(Debug, Clone)]
struct Plane {
    normal: Vector3<f64>,
    w: f64,
}

impl Plane {
    fn from_points(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if len < 1e-12 {
            return None;
        }
        let normal = n / len;
        Some(Plane {
            normal,
            w: normal.dot(&a),
        })
    }

    fn flip(&mut self) {
        self.normal = -self.normal;
        self.w = -self.w;
    }

    fn split_polygon(
        &self,
        polygon: &Polygon,
        coplanar_front: &mut Vec<Polygon>,
        coplanar_back: &mut Vec<Polygon>,
        front: &mut Vec<Polygon>,
        back: &mut Vec<Polygon>,
    ) {
        let mut polygon_type = 0u8;
        let mut types = Vec::with_capacity(polygon.vertices.len());
        for v in &polygon.vertices {
            let t = self.normal.dot(v) - self.w;
            let ty = if t < -PLANE_EPSILON {
                BACK
            } else if t > PLANE_EPSILON {
                FRONT
            } else {
                COPLANAR
            };
            polygon_type |= ty;
            types.push(ty);
        }

        match polygon_type {
            COPLANAR => {
                if self.normal.dot(&polygon.plane.normal) > 0.0 {
                    coplanar_front.push(polygon.clone());
                } else {
                    coplanar_back.push(polygon.clone());
                }
            }
            FRONT => front.push(polygon.clone()),
            BACK => back.push(polygon.clone()),
            _ => {
                let n = polygon.vertices.len();
                let mut f: Vec<Vector3<f64>> = Vec::with_capacity(n + 1);
                let mut b: Vec<Vector3<f64>> = Vec::with_capacity(n + 1);
                for i in 0..n {
                    let j = (i + 1) % n;
                    let (ti, tj) = (types[i], types[j]);
                    let (vi, vj) = (polygon.vertices[i], polygon.vertices[j]);
                    if ti != BACK {
                        f.push(vi);
                    }
                    if ti != FRONT {
                        b.push(vi);
                    }
                    if (ti | tj) == SPANNING {
                        let t = (self.w - self.normal.dot(&vi)) / self.normal.dot(&(vj - vi));
                        let v = vi + (vj - vi) * t;
                        f.push(v);
                        b.push(v);
                    }
                }
                if f.len() >= 3 {
                    front.push(Polygon {
                        vertices: f,
                        plane: polygon.plane.clone(),
                        tag: polygon.tag,
                    });
                }
                if b.len() >= 3 {
                    back.push(Polygon {
                        vertices: b,
                        plane: polygon.plane.clone(),
                        tag: polygon.tag,
                    });
                }
            }
        }
    }
}

/// A convex polygon with a logical-face tag. Splitting a convex polygon by
/// a plane yields convex pieces, so fan triangulation stays valid.
#[derive(Debug, Clone)]
struct Polygon {
    vertices: Vec<Vector3<f64>>,
    plane: Plane,
    tag: u32,
}

impl Polygon {
    fn flip(&mut self) {
        self.vertices.reverse();
        self.plane.flip();
    }
}

#[derive(Default)]
struct Node {
    plane: Option<Plane>,
    front: Option<Box<Node>>,
    back: Option<Box<Node>>,
    polygons: Vec<Polygon>,
}

impl Node {
    fn new(polygons: Vec<Polygon>) -> Self {
        let mut node = Node::default();
        if !polygons.is_empty() {
            node.build(polygons);
        }
        node
    }

    fn invert(&mut self) {
        for p in &mut self.polygons {
            p.flip();
        }
        if let Some(plane) = &mut self.plane {
            plane.flip();
        }
        if let Some(front) = &mut self.front {
            front.invert();
        }
        if let Some(back) = &mut self.back {
            back.invert();
        }
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Remove all polygons in `polygons` that are inside this BSP's solid.
    fn clip_polygons(&self, polygons: Vec<Polygon>) -> Vec<Polygon> {
        let Some(plane) = &self.plane else {
            return polygons;
        };
        let mut front = Vec::new();
        let mut back = Vec::new();
        for polygon in &polygons {
            let mut coplanar_front = Vec::new();
            let mut coplanar_back = Vec::new();
            plane.split_polygon(
                polygon,
                &mut coplanar_front,
                &mut coplanar_back,
                &mut front,
                &mut back,
            );
            front.extend(coplanar_front);
            back.extend(coplanar_back);
        }
        let mut front = match &self.front {
            Some(node) => node.clip_polygons(front),
            None => front,
        };
        let back = match &self.back {
            Some(node) => node.clip_polygons(back),
            // No back subtree: back-side space is inside the solid.
            None => Vec::new(),
        };
        front.extend(back);
        front
    }

    fn clip_to(&mut self, bsp: &Node) {
        self.polygons = bsp.clip_polygons(std::mem::take(&mut self.polygons));
        if let Some(front) = &mut self.front {
            front.clip_to(bsp);
        }
        if let Some(back) = &mut self.back {
            back.clip_to(bsp);
        }
    }

    fn all_polygons(&self) -> Vec<Polygon> {
        let mut out = self.polygons.clone();
        if let Some(front) = &self.front {
            out.extend(front.all_polygons());
        }
        if let Some(back) = &self.back {
            out.extend(back.all_polygons());
        }
        out
    }

    fn build(&mut self, polygons: Vec<Polygon>) {
        if polygons.is_empty() {
            return;
        }
        if self.plane.is_none() {
            self.plane = Some(polygons[0].plane.clone());
        }
        let plane = self.plane.clone().expect("plane set above");
        let mut front = Vec::new();
        let mut back = Vec::new();
        for polygon in &polygons {
            let mut coplanar_front = Vec::new();
            let mut coplanar_back = Vec::new();
            plane.split_polygon(
                polygon,
                &mut coplanar_front,
                &mut coplanar_back,
                &mut front,
                &mut back,
            );
            self.polygons.extend(coplanar_front);
            self.polygons.extend(coplanar_back);
        }
        if !front.is_empty() {
            self.front
                .get_or_insert_with(|| Box::new(Node::default()))
                .build(front);
        }
        if !back.is_empty() {
            self.back
                .get_or_insert_with(|| Box::new(Node::default()))
                .build(back);
        }
    }
}

fn to_polygons(brep: &SolidBrep, tag_offset: u32) -> Vec<Polygon> {
    let mut out = Vec::with_capacity(brep.triangles.len());
    for t in &brep.triangles {
        let a = Vector3::from(brep.positions[t.v[0] as usize]);
        let b = Vector3::from(brep.positions[t.v[1] as usize]);
        let c = Vector3::from(brep.positions[t.v[2] as usize]);
        if let Some(plane) = Plane::from_points(a, b, c) {
            out.push(Polygon {
                vertices: vec![a, b, c],
                plane,
                tag: t.face + tag_offset,
            });
        }
    }
    out
}

/// Rebuild a tagged brep from clipped polygons, compacting the face table
/// to the faces that survived.
fn from_polygons(polygons: &[Polygon], face_table: &[FaceInfo]) -> SolidBrep {
    let mut builder = MeshBuilder::new();
    let mut remap: Vec<Option<u32>> = vec![None; face_table.len()];
    let mut faces: Vec<FaceInfo> = Vec::new();

    let mut tagged: Vec<(usize, u32)> = Vec::new();
    for (i, polygon) in polygons.iter().enumerate() {
        tagged.push((i, polygon.tag));
    }
    // Group output triangles by face so render ranges stay contiguous.
    tagged.sort_by_key(|&(i, tag)| (tag, i));

    for (i, tag) in tagged {
        let polygon = &polygons[i];
        let face = *remap[tag as usize].get_or_insert_with(|| {
            faces.push(face_table[tag as usize].clone());
            (faces.len() - 1) as u32
        });
        let verts: Vec<[f64; 3]> = polygon
            .vertices
            .iter()
            .map(|v| [v.x, v.y, v.z])
            .collect();
        builder.convex_polygon(&verts, face);
    }
    builder.finish(faces)
}

/// Execute a boolean operation between two closed, outward-oriented breps.
pub fn boolean(a: &SolidBrep, b: &SolidBrep, op: BooleanOp) -> Result<SolidBrep, KernelError> {
    if a.is_empty() || b.is_empty() {
        return Err(KernelError::BooleanFailed {
            reason: "operand has no boundary triangles".to_string(),
        });
    }

    let mut face_table = a.faces.clone();
    face_table.extend(b.faces.iter().cloned());

    let mut na = Node::new(to_polygons(a, 0));
    let mut nb = Node::new(to_polygons(b, a.faces.len() as u32));

    let merged = match op {
        BooleanOp::Union => {
            na.clip_to(&nb);
            nb.clip_to(&na);
            nb.invert();
            nb.clip_to(&na);
            nb.invert();
            let mut polys = na.all_polygons();
            polys.extend(nb.all_polygons());
            polys
        }
        BooleanOp::Subtract => {
            na.invert();
            na.clip_to(&nb);
            nb.clip_to(&na);
            nb.invert();
            nb.clip_to(&na);
            nb.invert();
            na.build(nb.all_polygons());
            na.invert();
            na.all_polygons()
        }
        BooleanOp::Intersect => {
            na.invert();
            nb.clip_to(&na);
            nb.invert();
            na.clip_to(&nb);
            nb.clip_to(&na);
            na.build(nb.all_polygons());
            na.invert();
            na.all_polygons()
        }
    };

    Ok(from_polygons(&merged, &face_table))
}

//! The built-in deterministic geometry kernel.
//!
//! Solids are closed triangle meshes with logical-face tags; curved
//! boundaries are discretised at a fixed angular resolution so replaying
//! the same operations reproduces byte-identical breps.

use nalgebra::Vector3;
use tracing::debug;

use crate::csg::{self, BooleanOp};
use crate::mesh::{self, MeshBuilder};
use crate::profile::{PlaneFrame, Profile2d, ProfileEdge};
use crate::traits::Kernel;
use crate::types::{
    FaceInfo, FaceRange, KernelError, MassProperties, PrimitiveSpec, RenderMesh, SolidBrep,
    SurfaceClass, Triangle,
};
use crate::validate::{self, ValidationReport};

/// Sweep path corners sharper than this break the G¹ requirement.
const SWEEP_MAX_CORNER: f64 = std::f64::consts::FRAC_PI_3;

#[derive(Debug, Clone)]
pub struct NativeKernel {
    /// Segments used to discretise a full circle.
    pub angular_segments: usize,
}

impl Default for NativeKernel {
    fn default() -> Self {
        Self {
            angular_segments: 512,
        }
    }
}

impl NativeKernel {
    pub fn new(angular_segments: usize) -> Self {
        Self {
            angular_segments: angular_segments.max(8),
        }
    }

    fn surface_of(edge: &ProfileEdge) -> SurfaceClass {
        match edge {
            ProfileEdge::Segment { .. } => SurfaceClass::Planar,
            ProfileEdge::Arc { .. } | ProfileEdge::Circle { .. } => SurfaceClass::Cylindrical,
        }
    }

    /// Orient the finished mesh outward; construction builds one winding
    /// and this settles which.
    fn orient_outward(mut brep: SolidBrep) -> SolidBrep {
        if mesh::signed_volume(&brep) < 0.0 {
            mesh::flip(&mut brep);
        }
        brep
    }

    fn extrude_brep(
        &self,
        profile: &Profile2d,
        frame: &PlaneFrame,
        direction: [f64; 3],
        distance: f64,
    ) -> Result<SolidBrep, KernelError> {
        if distance.abs() < 1e-6 {
            return Err(KernelError::DegenerateProfile {
                reason: "extrusion distance is below the minimum length".to_string(),
            });
        }
        let dir = Vector3::from(direction);
        if dir.norm() < 1e-12 {
            return Err(KernelError::DegenerateProfile {
                reason: "extrusion direction is a zero vector".to_string(),
            });
        }
        let offset = dir.normalize() * distance;
        let normal = Vector3::from(frame.normal);
        if offset.dot(&normal).abs() < 1e-9 {
            return Err(KernelError::DegenerateProfile {
                reason: "extrusion direction lies in the sketch plane".to_string(),
            });
        }

        let ring = profile.discretize(self.angular_segments)?;
        let m = ring.len();
        let bottom: Vec<[f64; 3]> = ring.iter().map(|(p, _)| frame.to_3d(*p)).collect();
        let top: Vec<[f64; 3]> = bottom
            .iter()
            .map(|p| [p[0] + offset.x, p[1] + offset.y, p[2] + offset.z])
            .collect();

        // One side face per profile edge, then bottom and top caps.
        let mut faces: Vec<FaceInfo> = profile
            .edges
            .iter()
            .map(|e| FaceInfo {
                surface: Self::surface_of(e),
            })
            .collect();
        let bottom_face = faces.len() as u32;
        faces.push(FaceInfo {
            surface: SurfaceClass::Planar,
        });
        let top_face = faces.len() as u32;
        faces.push(FaceInfo {
            surface: SurfaceClass::Planar,
        });

        let mut builder = MeshBuilder::new();
        for i in 0..m {
            let j = (i + 1) % m;
            let tag = ring[i].1;
            builder.triangle(bottom[i], bottom[j], top[j], tag);
            builder.triangle(bottom[i], top[j], top[i], tag);
        }

        let flat: Vec<[f64; 2]> = ring.iter().map(|(p, _)| *p).collect();
        for t in mesh::triangulate_polygon(&flat) {
            // Top cap keeps profile winding, bottom cap reverses it.
            builder.triangle(top[t[0]], top[t[1]], top[t[2]], top_face);
            builder.triangle(bottom[t[0]], bottom[t[2]], bottom[t[1]], bottom_face);
        }

        Ok(Self::orient_outward(builder.finish(faces)))
    }

    fn revolve_brep(
        &self,
        profile: &Profile2d,
        frame: &PlaneFrame,
        axis_origin: [f64; 3],
        axis_direction: [f64; 3],
        angle: f64,
    ) -> Result<SolidBrep, KernelError> {
        if angle.abs() < 1e-6 {
            return Err(KernelError::DegenerateProfile {
                reason: "revolution angle is zero".to_string(),
            });
        }
        let axis = Vector3::from(axis_direction);
        if axis.norm() < 1e-12 {
            return Err(KernelError::DegenerateProfile {
                reason: "revolution axis is a zero vector".to_string(),
            });
        }
        let axis = axis.normalize();
        let origin = Vector3::from(axis_origin);

        let ring = profile.discretize(self.angular_segments)?;
        let base: Vec<Vector3<f64>> = ring
            .iter()
            .map(|(p, _)| Vector3::from(frame.to_3d(*p)))
            .collect();

        // The profile must stay on one side of the axis.
        let mut reference = Vector3::zeros();
        for p in &base {
            let radial = radial_component(*p, origin, axis);
            if radial.norm() > reference.norm() {
                reference = radial;
            }
        }
        if reference.norm() > 1e-9 {
            let e = reference.normalize();
            for p in &base {
                let s = radial_component(*p, origin, axis).dot(&e);
                if s < -1e-9 {
                    return Err(KernelError::InvalidSolid {
                        reason: "profile crosses the revolution axis".to_string(),
                    });
                }
            }
        }

        let full = (angle.abs() - std::f64::consts::TAU).abs() < 1e-9;
        let steps = ((self.angular_segments as f64) * angle.abs() / std::f64::consts::TAU)
            .ceil()
            .max(3.0) as usize;

        // Section rings at each rotation step; for a full turn the last
        // ring lands on the first and welding closes the band loop.
        let mut sections: Vec<Vec<[f64; 3]>> = Vec::with_capacity(steps + 1);
        for k in 0..=steps {
            let theta = angle * (k as f64 / steps as f64);
            let r = mesh::rotation_matrix([axis.x, axis.y, axis.z], theta);
            let sec: Vec<[f64; 3]> = base
                .iter()
                .map(|p| {
                    let d = p - origin;
                    let v = Vector3::new(
                        r[0][0] * d.x + r[0][1] * d.y + r[0][2] * d.z,
                        r[1][0] * d.x + r[1][1] * d.y + r[1][2] * d.z,
                        r[2][0] * d.x + r[2][1] * d.y + r[2][2] * d.z,
                    ) + origin;
                    [v.x, v.y, v.z]
                })
                .collect();
            sections.push(sec);
        }

        let mut faces: Vec<FaceInfo> = profile
            .edges
            .iter()
            .map(|_| FaceInfo {
                surface: SurfaceClass::Revolved,
            })
            .collect();
        let start_face = faces.len() as u32;
        let end_face = faces.len() as u32 + 1;
        if !full {
            faces.push(FaceInfo {
                surface: SurfaceClass::Planar,
            });
            faces.push(FaceInfo {
                surface: SurfaceClass::Planar,
            });
        }

        let m = ring.len();
        let mut builder = MeshBuilder::new();
        for k in 0..steps {
            let (s0, s1) = (&sections[k], &sections[k + 1]);
            for i in 0..m {
                let j = (i + 1) % m;
                let tag = ring[i].1;
                builder.triangle(s0[i], s0[j], s1[j], tag);
                builder.triangle(s0[i], s1[j], s1[i], tag);
            }
        }
        if !full {
            let flat: Vec<[f64; 2]> = ring.iter().map(|(p, _)| *p).collect();
            let first = &sections[0];
            let last = &sections[steps];
            for t in mesh::triangulate_polygon(&flat) {
                builder.triangle(first[t[0]], first[t[2]], first[t[1]], start_face);
                builder.triangle(last[t[0]], last[t[1]], last[t[2]], end_face);
            }
        }

        Ok(Self::orient_outward(builder.finish(faces)))
    }

    fn loft_brep(
        &self,
        sections: &[(Profile2d, PlaneFrame)],
        ruled: bool,
        cap_ends: bool,
    ) -> Result<SolidBrep, KernelError> {
        if sections.len() < 2 {
            return Err(KernelError::DegenerateProfile {
                reason: "loft needs at least two sections".to_string(),
            });
        }

        // Discretise and resample every section to a common vertex count.
        let mut rings: Vec<Vec<[f64; 3]>> = Vec::with_capacity(sections.len());
        let mut count = 0usize;
        let mut raw: Vec<Vec<[f64; 2]>> = Vec::with_capacity(sections.len());
        for (profile, _) in sections {
            let ring = profile.discretize(self.angular_segments)?;
            count = count.max(ring.len());
            raw.push(ring.into_iter().map(|(p, _)| p).collect());
        }
        for (flat, (_, frame)) in raw.iter().zip(sections) {
            let resampled = resample_closed(flat, count);
            rings.push(resampled.iter().map(|p| frame.to_3d(*p)).collect());
        }

        // Align ring start points to avoid twist between sections.
        for k in 1..rings.len() {
            let anchor = Vector3::from(rings[k - 1][0]);
            let best = (0..count)
                .min_by(|&a, &b| {
                    let da = (Vector3::from(rings[k][a]) - anchor).norm();
                    let db = (Vector3::from(rings[k][b]) - anchor).norm();
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            rings[k].rotate_left(best);
        }

        // Smooth lofts interpolate extra rings with Catmull-Rom.
        let rings: Vec<Vec<[f64; 3]>> = if ruled || rings.len() < 3 {
            rings
        } else {
            interpolate_rings(&rings, 4)
        };

        let mut faces = vec![FaceInfo {
            surface: SurfaceClass::Freeform,
        }];
        let side_face = 0u32;
        let start_face = faces.len() as u32;
        let end_face = faces.len() as u32 + 1;
        if cap_ends {
            faces.push(FaceInfo {
                surface: SurfaceClass::Planar,
            });
            faces.push(FaceInfo {
                surface: SurfaceClass::Planar,
            });
        }

        let mut builder = MeshBuilder::new();
        for k in 0..rings.len() - 1 {
            let (s0, s1) = (&rings[k], &rings[k + 1]);
            for i in 0..count {
                let j = (i + 1) % count;
                builder.triangle(s0[i], s0[j], s1[j], side_face);
                builder.triangle(s0[i], s1[j], s1[i], side_face);
            }
        }
        if cap_ends {
            cap_ring(&mut builder, &rings[0], &sections[0].1, start_face, true);
            let last_frame = &sections[sections.len() - 1].1;
            cap_ring(
                &mut builder,
                &rings[rings.len() - 1],
                last_frame,
                end_face,
                false,
            );
        }

        Ok(Self::orient_outward(builder.finish(faces)))
    }

    fn sweep_brep(
        &self,
        profile: &Profile2d,
        path: &[[f64; 3]],
    ) -> Result<SolidBrep, KernelError> {
        let mut pts: Vec<Vector3<f64>> = Vec::with_capacity(path.len());
        for p in path {
            let v = Vector3::from(*p);
            if pts.last().map(|l| (l - v).norm() < 1e-9) != Some(true) {
                pts.push(v);
            }
        }
        if pts.len() < 2 {
            return Err(KernelError::DegenerateProfile {
                reason: "sweep path needs at least two distinct points".to_string(),
            });
        }

        // Tangents, with the G1 corner check.
        let segs: Vec<Vector3<f64>> = pts
            .windows(2)
            .map(|w| (w[1] - w[0]).normalize())
            .collect();
        for pair in segs.windows(2) {
            let corner = pair[0].dot(&pair[1]).clamp(-1.0, 1.0).acos();
            if corner > SWEEP_MAX_CORNER {
                return Err(KernelError::PathNotSmooth {
                    reason: format!("corner of {corner:.3} rad exceeds the continuity limit"),
                });
            }
        }

        // Rotation-minimising frames along the path.
        let mut tangents: Vec<Vector3<f64>> = Vec::with_capacity(pts.len());
        tangents.push(segs[0]);
        for k in 1..pts.len() - 1 {
            tangents.push((segs[k - 1] + segs[k]).normalize());
        }
        tangents.push(segs[segs.len() - 1]);

        let pick = if tangents[0].x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let mut x_axis = pick.cross(&tangents[0]).normalize();
        let ring = profile.discretize(self.angular_segments)?;
        let m = ring.len();

        let mut rings: Vec<Vec<[f64; 3]>> = Vec::with_capacity(pts.len());
        for (k, center) in pts.iter().enumerate() {
            let t = tangents[k];
            // Project the transported x axis off the new tangent.
            x_axis = (x_axis - t * x_axis.dot(&t)).normalize();
            let y_axis = t.cross(&x_axis);
            let sec: Vec<[f64; 3]> = ring
                .iter()
                .map(|(p, _)| {
                    let v = center + x_axis * p[0] + y_axis * p[1];
                    [v.x, v.y, v.z]
                })
                .collect();
            rings.push(sec);
        }

        let mut faces: Vec<FaceInfo> = profile
            .edges
            .iter()
            .map(|_| FaceInfo {
                surface: SurfaceClass::Swept,
            })
            .collect();
        let start_face = faces.len() as u32;
        let end_face = faces.len() as u32 + 1;
        faces.push(FaceInfo {
            surface: SurfaceClass::Planar,
        });
        faces.push(FaceInfo {
            surface: SurfaceClass::Planar,
        });

        let mut builder = MeshBuilder::new();
        for k in 0..rings.len() - 1 {
            let (s0, s1) = (&rings[k], &rings[k + 1]);
            for i in 0..m {
                let j = (i + 1) % m;
                let tag = ring[i].1;
                builder.triangle(s0[i], s0[j], s1[j], tag);
                builder.triangle(s0[i], s1[j], s1[i], tag);
            }
        }
        let flat: Vec<[f64; 2]> = ring.iter().map(|(p, _)| *p).collect();
        let first = &rings[0];
        let last = &rings[rings.len() - 1];
        for t in mesh::triangulate_polygon(&flat) {
            builder.triangle(first[t[0]], first[t[2]], first[t[1]], start_face);
            builder.triangle(last[t[0]], last[t[1]], last[t[2]], end_face);
        }

        Ok(Self::orient_outward(builder.finish(faces)))
    }

    /// Construct a primitive brep. Public for reuse in tests and codecs.
    pub fn primitive_brep(&self, spec: &PrimitiveSpec) -> Result<SolidBrep, KernelError> {
        match spec {
            PrimitiveSpec::Box { corner, dimensions } => self.box_brep(*corner, *dimensions),
            PrimitiveSpec::Cylinder {
                base,
                axis,
                radius,
                height,
            } => {
                let frame = PlaneFrame::from_origin_normal(*base, *axis);
                let profile = Profile2d::circle([0.0, 0.0], *radius);
                self.extrude_brep(&profile, &frame, frame.normal, *height)
            }
            PrimitiveSpec::Sphere { center, radius } => self.sphere_brep(*center, *radius),
            PrimitiveSpec::Cone {
                base,
                axis,
                radius,
                height,
            } => self.cone_brep(*base, *axis, *radius, *height),
        }
    }

    fn box_brep(&self, corner: [f64; 3], dims: [f64; 3]) -> Result<SolidBrep, KernelError> {
        if dims.iter().any(|d| *d < 1e-6) {
            return Err(KernelError::DegenerateProfile {
                reason: "box dimensions must all exceed the minimum length".to_string(),
            });
        }
        let [x0, y0, z0] = corner;
        let [w, h, d] = dims;
        let (x1, y1, z1) = (x0 + w, y0 + h, z0 + d);
        let p = [
            [x0, y0, z0],
            [x1, y0, z0],
            [x1, y1, z0],
            [x0, y1, z0],
            [x0, y0, z1],
            [x1, y0, z1],
            [x1, y1, z1],
            [x0, y1, z1],
        ];
        // Outward-wound quads: bottom, top, front, back, left, right.
        let quads: [[usize; 4]; 6] = [
            [0, 3, 2, 1],
            [4, 5, 6, 7],
            [0, 1, 5, 4],
            [2, 3, 7, 6],
            [0, 4, 7, 3],
            [1, 2, 6, 5],
        ];
        let faces = vec![
            FaceInfo {
                surface: SurfaceClass::Planar
            };
            6
        ];
        let mut builder = MeshBuilder::new();
        for (face, q) in quads.iter().enumerate() {
            builder.triangle(p[q[0]], p[q[1]], p[q[2]], face as u32);
            builder.triangle(p[q[0]], p[q[2]], p[q[3]], face as u32);
        }
        Ok(builder.finish(faces))
    }

    fn sphere_brep(&self, center: [f64; 3], radius: f64) -> Result<SolidBrep, KernelError> {
        if radius < 1e-6 {
            return Err(KernelError::DegenerateProfile {
                reason: "sphere radius below the minimum length".to_string(),
            });
        }
        let slices = self.angular_segments.clamp(16, 96);
        let stacks = slices / 2;
        let c = Vector3::from(center);
        let point = |si: usize, ti: usize| -> [f64; 3] {
            let theta = std::f64::consts::PI * (ti as f64 / stacks as f64);
            let phi = std::f64::consts::TAU * (si as f64 / slices as f64);
            let v = c + Vector3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            );
            [v.x, v.y, v.z]
        };
        let faces = vec![FaceInfo {
            surface: SurfaceClass::Spherical,
        }];
        let mut builder = MeshBuilder::new();
        for ti in 0..stacks {
            for si in 0..slices {
                let sj = (si + 1) % slices;
                let a = point(si, ti);
                let b = point(sj, ti);
                let cc = point(sj, ti + 1);
                let d = point(si, ti + 1);
                builder.triangle(a, cc, b, 0);
                builder.triangle(a, d, cc, 0);
            }
        }
        Ok(Self::orient_outward(builder.finish(faces)))
    }

    fn cone_brep(
        &self,
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
        height: f64,
    ) -> Result<SolidBrep, KernelError> {
        if radius < 1e-6 || height < 1e-6 {
            return Err(KernelError::DegenerateProfile {
                reason: "cone radius and height must exceed the minimum length".to_string(),
            });
        }
        let frame = PlaneFrame::from_origin_normal(base, axis);
        let n = Vector3::from(frame.normal);
        let apex = Vector3::from(base) + n * height;
        let segs = self.angular_segments.max(8);

        let ring: Vec<[f64; 3]> = (0..segs)
            .map(|k| {
                let a = std::f64::consts::TAU * (k as f64 / segs as f64);
                frame.to_3d([radius * a.cos(), radius * a.sin()])
            })
            .collect();

        let faces = vec![
            FaceInfo {
                surface: SurfaceClass::Conical,
            },
            FaceInfo {
                surface: SurfaceClass::Planar,
            },
        ];
        let mut builder = MeshBuilder::new();
        let apex = [apex.x, apex.y, apex.z];
        let center = base;
        for k in 0..segs {
            let j = (k + 1) % segs;
            builder.triangle(ring[k], ring[j], apex, 0);
            builder.triangle(ring[k], center, ring[j], 1);
        }
        Ok(Self::orient_outward(builder.finish(faces)))
    }

    fn boolean(
        &self,
        a: &SolidBrep,
        b: &SolidBrep,
        op: BooleanOp,
    ) -> Result<SolidBrep, KernelError> {
        let out = csg::boolean(a, b, op)?;
        debug!(
            op = ?op,
            in_a = a.triangles.len(),
            in_b = b.triangles.len(),
            out = out.triangles.len(),
            "boolean complete"
        );
        Ok(out)
    }
}

fn radial_component(
    p: Vector3<f64>,
    origin: Vector3<f64>,
    axis: Vector3<f64>,
) -> Vector3<f64> {
    let d = p - origin;
    d - axis * d.dot(&axis)
}

/// Resample a closed polygon to exactly `count` points by arc length.
fn resample_closed(points: &[[f64; 2]], count: usize) -> Vec<[f64; 2]> {
    let n = points.len();
    if n == count {
        return points.to_vec();
    }
    let mut cumulative = Vec::with_capacity(n + 1);
    cumulative.push(0.0);
    let mut total = 0.0;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        total += ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt();
        cumulative.push(total);
    }
    let mut out = Vec::with_capacity(count);
    let mut seg = 0usize;
    for k in 0..count {
        let target = total * (k as f64 / count as f64);
        while seg + 1 < n && cumulative[seg + 1] < target {
            seg += 1;
        }
        let span = cumulative[seg + 1] - cumulative[seg];
        let t = if span > 1e-15 {
            (target - cumulative[seg]) / span
        } else {
            0.0
        };
        let a = points[seg];
        let b = points[(seg + 1) % n];
        out.push([a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]);
    }
    out
}

/// Insert Catmull-Rom interpolated rings between the given ones.
fn interpolate_rings(rings: &[Vec<[f64; 3]>], subdivisions: usize) -> Vec<Vec<[f64; 3]>> {
    let m = rings.len();
    let count = rings[0].len();
    let mut out = Vec::new();
    for k in 0..m - 1 {
        let p0 = &rings[k.saturating_sub(1)];
        let p1 = &rings[k];
        let p2 = &rings[k + 1];
        let p3 = &rings[(k + 2).min(m - 1)];
        for s in 0..subdivisions {
            let t = s as f64 / subdivisions as f64;
            let ring: Vec<[f64; 3]> = (0..count)
                .map(|i| catmull_rom(p0[i], p1[i], p2[i], p3[i], t))
                .collect();
            out.push(ring);
        }
    }
    out.push(rings[m - 1].clone());
    out
}

fn catmull_rom(p0: [f64; 3], p1: [f64; 3], p2: [f64; 3], p3: [f64; 3], t: f64) -> [f64; 3] {
    let mut out = [0.0; 3];
    let t2 = t * t;
    let t3 = t2 * t;
    for a in 0..3 {
        out[a] = 0.5
            * ((2.0 * p1[a])
                + (-p0[a] + p2[a]) * t
                + (2.0 * p0[a] - 5.0 * p1[a] + 4.0 * p2[a] - p3[a]) * t2
                + (-p0[a] + 3.0 * p1[a] - 3.0 * p2[a] + p3[a]) * t3);
    }
    out
}

/// Cap a 3D ring by triangulating its projection into `frame`.
fn cap_ring(
    builder: &mut MeshBuilder,
    ring: &[[f64; 3]],
    frame: &PlaneFrame,
    face: u32,
    reverse: bool,
) {
    let flat: Vec<[f64; 2]> = ring.iter().map(|p| frame.to_2d(*p)).collect();
    for t in mesh::triangulate_polygon(&flat) {
        if reverse {
            builder.triangle(ring[t[0]], ring[t[2]], ring[t[1]], face);
        } else {
            builder.triangle(ring[t[0]], ring[t[1]], ring[t[2]], face);
        }
    }
}

impl Kernel for NativeKernel {
    fn extrude(
        &self,
        profile: &Profile2d,
        frame: &PlaneFrame,
        direction: [f64; 3],
        distance: f64,
    ) -> Result<SolidBrep, KernelError> {
        self.extrude_brep(profile, frame, direction, distance)
    }

    fn revolve(
        &self,
        profile: &Profile2d,
        frame: &PlaneFrame,
        axis_origin: [f64; 3],
        axis_direction: [f64; 3],
        angle: f64,
    ) -> Result<SolidBrep, KernelError> {
        self.revolve_brep(profile, frame, axis_origin, axis_direction, angle)
    }

    fn loft(
        &self,
        sections: &[(Profile2d, PlaneFrame)],
        ruled: bool,
        cap_ends: bool,
    ) -> Result<SolidBrep, KernelError> {
        self.loft_brep(sections, ruled, cap_ends)
    }

    fn sweep(&self, profile: &Profile2d, path: &[[f64; 3]]) -> Result<SolidBrep, KernelError> {
        self.sweep_brep(profile, path)
    }

    fn primitive(&self, spec: &PrimitiveSpec) -> Result<SolidBrep, KernelError> {
        self.primitive_brep(spec)
    }

    fn fuse(&self, a: &SolidBrep, b: &SolidBrep) -> Result<SolidBrep, KernelError> {
        self.boolean(a, b, BooleanOp::Union)
    }

    fn cut(&self, a: &SolidBrep, b: &SolidBrep) -> Result<SolidBrep, KernelError> {
        self.boolean(a, b, BooleanOp::Subtract)
    }

    fn common(&self, a: &SolidBrep, b: &SolidBrep) -> Result<SolidBrep, KernelError> {
        self.boolean(a, b, BooleanOp::Intersect)
    }

    fn transformed(
        &self,
        solid: &SolidBrep,
        rotation: &[[f64; 3]; 3],
        translation: [f64; 3],
    ) -> SolidBrep {
        mesh::transform(solid, rotation, translation)
    }

    fn mirrored(
        &self,
        solid: &SolidBrep,
        plane_point: [f64; 3],
        plane_normal: [f64; 3],
    ) -> SolidBrep {
        mesh::mirror(solid, plane_point, plane_normal)
    }

    fn mass_properties(&self, solid: &SolidBrep) -> MassProperties {
        mesh::mass_properties(solid)
    }

    fn validate(&self, solid: &SolidBrep) -> ValidationReport {
        validate::validate(solid)
    }

    fn tessellate(
        &self,
        solid: &SolidBrep,
        _linear_deflection: f64,
        _angular_deflection: f64,
    ) -> RenderMesh {
        // The brep is already a triangle boundary at kernel resolution;
        // tessellation re-emits it flat-shaded, grouped by logical face.
        let mut order: Vec<&Triangle> = solid.triangles.iter().collect();
        order.sort_by_key(|t| t.face);

        let mut out = RenderMesh::default();
        let mut current_face: Option<u32> = None;
        let mut range_start = 0u32;
        for t in order {
            if current_face != Some(t.face) {
                if let Some(face) = current_face {
                    out.face_ranges.push(FaceRange {
                        face,
                        start_index: range_start,
                        end_index: out.indices.len() as u32,
                    });
                }
                current_face = Some(t.face);
                range_start = out.indices.len() as u32;
            }
            let a = Vector3::from(solid.positions[t.v[0] as usize]);
            let b = Vector3::from(solid.positions[t.v[1] as usize]);
            let c = Vector3::from(solid.positions[t.v[2] as usize]);
            let n = (b - a).cross(&(c - a));
            let n = if n.norm() > 1e-15 {
                n.normalize()
            } else {
                Vector3::z()
            };
            let base = (out.vertices.len() / 3) as u32;
            for p in [a, b, c] {
                out.vertices
                    .extend_from_slice(&[p.x as f32, p.y as f32, p.z as f32]);
                out.normals
                    .extend_from_slice(&[n.x as f32, n.y as f32, n.z as f32]);
            }
            out.indices.extend_from_slice(&[base, base + 1, base + 2]);
        }
        if let Some(face) = current_face {
            out.face_ranges.push(FaceRange {
                face,
                start_index: range_start,
                end_index: out.indices.len() as u32,
            });
        }
        out
    }

    fn encode_brep(&self, solid: &SolidBrep) -> Result<Vec<u8>, KernelError> {
        bincode::serialize(solid).map_err(|e| KernelError::Codec {
            reason: e.to_string(),
        })
    }

    fn decode_brep(&self, bytes: &[u8]) -> Result<SolidBrep, KernelError> {
        bincode::deserialize(bytes).map_err(|e| KernelError::Codec {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kernel() -> NativeKernel {
        NativeKernel::default()
    }

    #[test]
    fn extrude_rectangle_exact_properties() {
        let profile = Profile2d::rectangle(0.0, 0.0, 10.0, 5.0);
        let solid = kernel()
            .extrude(&profile, &PlaneFrame::xy(), [0.0, 0.0, 1.0], 10.0)
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        assert_relative_eq!(mp.volume, 500.0, epsilon = 1e-9);
        assert_relative_eq!(mp.surface_area, 400.0, epsilon = 1e-9);
        assert_eq!(solid.face_count(), 6);
        assert!(validate::validate(&solid).valid());
    }

    #[test]
    fn extrude_circle_volume_close_to_cylinder() {
        let profile = Profile2d::circle([0.0, 0.0], 2.0);
        let solid = kernel()
            .extrude(&profile, &PlaneFrame::xy(), [0.0, 0.0, 1.0], 15.0)
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        let exact = std::f64::consts::PI * 4.0 * 15.0;
        assert!((mp.volume - exact).abs() < 0.01, "volume {}", mp.volume);
        // Barrel, bottom, top.
        assert_eq!(solid.face_count(), 3);
    }

    #[test]
    fn extrude_negative_direction_still_outward() {
        let profile = Profile2d::rectangle(0.0, 0.0, 2.0, 2.0);
        let solid = kernel()
            .extrude(&profile, &PlaneFrame::xy(), [0.0, 0.0, -1.0], 3.0)
            .unwrap();
        assert!(mesh::signed_volume(&solid) > 0.0);
        assert!(validate::validate(&solid).valid());
    }

    #[test]
    fn revolve_rectangle_full_turn_makes_a_ring() {
        // Rectangle from r=2 to r=4, height 1, revolved about the y axis
        // of the sketch (x = 0 line): a washer of volume π(4²−2²)·1.
        let profile = Profile2d::rectangle(2.0, 0.0, 4.0, 1.0);
        let solid = kernel()
            .revolve(
                &profile,
                &PlaneFrame::xy(),
                [0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                std::f64::consts::TAU,
            )
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        let exact = std::f64::consts::PI * (16.0 - 4.0) * 1.0;
        assert!(
            (mp.volume - exact).abs() / exact < 5e-3,
            "volume {} vs {exact}",
            mp.volume
        );
        let report = validate::validate(&solid);
        assert!(report.valid(), "{:?}", report.messages);
    }

    #[test]
    fn revolve_half_turn_has_caps() {
        let profile = Profile2d::rectangle(1.0, 0.0, 2.0, 1.0);
        let solid = kernel()
            .revolve(
                &profile,
                &PlaneFrame::xy(),
                [0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                std::f64::consts::PI,
            )
            .unwrap();
        // 4 revolved bands + start and end caps.
        assert_eq!(solid.face_count(), 6);
        assert!(validate::validate(&solid).valid());
    }

    #[test]
    fn revolve_rejects_axis_crossing_profile() {
        let profile = Profile2d::rectangle(-1.0, 0.0, 1.0, 1.0);
        let err = kernel().revolve(
            &profile,
            &PlaneFrame::xy(),
            [0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            std::f64::consts::TAU,
        );
        assert!(matches!(err, Err(KernelError::InvalidSolid { .. })));
    }

    #[test]
    fn loft_between_offset_squares() {
        let bottom = Profile2d::rectangle(0.0, 0.0, 2.0, 2.0);
        let top = Profile2d::rectangle(0.0, 0.0, 2.0, 2.0);
        let f0 = PlaneFrame::xy();
        let f1 = PlaneFrame {
            origin: [0.0, 0.0, 3.0],
            ..PlaneFrame::xy()
        };
        let solid = kernel()
            .loft(&[(bottom, f0), (top, f1)], true, true)
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        assert_relative_eq!(mp.volume, 12.0, epsilon = 1e-6);
        assert!(validate::validate(&solid).valid());
    }

    #[test]
    fn sweep_straight_path_matches_extrude() {
        let profile = Profile2d::rectangle(-1.0, -1.0, 1.0, 1.0);
        let solid = kernel()
            .sweep(&profile, &[[0.0, 0.0, 0.0], [0.0, 0.0, 5.0]])
            .unwrap();
        let mp = mesh::mass_properties(&solid);
        assert_relative_eq!(mp.volume, 20.0, epsilon = 1e-9);
        assert!(validate::validate(&solid).valid());
    }

    #[test]
    fn sweep_rejects_sharp_corner() {
        let profile = Profile2d::circle([0.0, 0.0], 0.5);
        let err = kernel().sweep(
            &profile,
            &[[0.0, 0.0, 0.0], [0.0, 0.0, 5.0], [5.0, 0.0, 5.0]],
        );
        assert!(matches!(err, Err(KernelError::PathNotSmooth { .. })));
    }

    #[test]
    fn primitives_validate_and_have_cad_face_counts() {
        let k = kernel();
        let cyl = k
            .primitive(&PrimitiveSpec::Cylinder {
                base: [0.0, 0.0, 0.0],
                axis: [0.0, 0.0, 1.0],
                radius: 1.0,
                height: 2.0,
            })
            .unwrap();
        assert_eq!(cyl.face_count(), 3);

        let sphere = k
            .primitive(&PrimitiveSpec::Sphere {
                center: [0.0, 0.0, 0.0],
                radius: 2.0,
            })
            .unwrap();
        assert_eq!(sphere.face_count(), 1);
        let mp = mesh::mass_properties(&sphere);
        let exact = 4.0 / 3.0 * std::f64::consts::PI * 8.0;
        assert!((mp.volume - exact).abs() / exact < 0.02);

        let cone = k
            .primitive(&PrimitiveSpec::Cone {
                base: [0.0, 0.0, 0.0],
                axis: [0.0, 0.0, 1.0],
                radius: 3.0,
                height: 4.0,
            })
            .unwrap();
        assert_eq!(cone.face_count(), 2);
        let mp = mesh::mass_properties(&cone);
        let exact = std::f64::consts::PI * 9.0 * 4.0 / 3.0;
        assert!((mp.volume - exact).abs() / exact < 0.01);

        for brep in [&cyl, &sphere, &cone] {
            let report = validate::validate(brep);
            assert!(report.valid(), "{:?}", report.messages);
        }
    }

    #[test]
    fn box_minus_cylinder_through_hole() {
        let k = kernel();
        let bx = k
            .primitive(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [10.0, 5.0, 10.0],
            })
            .unwrap();
        let cyl = k
            .primitive(&PrimitiveSpec::Cylinder {
                base: [5.0, 2.5, -1.0],
                axis: [0.0, 0.0, 1.0],
                radius: 2.0,
                height: 15.0,
            })
            .unwrap();
        let out = k.cut(&bx, &cyl).unwrap();
        let mp = mesh::mass_properties(&out);
        let exact = 500.0 - std::f64::consts::PI * 4.0 * 10.0;
        assert!(
            (mp.volume - exact).abs() < 0.01,
            "volume {} vs {exact}",
            mp.volume
        );
        let report = validate::validate(&out);
        assert!(report.is_closed && report.is_manifold, "{:?}", report.messages);
        assert_eq!(report.genus, Some(1));
    }

    #[test]
    fn coplanar_cap_subtract_is_clean() {
        // The cylinder's bottom cap lies exactly in the box's bottom face
        // plane: the cap must be consumed, not left as a membrane.
        let k = kernel();
        let bx = k
            .primitive(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [10.0, 5.0, 10.0],
            })
            .unwrap();
        let cyl = k
            .primitive(&PrimitiveSpec::Cylinder {
                base: [5.0, 2.5, 0.0],
                axis: [0.0, 0.0, 1.0],
                radius: 2.0,
                height: 15.0,
            })
            .unwrap();
        let out = k.cut(&bx, &cyl).unwrap();
        let mp = mesh::mass_properties(&out);
        let exact = 500.0 - std::f64::consts::PI * 4.0 * 10.0;
        assert!(
            (mp.volume - exact).abs() < 0.01,
            "volume {} vs {exact}",
            mp.volume
        );
        let report = validate::validate(&out);
        assert!(report.is_closed, "{:?}", report.messages);
        assert!(report.is_manifold, "{:?}", report.messages);
    }

    #[test]
    fn brep_codec_round_trips_byte_identically() {
        let k = kernel();
        let solid = k
            .primitive(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [1.0, 2.0, 3.0],
            })
            .unwrap();
        let bytes = k.encode_brep(&solid).unwrap();
        let again = k.decode_brep(&bytes).unwrap();
        assert_eq!(solid, again);
        assert_eq!(bytes, k.encode_brep(&again).unwrap());
    }

    #[test]
    fn tessellate_groups_triangles_by_face() {
        let k = kernel();
        let solid = k
            .primitive(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [1.0, 1.0, 1.0],
            })
            .unwrap();
        let rm = k.tessellate(&solid, 0.1, 0.3);
        assert_eq!(rm.triangle_count(), 12);
        assert_eq!(rm.face_ranges.len(), 6);
        assert_eq!(rm.vertices.len(), rm.normals.len());
    }
}

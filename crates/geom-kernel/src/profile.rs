use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::types::KernelError;

/// Chaining tolerance for profile closure, in millimetres.
const CHAIN_TOL: f64 = 1e-6;

/// A planar profile edge in 2D sketch coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfileEdge {
    Segment {
        start: [f64; 2],
        end: [f64; 2],
    },
    Arc {
        center: [f64; 2],
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    /// A full circle. Only valid as the sole edge of a profile.
    Circle { center: [f64; 2], radius: f64 },
}

impl ProfileEdge {
    fn start_point(&self) -> [f64; 2] {
        match self {
            ProfileEdge::Segment { start, .. } => *start,
            ProfileEdge::Arc {
                center,
                radius,
                start_angle,
                ..
            } => [
                center[0] + radius * start_angle.cos(),
                center[1] + radius * start_angle.sin(),
            ],
            ProfileEdge::Circle { center, radius } => [center[0] + radius, center[1]],
        }
    }

    fn end_point(&self) -> [f64; 2] {
        match self {
            ProfileEdge::Segment { end, .. } => *end,
            ProfileEdge::Arc {
                center,
                radius,
                end_angle,
                ..
            } => [
                center[0] + radius * end_angle.cos(),
                center[1] + radius * end_angle.sin(),
            ],
            ProfileEdge::Circle { center, radius } => [center[0] + radius, center[1]],
        }
    }
}

/// A closed planar profile: an ordered chain of edges in 2D coordinates.
/// Discretisation tags every emitted point with the index of the edge that
/// produced it, which downstream becomes the logical side-face assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile2d {
    pub edges: Vec<ProfileEdge>,
}

impl Profile2d {
    pub fn new(edges: Vec<ProfileEdge>) -> Self {
        Self { edges }
    }

    pub fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::new(vec![
            ProfileEdge::Segment {
                start: [x0, y0],
                end: [x1, y0],
            },
            ProfileEdge::Segment {
                start: [x1, y0],
                end: [x1, y1],
            },
            ProfileEdge::Segment {
                start: [x1, y1],
                end: [x0, y1],
            },
            ProfileEdge::Segment {
                start: [x0, y1],
                end: [x0, y0],
            },
        ])
    }

    pub fn circle(center: [f64; 2], radius: f64) -> Self {
        Self::new(vec![ProfileEdge::Circle { center, radius }])
    }

    /// Whether the edge chain closes back on its start.
    pub fn is_closed(&self) -> bool {
        if self.edges.is_empty() {
            return false;
        }
        if let [ProfileEdge::Circle { .. }] = self.edges.as_slice() {
            return true;
        }
        if self
            .edges
            .iter()
            .any(|e| matches!(e, ProfileEdge::Circle { .. }))
        {
            // A full circle cannot chain with other edges.
            return false;
        }
        for pair in self.edges.windows(2) {
            if dist2(pair[0].end_point(), pair[1].start_point()) > CHAIN_TOL {
                return false;
            }
        }
        let first = self.edges.first().map(|e| e.start_point()).unwrap_or([0.0; 2]);
        let last = self.edges.last().map(|e| e.end_point()).unwrap_or([0.0; 2]);
        dist2(first, last) <= CHAIN_TOL
    }

    /// Discretise the profile into a closed polygon. Each point carries the
    /// index of the edge that produced it; the polygon segment from point
    /// `i` to `i+1` belongs to point `i`'s edge.
    ///
    /// `angular_segments` is the resolution of a full circle; arcs get a
    /// proportional share. The returned polygon winds counter-clockwise.
    pub fn discretize(&self, angular_segments: usize) -> Result<Vec<([f64; 2], u32)>, KernelError> {
        if !self.is_closed() {
            return Err(KernelError::OpenProfile);
        }
        let segs = angular_segments.max(8);
        let mut points: Vec<([f64; 2], u32)> = Vec::new();

        for (tag, edge) in self.edges.iter().enumerate() {
            let tag = tag as u32;
            match edge {
                ProfileEdge::Segment { start, .. } => points.push((*start, tag)),
                ProfileEdge::Arc {
                    center,
                    radius,
                    start_angle,
                    end_angle,
                } => {
                    let sweep = end_angle - start_angle;
                    let n = ((sweep.abs() / std::f64::consts::TAU) * segs as f64).ceil() as usize;
                    let n = n.max(2);
                    for k in 0..n {
                        let a = start_angle + sweep * (k as f64 / n as f64);
                        points.push((
                            [center[0] + radius * a.cos(), center[1] + radius * a.sin()],
                            tag,
                        ));
                    }
                }
                ProfileEdge::Circle { center, radius } => {
                    for k in 0..segs {
                        let a = std::f64::consts::TAU * (k as f64 / segs as f64);
                        points.push((
                            [center[0] + radius * a.cos(), center[1] + radius * a.sin()],
                            tag,
                        ));
                    }
                }
            }
        }

        if points.len() < 3 {
            return Err(KernelError::DegenerateProfile {
                reason: "fewer than three boundary points".to_string(),
            });
        }

        // Normalise to counter-clockwise winding. Tags move with their
        // originating segment: segment i..i+1 owned by point i becomes
        // segment i+1..i owned by point i+1 after reversal, so shift tags
        // back by one.
        if shoelace(&points) < 0.0 {
            points.reverse();
            let tags: Vec<u32> = points.iter().map(|(_, t)| *t).collect();
            let n = points.len();
            for (i, p) in points.iter_mut().enumerate() {
                p.1 = tags[(i + 1) % n];
            }
        }

        if shoelace(&points).abs() < 1e-12 {
            return Err(KernelError::DegenerateProfile {
                reason: "profile encloses no area".to_string(),
            });
        }

        Ok(points)
    }

    /// Enclosed area of the discretised boundary.
    pub fn area(&self, angular_segments: usize) -> Result<f64, KernelError> {
        Ok(shoelace(&self.discretize(angular_segments)?).abs())
    }
}

/// Signed area of a tagged polygon (shoelace formula).
pub fn shoelace(points: &[([f64; 2], u32)]) -> f64 {
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let (a, _) = points[i];
        let (b, _) = points[(i + 1) % n];
        area += a[0] * b[1] - b[0] * a[1];
    }
    area / 2.0
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// A plane with an in-plane axis: the coordinate frame a profile lives in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneFrame {
    pub origin: [f64; 3],
    pub normal: [f64; 3],
    pub x_axis: [f64; 3],
}

impl PlaneFrame {
    /// Frame from origin and normal with a deterministically chosen x axis.
    pub fn from_origin_normal(origin: [f64; 3], normal: [f64; 3]) -> Self {
        let n = Vector3::from(normal).normalize();
        let pick = if n.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let x = pick.cross(&n).normalize();
        Self {
            origin,
            normal: [n.x, n.y, n.z],
            x_axis: [x.x, x.y, x.z],
        }
    }

    /// The XY sketch plane at z = 0.
    pub fn xy() -> Self {
        Self {
            origin: [0.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            x_axis: [1.0, 0.0, 0.0],
        }
    }

    pub fn y_axis(&self) -> [f64; 3] {
        let n = Vector3::from(self.normal);
        let x = Vector3::from(self.x_axis);
        let y = n.cross(&x);
        [y.x, y.y, y.z]
    }

    /// Lift a 2D sketch point into 3D.
    pub fn to_3d(&self, p: [f64; 2]) -> [f64; 3] {
        let o = Vector3::from(self.origin);
        let x = Vector3::from(self.x_axis);
        let y = Vector3::from(self.y_axis());
        let v = o + x * p[0] + y * p[1];
        [v.x, v.y, v.z]
    }

    /// Project a 3D point into sketch coordinates.
    pub fn to_2d(&self, p: [f64; 3]) -> [f64; 2] {
        let d = Vector3::from(p) - Vector3::from(self.origin);
        let x = Vector3::from(self.x_axis);
        let y = Vector3::from(self.y_axis());
        [d.dot(&x), d.dot(&y)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_is_closed_with_exact_area() {
        let p = Profile2d::rectangle(0.0, 0.0, 10.0, 5.0);
        assert!(p.is_closed());
        let area = p.area(64).unwrap();
        assert!((area - 50.0).abs() < 1e-12);
    }

    #[test]
    fn circle_area_approaches_pi_r_squared() {
        let p = Profile2d::circle([0.0, 0.0], 2.0);
        let area = p.area(512).unwrap();
        let exact = std::f64::consts::PI * 4.0;
        assert!((area - exact).abs() / exact < 1e-4, "area {area} vs {exact}");
    }

    #[test]
    fn open_chain_rejected() {
        let p = Profile2d::new(vec![
            ProfileEdge::Segment {
                start: [0.0, 0.0],
                end: [1.0, 0.0],
            },
            ProfileEdge::Segment {
                start: [1.0, 0.0],
                end: [1.0, 1.0],
            },
        ]);
        assert!(!p.is_closed());
        assert!(matches!(p.discretize(64), Err(KernelError::OpenProfile)));
    }

    #[test]
    fn clockwise_input_flipped_to_ccw() {
        let p = Profile2d::rectangle(0.0, 0.0, 10.0, 5.0);
        let mut rev = p.edges.clone();
        rev.reverse();
        let rev: Vec<ProfileEdge> = rev
            .into_iter()
            .map(|e| match e {
                ProfileEdge::Segment { start, end } => ProfileEdge::Segment {
                    start: end,
                    end: start,
                },
                other => other,
            })
            .collect();
        let cw = Profile2d::new(rev);
        let pts = cw.discretize(64).unwrap();
        assert!(shoelace(&pts) > 0.0);
    }

    #[test]
    fn frame_round_trip() {
        let frame = PlaneFrame::from_origin_normal([1.0, 2.0, 3.0], [0.0, 1.0, 0.0]);
        let p3 = frame.to_3d([4.0, -2.0]);
        let p2 = frame.to_2d(p3);
        assert!((p2[0] - 4.0).abs() < 1e-12);
        assert!((p2[1] + 2.0).abs() < 1e-12);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, EntityId, WorkspaceId};

/// Coordinate magnitudes must stay within this band.
pub const COORD_LIMIT: f64 = 1e6;
/// Smallest meaningful nonzero length or radius, in millimetres.
pub const LENGTH_EPSILON: f64 = 1e-6;
/// Smallest meaningful solid volume, in cubic millimetres.
pub const VOLUME_EPSILON: f64 = 1e-9;
/// Hard cap on faces of a single solid.
pub const MAX_FACE_COUNT: usize = 10_000;

/// The kind of geometric entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Point2d,
    Point3d,
    Line2d,
    Line3d,
    Arc,
    Circle,
    Plane,
    Sphere,
    Cylinder,
    Cone,
    Torus,
    Spline,
    Wire,
    Sketch,
    Solid,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Point2d => "point2d",
            EntityKind::Point3d => "point3d",
            EntityKind::Line2d => "line2d",
            EntityKind::Line3d => "line3d",
            EntityKind::Arc => "arc",
            EntityKind::Circle => "circle",
            EntityKind::Plane => "plane",
            EntityKind::Sphere => "sphere",
            EntityKind::Cylinder => "cylinder",
            EntityKind::Cone => "cone",
            EntityKind::Torus => "torus",
            EntityKind::Spline => "spline",
            EntityKind::Wire => "wire",
            EntityKind::Sketch => "sketch",
            EntityKind::Solid => "solid",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "point2d" => EntityKind::Point2d,
            "point3d" => EntityKind::Point3d,
            "line2d" => EntityKind::Line2d,
            "line3d" => EntityKind::Line3d,
            "arc" => EntityKind::Arc,
            "circle" => EntityKind::Circle,
            "plane" => EntityKind::Plane,
            "sphere" => EntityKind::Sphere,
            "cylinder" => EntityKind::Cylinder,
            "cone" => EntityKind::Cone,
            "torus" => EntityKind::Torus,
            "spline" => EntityKind::Spline,
            "wire" => EntityKind::Wire,
            "sketch" => EntityKind::Sketch,
            "solid" => EntityKind::Solid,
            _ => return None,
        })
    }

    /// Degrees of freedom this entity contributes to the constraint graph.
    pub fn dof(&self) -> u32 {
        match self {
            EntityKind::Point2d => 2,
            EntityKind::Point3d => 3,
            EntityKind::Line2d => 3,
            EntityKind::Line3d => 6,
            EntityKind::Arc => 6,
            EntityKind::Circle => 4,
            EntityKind::Plane => 5,
            EntityKind::Sphere => 4,
            EntityKind::Cylinder => 6,
            EntityKind::Cone => 7,
            EntityKind::Torus => 7,
            EntityKind::Spline => 0,
            EntityKind::Wire => 0,
            EntityKind::Sketch => 0,
            EntityKind::Solid => 6,
        }
    }
}

/// Serde helper embedding brep blobs as base64 so entity records stay
/// valid single-line JSON.
pub mod base64_blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Kind-specific geometric data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertySet {
    Point2d {
        position: [f64; 2],
    },
    Point3d {
        position: [f64; 3],
    },
    Line2d {
        start: [f64; 2],
        end: [f64; 2],
    },
    Line3d {
        start: [f64; 3],
        end: [f64; 3],
    },
    Arc {
        center: [f64; 3],
        radius: f64,
        normal: [f64; 3],
        start_angle: f64,
        end_angle: f64,
    },
    Circle {
        center: [f64; 3],
        radius: f64,
        normal: [f64; 3],
    },
    Plane {
        origin: [f64; 3],
        normal: [f64; 3],
    },
    Sphere {
        center: [f64; 3],
        radius: f64,
    },
    Cylinder {
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
        height: f64,
    },
    Cone {
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
        height: f64,
    },
    Torus {
        center: [f64; 3],
        axis: [f64; 3],
        major_radius: f64,
        minor_radius: f64,
    },
    Spline {
        control_points: Vec<[f64; 3]>,
        degree: u32,
    },
    /// Ordered curve entities forming a (possibly open) path.
    Wire {
        edges: Vec<EntityId>,
    },
    /// Curve entities bound to a plane, ready for profile extraction.
    Sketch {
        plane_origin: [f64; 3],
        plane_normal: [f64; 3],
        entities: Vec<EntityId>,
    },
    Solid {
        #[serde(with = "base64_blob")]
        brep: Vec<u8>,
    },
}

impl PropertySet {
    pub fn kind(&self) -> EntityKind {
        match self {
            PropertySet::Point2d { .. } => EntityKind::Point2d,
            PropertySet::Point3d { .. } => EntityKind::Point3d,
            PropertySet::Line2d { .. } => EntityKind::Line2d,
            PropertySet::Line3d { .. } => EntityKind::Line3d,
            PropertySet::Arc { .. } => EntityKind::Arc,
            PropertySet::Circle { .. } => EntityKind::Circle,
            PropertySet::Plane { .. } => EntityKind::Plane,
            PropertySet::Sphere { .. } => EntityKind::Sphere,
            PropertySet::Cylinder { .. } => EntityKind::Cylinder,
            PropertySet::Cone { .. } => EntityKind::Cone,
            PropertySet::Torus { .. } => EntityKind::Torus,
            PropertySet::Spline { .. } => EntityKind::Spline,
            PropertySet::Wire { .. } => EntityKind::Wire,
            PropertySet::Sketch { .. } => EntityKind::Sketch,
            PropertySet::Solid { .. } => EntityKind::Solid,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    pub fn from_points<I: IntoIterator<Item = [f64; 3]>>(points: I) -> Option<Self> {
        let mut it = points.into_iter();
        let first = it.next()?;
        let mut bbox = Aabb {
            min: first,
            max: first,
        };
        for p in it {
            bbox.expand(p);
        }
        Some(bbox)
    }

    pub fn expand(&mut self, p: [f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.expand(other.min);
        out.expand(other.max);
        out
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|a| self.min[a] <= other.max[a] && self.max[a] >= other.min[a])
    }

    /// Longest diagonal, used to scale solver tolerances.
    pub fn diagonal(&self) -> f64 {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Structured topology validation codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyCode {
    NonManifoldEdge,
    NonManifoldVertex,
    OpenShell,
    WrongFaceOrientation,
    DegenerateEdge,
    DegenerateFace,
    SelfIntersection,
}

impl TopologyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyCode::NonManifoldEdge => "NonManifoldEdge",
            TopologyCode::NonManifoldVertex => "NonManifoldVertex",
            TopologyCode::OpenShell => "OpenShell",
            TopologyCode::WrongFaceOrientation => "WrongFaceOrientation",
            TopologyCode::DegenerateEdge => "DegenerateEdge",
            TopologyCode::DegenerateFace => "DegenerateFace",
            TopologyCode::SelfIntersection => "SelfIntersection",
        }
    }
}

/// Cached computed properties. Authoritative once `valid` is set; callers
/// must not recompute from the brep outside the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedProps {
    pub volume: Option<f64>,
    pub surface_area: Option<f64>,
    pub length: Option<f64>,
    pub center_of_mass: Option<[f64; 3]>,
    pub face_count: Option<usize>,
    pub bbox: Option<Aabb>,
    pub valid: bool,
}

impl ComputedProps {
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// One stored geometric entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub workspace_id: WorkspaceId,
    pub properties: PropertySet,
    /// Entities this one was derived from (e.g. a solid's source sketch).
    pub parents: Vec<EntityId>,
    /// Entities derived from this one.
    pub children: Vec<EntityId>,
    /// For branched copies, the base entity this record shadows.
    pub origin: Option<EntityId>,
    pub computed: ComputedProps,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub created_by: AgentId,
    pub is_valid: bool,
    pub validation_codes: Vec<TopologyCode>,
}

impl EntityRecord {
    pub fn new(
        id: EntityId,
        workspace_id: WorkspaceId,
        properties: PropertySet,
        created_by: AgentId,
        now: DateTime<Utc>,
    ) -> Self {
        let kind = properties.kind();
        Self {
            id,
            kind,
            workspace_id,
            properties,
            parents: Vec::new(),
            children: Vec::new(),
            origin: None,
            computed: ComputedProps::default(),
            created_at: now,
            modified_at: now,
            created_by,
            is_valid: true,
            validation_codes: Vec::new(),
        }
    }
}

fn finite_in_range(v: f64) -> bool {
    v.is_finite() && v.abs() <= COORD_LIMIT
}

fn coords_ok(p: &[f64]) -> bool {
    p.iter().all(|&v| finite_in_range(v))
}

fn dist3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

fn unit_norm(n: &[f64; 3]) -> bool {
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    (len - 1.0).abs() < 1e-6
}

/// Kind-specific invariant check for non-solid property sets. Solids are
/// validated by the kernel's topology checks instead.
///
/// Returns a human-readable reason on failure.
pub fn validate_properties(props: &PropertySet) -> Result<(), String> {
    match props {
        PropertySet::Point2d { position } => {
            if !coords_ok(position) {
                return Err("point coordinates must be finite and within ±1e6".into());
            }
        }
        PropertySet::Point3d { position } => {
            if !coords_ok(position) {
                return Err("point coordinates must be finite and within ±1e6".into());
            }
        }
        PropertySet::Line2d { start, end } => {
            if !coords_ok(start) || !coords_ok(end) {
                return Err("line endpoints must be finite and within ±1e6".into());
            }
            let dx = end[0] - start[0];
            let dy = end[1] - start[1];
            if (dx * dx + dy * dy).sqrt() < LENGTH_EPSILON {
                return Err(format!("line length must be at least {LENGTH_EPSILON}"));
            }
        }
        PropertySet::Line3d { start, end } => {
            if !coords_ok(start) || !coords_ok(end) {
                return Err("line endpoints must be finite and within ±1e6".into());
            }
            if dist3(start, end) < LENGTH_EPSILON {
                return Err(format!("line length must be at least {LENGTH_EPSILON}"));
            }
        }
        PropertySet::Arc {
            center,
            radius,
            normal,
            start_angle,
            end_angle,
        } => {
            if !coords_ok(center) {
                return Err("arc center must be finite and within ±1e6".into());
            }
            if !(*radius >= LENGTH_EPSILON && *radius < COORD_LIMIT) {
                return Err(format!("arc radius must lie in ({LENGTH_EPSILON}, {COORD_LIMIT})"));
            }
            if !unit_norm(normal) {
                return Err("arc normal must be a unit vector".into());
            }
            if (start_angle - end_angle).abs() < 1e-9 {
                return Err("arc start and end angles must differ".into());
            }
        }
        PropertySet::Circle {
            center,
            radius,
            normal,
        } => {
            if !coords_ok(center) {
                return Err("circle center must be finite and within ±1e6".into());
            }
            if !(*radius >= LENGTH_EPSILON && *radius < COORD_LIMIT) {
                return Err(format!(
                    "circle radius must lie in ({LENGTH_EPSILON}, {COORD_LIMIT})"
                ));
            }
            if !unit_norm(normal) {
                return Err("circle normal must be a unit vector".into());
            }
        }
        PropertySet::Plane { origin, normal } => {
            if !coords_ok(origin) {
                return Err("plane origin must be finite and within ±1e6".into());
            }
            if !unit_norm(normal) {
                return Err("plane normal must be a unit vector".into());
            }
        }
        PropertySet::Sphere { center, radius } => {
            if !coords_ok(center) {
                return Err("sphere center must be finite and within ±1e6".into());
            }
            if !(*radius >= LENGTH_EPSILON && *radius < COORD_LIMIT) {
                return Err("sphere radius out of range".into());
            }
        }
        PropertySet::Cylinder {
            base,
            axis,
            radius,
            height,
        }
        | PropertySet::Cone {
            base,
            axis,
            radius,
            height,
        } => {
            if !coords_ok(base) || !coords_ok(axis) {
                return Err("base and axis must be finite and within ±1e6".into());
            }
            if !(*radius >= LENGTH_EPSILON && *radius < COORD_LIMIT) {
                return Err("radius out of range".into());
            }
            if !(*height >= LENGTH_EPSILON && *height < COORD_LIMIT) {
                return Err("height out of range".into());
            }
        }
        PropertySet::Torus {
            center,
            axis,
            major_radius,
            minor_radius,
        } => {
            if !coords_ok(center) || !coords_ok(axis) {
                return Err("center and axis must be finite and within ±1e6".into());
            }
            if !(*major_radius >= LENGTH_EPSILON && *minor_radius >= LENGTH_EPSILON) {
                return Err("torus radii out of range".into());
            }
            if minor_radius >= major_radius {
                return Err("torus minor radius must be smaller than major radius".into());
            }
        }
        PropertySet::Spline {
            control_points,
            degree,
        } => {
            if control_points.len() < (*degree as usize + 1) {
                return Err("spline needs at least degree+1 control points".into());
            }
            if control_points.iter().any(|p| !coords_ok(p)) {
                return Err("spline control points must be finite and within ±1e6".into());
            }
        }
        PropertySet::Wire { edges } => {
            if edges.is_empty() {
                return Err("wire needs at least one edge".into());
            }
        }
        PropertySet::Sketch {
            plane_normal,
            entities,
            ..
        } => {
            if !unit_norm(plane_normal) {
                return Err("sketch plane normal must be a unit vector".into());
            }
            if entities.is_empty() {
                return Err("sketch needs at least one entity".into());
            }
        }
        PropertySet::Solid { brep } => {
            if brep.is_empty() {
                return Err("solid brep blob is empty".into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_radius_boundary() {
        let mk = |radius| PropertySet::Circle {
            center: [0.0, 0.0, 0.0],
            radius,
            normal: [0.0, 0.0, 1.0],
        };
        assert!(validate_properties(&mk(1e-7)).is_err());
        assert!(validate_properties(&mk(2e-6)).is_ok());
    }

    #[test]
    fn degenerate_line_rejected() {
        let props = PropertySet::Line3d {
            start: [1.0, 2.0, 3.0],
            end: [1.0, 2.0, 3.0],
        };
        assert!(validate_properties(&props).is_err());
    }

    #[test]
    fn out_of_band_coordinate_rejected() {
        let props = PropertySet::Point3d {
            position: [2e6, 0.0, 0.0],
        };
        assert!(validate_properties(&props).is_err());
    }

    #[test]
    fn aabb_overlap() {
        let a = Aabb {
            min: [0.0; 3],
            max: [1.0; 3],
        };
        let b = Aabb {
            min: [0.5, 0.5, 0.5],
            max: [2.0; 3],
        };
        let c = Aabb {
            min: [3.0; 3],
            max: [4.0; 3],
        };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}

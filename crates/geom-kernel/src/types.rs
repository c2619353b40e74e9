use serde::{Deserialize, Serialize};

/// Broad classification of the surface carrying a logical face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceClass {
    Planar,
    Cylindrical,
    Conical,
    Spherical,
    Toroidal,
    Revolved,
    Swept,
    Freeform,
}

/// A logical face of a solid. Triangles reference faces by index, so a
/// cylinder keeps its CAD face count of three no matter how finely its
/// barrel is discretised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceInfo {
    pub surface: SurfaceClass,
}

/// One triangle of the boundary, tagged with its logical face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    pub v: [u32; 3],
    pub face: u32,
}

/// Boundary representation of a solid: a closed, consistently oriented
/// triangle mesh whose triangles are grouped into logical faces.
///
/// Construction is fully deterministic, so replaying the same operation
/// sequence reproduces byte-identical encoded blobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolidBrep {
    pub positions: Vec<[f64; 3]>,
    pub triangles: Vec<Triangle>,
    pub faces: Vec<FaceInfo>,
}

impl SolidBrep {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

/// Exact-as-computed integral properties of a solid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub volume: f64,
    pub surface_area: f64,
    pub center_of_mass: [f64; 3],
}

/// Parameters for primitive solid construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PrimitiveSpec {
    Box {
        corner: [f64; 3],
        dimensions: [f64; 3],
    },
    Cylinder {
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
        height: f64,
    },
    Sphere {
        center: [f64; 3],
        radius: f64,
    },
    Cone {
        base: [f64; 3],
        axis: [f64; 3],
        radius: f64,
        height: f64,
    },
}

/// Tessellated triangle mesh for export and viewing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderMesh {
    /// Flat array of vertex positions [x0, y0, z0, x1, y1, z1, ...].
    pub vertices: Vec<f32>,
    /// Flat array of per-vertex normals, parallel to `vertices`.
    pub normals: Vec<f32>,
    /// Triangle indices into the vertex array.
    pub indices: Vec<u32>,
    /// Mapping from contiguous triangle ranges to logical faces.
    pub face_ranges: Vec<FaceRange>,
}

impl RenderMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Maps a contiguous range of triangle indices to a logical face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRange {
    pub face: u32,
    /// Start index in `indices` (inclusive).
    pub start_index: u32,
    /// End index in `indices` (exclusive).
    pub end_index: u32,
}

/// Errors from kernel operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    #[error("degenerate profile: {reason}")]
    DegenerateProfile { reason: String },

    #[error("profile is not a closed loop")]
    OpenProfile,

    #[error("boolean operation failed: {reason}")]
    BooleanFailed { reason: String },

    #[error("invalid solid: {reason}")]
    InvalidSolid { reason: String },

    #[error("sweep path is not G1-continuous: {reason}")]
    PathNotSmooth { reason: String },

    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },

    #[error("brep codec error: {reason}")]
    Codec { reason: String },
}

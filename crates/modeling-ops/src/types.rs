use anvil_types::{Aabb, CoreError, TopologyCode};
use geom_kernel::{KernelError, MassProperties, SolidBrep};

/// Stages reported by long-running operations, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    ValidatingInputs,
    IntersectingFaces,
    RefiningEdges,
    ValidatingTopology,
    ComputingProperties,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::ValidatingInputs => "validating_inputs",
            ProgressStage::IntersectingFaces => "intersecting_faces",
            ProgressStage::RefiningEdges => "refining_edges",
            ProgressStage::ValidatingTopology => "validating_topology",
            ProgressStage::ComputingProperties => "computing_properties",
        }
    }
}

/// Progress callback: stage plus percent complete.
pub type ProgressSink<'a> = &'a mut dyn FnMut(ProgressStage, f32);

/// A no-op progress sink for callers that do not stream.
pub fn silent() -> impl FnMut(ProgressStage, f32) {
    |_stage, _percent| {}
}

/// Complete result of a modeling operation: the solid plus everything the
/// store needs to fill the entity's property cache.
#[derive(Debug, Clone)]
pub struct OpOutcome {
    pub brep: SolidBrep,
    pub mass: MassProperties,
    pub bbox: Option<Aabb>,
    pub face_count: usize,
    /// Non-fatal notes; an outcome with warnings still succeeds.
    pub warnings: Vec<String>,
}

/// Errors from modeling operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OpError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("sketch is not usable as a profile: {reason}")]
    InvalidSketch { reason: String },

    #[error("operand is not a valid closed manifold solid: {reason}")]
    InvalidOperand { reason: String },

    #[error("operation produced an empty result")]
    EmptyResult,

    #[error("result failed topology validation: {codes:?}")]
    Topology { codes: Vec<TopologyCode> },

    #[error("result has {count} faces, over the {limit}-face budget")]
    FaceBudget { count: usize, limit: usize },
}

impl From<OpError> for CoreError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::Kernel(KernelError::OpenProfile) => CoreError::InvalidSketch {
                reason: "profile is not a closed loop".to_string(),
            },
            OpError::Kernel(KernelError::DegenerateProfile { reason }) => {
                CoreError::InvalidGeometry { reason }
            }
            OpError::Kernel(KernelError::PathNotSmooth { reason }) => {
                CoreError::InvalidGeometry { reason }
            }
            OpError::Kernel(KernelError::InvalidSolid { reason }) => {
                CoreError::InvalidGeometry { reason }
            }
            OpError::Kernel(err) => CoreError::GeometryEngineError {
                message: err.to_string(),
            },
            OpError::InvalidParameter { reason } => CoreError::OperationInvalid { reason },
            OpError::InvalidSketch { reason } => CoreError::InvalidSketch { reason },
            OpError::InvalidOperand { reason } => CoreError::OperationInvalid { reason },
            OpError::EmptyResult => CoreError::OperationInvalid {
                reason: "operation produced an empty solid".to_string(),
            },
            OpError::Topology { codes } => CoreError::TopologyError {
                codes: codes.iter().map(|c| c.as_str().to_string()).collect(),
            },
            OpError::FaceBudget { count, limit } => CoreError::OperationInvalid {
                reason: format!("result has {count} faces, over the {limit}-face budget"),
            },
        }
    }
}

//! Boolean operations between two stored solids: operand validation,
//! kernel invocation with progress staging, and result finishing.

use geom_kernel::{Kernel, SolidBrep};
use serde::{Deserialize, Serialize};

use crate::create::finish_solid;
use crate::types::{OpError, OpOutcome, ProgressSink, ProgressStage};

/// Boolean operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanKind {
    Union,
    Subtract,
    Intersect,
}

impl BooleanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BooleanKind::Union => "union",
            BooleanKind::Subtract => "subtract",
            BooleanKind::Intersect => "intersect",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "union" => BooleanKind::Union,
            "subtract" => BooleanKind::Subtract,
            "intersect" => BooleanKind::Intersect,
            _ => return None,
        })
    }
}

fn check_operand(kernel: &dyn Kernel, brep: &SolidBrep, name: &str) -> Result<(), OpError> {
    let report = kernel.validate(brep);
    if !report.is_closed || !report.is_manifold {
        return Err(OpError::InvalidOperand {
            reason: format!(
                "{name} operand is not closed and manifold ({:?})",
                report.codes
            ),
        });
    }
    Ok(())
}

/// Execute a boolean between two solids. Subtraction is ordered: the first
/// operand minus the second.
pub fn execute_boolean(
    kernel: &dyn Kernel,
    kind: BooleanKind,
    a: &SolidBrep,
    b: &SolidBrep,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    check_operand(kernel, a, "first")?;
    check_operand(kernel, b, "second")?;

    progress(ProgressStage::IntersectingFaces, 20.0);
    let result = match kind {
        BooleanKind::Union => kernel.fuse(a, b)?,
        BooleanKind::Subtract => kernel.cut(a, b)?,
        BooleanKind::Intersect => kernel.common(a, b)?,
    };

    // Coincident vertices and collinear split edges were welded during
    // reconstruction; this stage marks that phase for progress consumers.
    progress(ProgressStage::RefiningEdges, 60.0);

    finish_solid(kernel, result, Vec::new(), progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::silent;
    use geom_kernel::{NativeKernel, PrimitiveSpec};

    fn solid(kernel: &NativeKernel, corner: [f64; 3], dims: [f64; 3]) -> SolidBrep {
        kernel
            .primitive_brep(&PrimitiveSpec::Box {
                corner,
                dimensions: dims,
            })
            .unwrap()
    }

    #[test]
    fn subtract_is_ordered() {
        let kernel = NativeKernel::default();
        let big = solid(&kernel, [0.0, 0.0, 0.0], [4.0, 4.0, 4.0]);
        let small = solid(&kernel, [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]);
        let out = execute_boolean(
            &kernel,
            BooleanKind::Subtract,
            &big,
            &small,
            &mut silent(),
        )
        .unwrap();
        assert!((out.mass.volume - 63.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_intersect_is_operation_invalid() {
        let kernel = NativeKernel::default();
        let a = solid(&kernel, [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = solid(&kernel, [10.0, 10.0, 10.0], [1.0, 1.0, 1.0]);
        let err = execute_boolean(&kernel, BooleanKind::Intersect, &a, &b, &mut silent());
        assert!(matches!(err, Err(OpError::EmptyResult)));
    }

    #[test]
    fn open_operand_rejected() {
        let kernel = NativeKernel::default();
        let a = solid(&kernel, [0.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let mut broken = solid(&kernel, [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]);
        broken.triangles.pop();
        let err = execute_boolean(&kernel, BooleanKind::Union, &a, &broken, &mut silent());
        assert!(matches!(err, Err(OpError::InvalidOperand { .. })));
    }

    #[test]
    fn boolean_emits_all_stages() {
        let kernel = NativeKernel::default();
        let a = solid(&kernel, [0.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let b = solid(&kernel, [1.0, 0.0, 0.0], [2.0, 2.0, 2.0]);
        let mut stages = Vec::new();
        let mut sink = |stage: ProgressStage, _p: f32| stages.push(stage);
        execute_boolean(&kernel, BooleanKind::Union, &a, &b, &mut sink).unwrap();
        assert!(stages.contains(&ProgressStage::IntersectingFaces));
        assert!(stages.contains(&ProgressStage::RefiningEdges));
        assert!(stages.contains(&ProgressStage::ValidatingTopology));
    }
}

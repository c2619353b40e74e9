//! Pattern and mirror operations: transformed instances of a base solid,
//! fused into one body (mesh concatenation when the instances are
//! disjoint, full boolean union when they touch).

use geom_kernel::mesh;
use geom_kernel::{Kernel, SolidBrep};

use crate::create::finish_solid;
use crate::types::{OpError, OpOutcome, ProgressSink, ProgressStage};

/// Hard cap on pattern instances.
const MAX_INSTANCES: usize = 256;

fn combine(
    kernel: &dyn Kernel,
    acc: SolidBrep,
    instance: SolidBrep,
) -> Result<SolidBrep, OpError> {
    let disjoint = match (mesh::bounding_box(&acc), mesh::bounding_box(&instance)) {
        (Some(a), Some(b)) => !a.overlaps(&b),
        _ => false,
    };
    if disjoint {
        Ok(mesh::concat(&acc, &instance))
    } else {
        Ok(kernel.fuse(&acc, &instance)?)
    }
}

/// Linear pattern: `count` instances stepped along `direction` by
/// `spacing`, including the base at step zero.
pub fn execute_pattern_linear(
    kernel: &dyn Kernel,
    base: &SolidBrep,
    direction: [f64; 3],
    spacing: f64,
    count: usize,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    if count < 2 || count > MAX_INSTANCES {
        return Err(OpError::InvalidParameter {
            reason: format!("pattern count {count} must lie in [2, {MAX_INSTANCES}]"),
        });
    }
    if !spacing.is_finite() || spacing.abs() < 1e-6 {
        return Err(OpError::InvalidParameter {
            reason: "pattern spacing must be a nonzero finite length".to_string(),
        });
    }
    let len = (direction[0].powi(2) + direction[1].powi(2) + direction[2].powi(2)).sqrt();
    if len < 1e-12 {
        return Err(OpError::InvalidParameter {
            reason: "pattern direction is a zero vector".to_string(),
        });
    }
    let step = [
        direction[0] / len * spacing,
        direction[1] / len * spacing,
        direction[2] / len * spacing,
    ];

    let mut acc = base.clone();
    for k in 1..count {
        let offset = [step[0] * k as f64, step[1] * k as f64, step[2] * k as f64];
        let instance = mesh::translate(base, offset);
        acc = combine(kernel, acc, instance)?;
        progress(
            ProgressStage::IntersectingFaces,
            5.0 + 70.0 * (k as f32 / count as f32),
        );
    }
    finish_solid(kernel, acc, Vec::new(), progress)
}

/// Circular pattern: `count` instances spread over `total_angle` around
/// the axis, including the base at angle zero.
pub fn execute_pattern_circular(
    kernel: &dyn Kernel,
    base: &SolidBrep,
    axis_origin: [f64; 3],
    axis_direction: [f64; 3],
    count: usize,
    total_angle: f64,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    if count < 2 || count > MAX_INSTANCES {
        return Err(OpError::InvalidParameter {
            reason: format!("pattern count {count} must lie in [2, {MAX_INSTANCES}]"),
        });
    }
    if !total_angle.is_finite()
        || total_angle.abs() < 1e-6
        || total_angle.abs() > std::f64::consts::TAU
    {
        return Err(OpError::InvalidParameter {
            reason: format!("pattern angle {total_angle} must lie in (0, 2π]"),
        });
    }
    let full = (total_angle.abs() - std::f64::consts::TAU).abs() < 1e-9;
    // For a full turn, instance k of n sits at k·2π/n; otherwise the
    // instances span the angle inclusively.
    let step = if full {
        total_angle / count as f64
    } else {
        total_angle / (count as f64 - 1.0)
    };

    let mut acc = base.clone();
    for k in 1..count {
        let instance = mesh::rotate_about(base, axis_origin, axis_direction, step * k as f64);
        acc = combine(kernel, acc, instance)?;
        progress(
            ProgressStage::IntersectingFaces,
            5.0 + 70.0 * (k as f32 / count as f32),
        );
    }
    finish_solid(kernel, acc, Vec::new(), progress)
}

/// Mirror a solid across a plane, producing the reflected copy.
pub fn execute_mirror(
    kernel: &dyn Kernel,
    base: &SolidBrep,
    plane_point: [f64; 3],
    plane_normal: [f64; 3],
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    let len =
        (plane_normal[0].powi(2) + plane_normal[1].powi(2) + plane_normal[2].powi(2)).sqrt();
    if len < 1e-12 {
        return Err(OpError::InvalidParameter {
            reason: "mirror plane normal is a zero vector".to_string(),
        });
    }
    let mirrored = kernel.mirrored(base, plane_point, plane_normal);
    finish_solid(kernel, mirrored, Vec::new(), progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::silent;
    use geom_kernel::{NativeKernel, PrimitiveSpec};

    fn unit_box(kernel: &NativeKernel) -> SolidBrep {
        kernel
            .primitive_brep(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [1.0, 1.0, 1.0],
            })
            .unwrap()
    }

    #[test]
    fn disjoint_linear_pattern_sums_volume() {
        let kernel = NativeKernel::default();
        let base = unit_box(&kernel);
        let out = execute_pattern_linear(
            &kernel,
            &base,
            [1.0, 0.0, 0.0],
            3.0,
            4,
            &mut silent(),
        )
        .unwrap();
        assert!((out.mass.volume - 4.0).abs() < 1e-9);
    }

    #[test]
    fn overlapping_linear_pattern_unions() {
        let kernel = NativeKernel::default();
        let base = unit_box(&kernel);
        // Spacing 0.5 overlaps consecutive cubes: union of 3 at 0.5 steps
        // covers [0, 2] in x.
        let out = execute_pattern_linear(
            &kernel,
            &base,
            [1.0, 0.0, 0.0],
            0.5,
            3,
            &mut silent(),
        )
        .unwrap();
        assert!((out.mass.volume - 2.0).abs() < 1e-6, "volume {}", out.mass.volume);
    }

    #[test]
    fn circular_pattern_full_turn() {
        let kernel = NativeKernel::default();
        let base = kernel
            .primitive_brep(&PrimitiveSpec::Box {
                corner: [5.0, -0.5, 0.0],
                dimensions: [1.0, 1.0, 1.0],
            })
            .unwrap();
        let out = execute_pattern_circular(
            &kernel,
            &base,
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            4,
            std::f64::consts::TAU,
            &mut silent(),
        )
        .unwrap();
        assert!((out.mass.volume - 4.0).abs() < 1e-6);
    }

    #[test]
    fn mirror_preserves_volume() {
        let kernel = NativeKernel::default();
        let base = unit_box(&kernel);
        let out = execute_mirror(
            &kernel,
            &base,
            [5.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            &mut silent(),
        )
        .unwrap();
        assert!((out.mass.volume - 1.0).abs() < 1e-9);
        let bbox = out.bbox.unwrap();
        assert!(bbox.min[0] >= 8.9);
    }

    #[test]
    fn single_instance_pattern_rejected() {
        let kernel = NativeKernel::default();
        let base = unit_box(&kernel);
        let err = execute_pattern_linear(
            &kernel,
            &base,
            [1.0, 0.0, 0.0],
            2.0,
            1,
            &mut silent(),
        );
        assert!(matches!(err, Err(OpError::InvalidParameter { .. })));
    }
}

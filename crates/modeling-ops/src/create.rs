//! Creation operations: extrude, revolve, loft, sweep and primitives.
//! Every path funnels through `finish_solid`, which validates topology,
//! enforces the face budget and computes the mass-property cache.

use anvil_types::MAX_FACE_COUNT;
use geom_kernel::{Kernel, PlaneFrame, PrimitiveSpec, Profile2d, SolidBrep};
use tracing::debug;

use crate::types::{OpError, OpOutcome, ProgressSink, ProgressStage};

/// Validate a freshly built solid and cache its integral properties.
pub fn finish_solid(
    kernel: &dyn Kernel,
    brep: SolidBrep,
    warnings: Vec<String>,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    if brep.is_empty() {
        return Err(OpError::EmptyResult);
    }
    if brep.face_count() > MAX_FACE_COUNT {
        return Err(OpError::FaceBudget {
            count: brep.face_count(),
            limit: MAX_FACE_COUNT,
        });
    }

    progress(ProgressStage::ValidatingTopology, 80.0);
    let report = kernel.validate(&brep);
    if !report.valid() {
        return Err(OpError::Topology {
            codes: report.codes,
        });
    }

    progress(ProgressStage::ComputingProperties, 95.0);
    let mass = kernel.mass_properties(&brep);
    if mass.volume <= 1e-9 {
        return Err(OpError::EmptyResult);
    }
    if mass.surface_area <= 1e-6 {
        return Err(OpError::EmptyResult);
    }
    let bbox = geom_kernel::mesh::bounding_box(&brep);
    let face_count = brep.face_count();
    debug!(
        volume = mass.volume,
        area = mass.surface_area,
        faces = face_count,
        "solid finished"
    );

    Ok(OpOutcome {
        brep,
        mass,
        bbox,
        face_count,
        warnings,
    })
}

pub fn execute_extrude(
    kernel: &dyn Kernel,
    profile: &Profile2d,
    frame: &PlaneFrame,
    direction: [f64; 3],
    distance: f64,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    if !distance.is_finite() || distance.abs() < 1e-6 {
        return Err(OpError::InvalidParameter {
            reason: format!("extrude distance {distance} must be a nonzero finite length"),
        });
    }
    let brep = kernel.extrude(profile, frame, direction, distance)?;
    finish_solid(kernel, brep, Vec::new(), progress)
}

pub fn execute_revolve(
    kernel: &dyn Kernel,
    profile: &Profile2d,
    frame: &PlaneFrame,
    axis_origin: [f64; 3],
    axis_direction: [f64; 3],
    angle: f64,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    if !angle.is_finite() || angle.abs() < 1e-6 || angle.abs() > std::f64::consts::TAU {
        return Err(OpError::InvalidParameter {
            reason: format!("revolve angle {angle} must lie in (0, 2π]"),
        });
    }
    let brep = kernel.revolve(profile, frame, axis_origin, axis_direction, angle)?;
    finish_solid(kernel, brep, Vec::new(), progress)
}

pub fn execute_loft(
    kernel: &dyn Kernel,
    sections: &[(Profile2d, PlaneFrame)],
    ruled: bool,
    solid: bool,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    if sections.len() < 2 {
        return Err(OpError::InvalidParameter {
            reason: "loft needs at least two sections".to_string(),
        });
    }
    let mut warnings = Vec::new();
    if !solid {
        // The kernel closes every loft; a shell request still yields a
        // capped solid so the result passes closed-manifold validation.
        warnings.push("shell loft closed with end caps".to_string());
    }
    let brep = kernel.loft(sections, ruled, true)?;
    finish_solid(kernel, brep, warnings, progress)
}

pub fn execute_sweep(
    kernel: &dyn Kernel,
    profile: &Profile2d,
    path: &[[f64; 3]],
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    if path.len() < 2 {
        return Err(OpError::InvalidParameter {
            reason: "sweep path needs at least two points".to_string(),
        });
    }
    let brep = kernel.sweep(profile, path)?;
    finish_solid(kernel, brep, Vec::new(), progress)
}

pub fn execute_primitive(
    kernel: &dyn Kernel,
    spec: &PrimitiveSpec,
    progress: ProgressSink<'_>,
) -> Result<OpOutcome, OpError> {
    progress(ProgressStage::ValidatingInputs, 5.0);
    let brep = kernel.primitive(spec)?;
    finish_solid(kernel, brep, Vec::new(), progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::silent;
    use geom_kernel::NativeKernel;

    #[test]
    fn extrude_outcome_carries_cached_properties() {
        let kernel = NativeKernel::default();
        let profile = Profile2d::rectangle(0.0, 0.0, 10.0, 5.0);
        let out = execute_extrude(
            &kernel,
            &profile,
            &PlaneFrame::xy(),
            [0.0, 0.0, 1.0],
            10.0,
            &mut silent(),
        )
        .unwrap();
        assert!((out.mass.volume - 500.0).abs() < 1e-9);
        assert_eq!(out.face_count, 6);
        assert!(out.bbox.is_some());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn zero_distance_extrude_rejected() {
        let kernel = NativeKernel::default();
        let profile = Profile2d::rectangle(0.0, 0.0, 1.0, 1.0);
        let err = execute_extrude(
            &kernel,
            &profile,
            &PlaneFrame::xy(),
            [0.0, 0.0, 1.0],
            0.0,
            &mut silent(),
        );
        assert!(matches!(err, Err(OpError::InvalidParameter { .. })));
    }

    #[test]
    fn shell_loft_succeeds_with_warning() {
        let kernel = NativeKernel::default();
        let s0 = (Profile2d::rectangle(0.0, 0.0, 2.0, 2.0), PlaneFrame::xy());
        let s1 = (
            Profile2d::rectangle(0.0, 0.0, 2.0, 2.0),
            PlaneFrame {
                origin: [0.0, 0.0, 4.0],
                ..PlaneFrame::xy()
            },
        );
        let out = execute_loft(&kernel, &[s0, s1], true, false, &mut silent()).unwrap();
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn progress_stages_fire_in_order() {
        let kernel = NativeKernel::default();
        let profile = Profile2d::rectangle(0.0, 0.0, 1.0, 1.0);
        let mut stages = Vec::new();
        let mut sink = |stage: ProgressStage, percent: f32| stages.push((stage, percent));
        execute_extrude(
            &kernel,
            &profile,
            &PlaneFrame::xy(),
            [0.0, 0.0, 1.0],
            2.0,
            &mut sink,
        )
        .unwrap();
        let order: Vec<ProgressStage> = stages.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            order,
            vec![
                ProgressStage::ValidatingInputs,
                ProgressStage::ValidatingTopology,
                ProgressStage::ComputingProperties,
            ]
        );
        assert!(stages.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}

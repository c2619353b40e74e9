//! Numerical solving: damped Newton-Raphson (Levenberg-Marquardt) per
//! independent subsystem, a single regularised restart on divergence, and
//! post-solve residual classification with minimal-conflict-set search.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use anvil_types::{ConstraintId, SatisfactionStatus};

use crate::analysis::{self, StructuralReport};
use crate::model::{SolverConstraint, SolverEntity};
use crate::residual::{self, ParamLayout};

/// Tuning for the numerical solver.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub max_iterations: usize,
    /// Convergence threshold on the residual infinity-norm, scaled by the
    /// subsystem's coordinate magnitude.
    pub tolerance: f64,
    pub lambda_initial: f64,
    pub lambda_factor: f64,
    /// Weight of the pull toward pre-solve positions in the restart pass.
    pub restart_regularisation: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            lambda_initial: 1e-3,
            lambda_factor: 10.0,
            restart_regularisation: 1e-3,
        }
    }
}

/// A minimal set of constraints that cannot hold together.
#[derive(Debug, Clone)]
pub struct ConflictSet {
    pub constraints: Vec<ConstraintId>,
    pub detail: String,
}

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub structure: StructuralReport,
    pub outcomes: Vec<(ConstraintId, SatisfactionStatus)>,
    pub conflicts: Vec<ConflictSet>,
    pub converged: bool,
    pub iterations: usize,
    pub residual_norm: f64,
}

impl SolveReport {
    pub fn dof_remaining(&self) -> i64 {
        self.structure.dof_remaining
    }
}

/// Solve every subsystem and classify every constraint.
///
/// Entity parameters are updated in place only for subsystems that
/// converge; failed subsystems leave their entities untouched and
/// contribute a conflict set instead.
pub fn solve(
    entities: &mut [SolverEntity],
    constraints: &[SolverConstraint],
    options: &SolveOptions,
) -> SolveReport {
    let structure = analysis::analyze(entities, constraints);
    let mut outcomes: Vec<(ConstraintId, SatisfactionStatus)> = Vec::new();
    let mut conflicts: Vec<ConflictSet> = Vec::new();
    let mut converged_all = true;
    let mut iterations_total = 0;
    let mut worst_residual = 0.0f64;

    for subsystem in &structure.subsystems {
        let sub_constraints: Vec<SolverConstraint> = subsystem
            .constraints
            .iter()
            .map(|&ci| {
                let mut c = constraints[ci].clone();
                // Remap entity indices into the subsystem-local slice.
                c.entities = c
                    .entities
                    .iter()
                    .map(|&ei| {
                        subsystem
                            .entities
                            .iter()
                            .position(|&x| x == ei)
                            .unwrap_or(0)
                    })
                    .collect();
                c
            })
            .collect();
        let mut sub_entities: Vec<SolverEntity> = subsystem
            .entities
            .iter()
            .map(|&ei| entities[ei].clone())
            .collect();

        let attempt = solve_subsystem(&mut sub_entities, &sub_constraints, options);
        iterations_total += attempt.iterations;
        worst_residual = worst_residual.max(attempt.residual_norm);

        let geometry_ok = sub_entities.iter().all(|e| e.invariants_hold());

        if attempt.converged && geometry_ok {
            for (slot, solved) in subsystem.entities.iter().zip(sub_entities) {
                entities[*slot] = solved;
            }
            classify(
                &sub_constraints,
                &entities_of(entities, &subsystem.entities),
                &structure,
                &mut outcomes,
            );
        } else {
            converged_all = false;
            let detail = if attempt.converged {
                "solution degenerates an entity below its minimum size".to_string()
            } else {
                format!(
                    "no convergence after {} iterations (residual {:.3e})",
                    attempt.iterations, attempt.residual_norm
                )
            };
            let minimal =
                minimal_conflict_set(entities, constraints, subsystem, options);
            debug!(?minimal, "subsystem failed to solve");
            for c in &sub_constraints {
                let status = if minimal.contains(&c.id) {
                    SatisfactionStatus::Conflicting
                } else {
                    SatisfactionStatus::Violated
                };
                outcomes.push((c.id.clone(), status));
            }
            conflicts.push(ConflictSet {
                constraints: minimal,
                detail,
            });
        }
    }

    // Constraints outside every subsystem (none in practice) stay pending.
    SolveReport {
        structure,
        outcomes,
        conflicts,
        converged: converged_all,
        iterations: iterations_total,
        residual_norm: worst_residual,
    }
}

fn entities_of(entities: &[SolverEntity], indices: &[usize]) -> Vec<SolverEntity> {
    indices.iter().map(|&i| entities[i].clone()).collect()
}

/// Post-solve labelling against per-constraint tolerances. Structurally
/// over-determined constraints whose residual still vanishes are
/// redundant rather than satisfied.
fn classify(
    constraints: &[SolverConstraint],
    entities: &[SolverEntity],
    structure: &StructuralReport,
    outcomes: &mut Vec<(ConstraintId, SatisfactionStatus)>,
) {
    let layout = ParamLayout::new(entities);
    let params = layout.pack(entities);
    for c in constraints {
        let mut r = Vec::new();
        residual::residuals(c, entities, &layout, &params, &mut r);
        let norm = r.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let in_overdetermined = structure
            .overdetermined_sets
            .iter()
            .any(|set| set.contains(&c.id));
        let status = if norm <= c.tolerance {
            if in_overdetermined {
                SatisfactionStatus::Redundant
            } else {
                SatisfactionStatus::Satisfied
            }
        } else {
            SatisfactionStatus::Violated
        };
        outcomes.push((c.id.clone(), status));
    }
}

struct Attempt {
    converged: bool,
    iterations: usize,
    residual_norm: f64,
}

/// One Levenberg-Marquardt run, with a single regularised restart from the
/// original positions on divergence.
fn solve_subsystem(
    entities: &mut [SolverEntity],
    constraints: &[SolverConstraint],
    options: &SolveOptions,
) -> Attempt {
    let layout = ParamLayout::new(entities);
    let initial = layout.pack(entities);

    let first = lm_iterate(entities, constraints, &layout, &initial, options, None);
    if first.0 {
        layout.unpack(entities, &first.3);
        return Attempt {
            converged: true,
            iterations: first.1,
            residual_norm: first.2,
        };
    }

    // Restart once: same initial guess, weak springs toward it to keep the
    // step bounded through the stiff region.
    let second = lm_iterate(
        entities,
        constraints,
        &layout,
        &initial,
        options,
        Some(options.restart_regularisation),
    );
    if second.0 {
        layout.unpack(entities, &second.3);
        return Attempt {
            converged: true,
            iterations: first.1 + second.1,
            residual_norm: second.2,
        };
    }

    Attempt {
        converged: false,
        iterations: first.1 + second.1,
        residual_norm: first.2.min(second.2),
    }
}

/// Core LM loop. Returns (converged, iterations, residual-inf-norm, params).
fn lm_iterate(
    entities: &[SolverEntity],
    constraints: &[SolverConstraint],
    layout: &ParamLayout,
    initial: &[f64],
    options: &SolveOptions,
    regularisation: Option<f64>,
) -> (bool, usize, f64, Vec<f64>) {
    let mut params = initial.to_vec();
    let n = params.len();
    if n == 0 || constraints.is_empty() {
        return (true, 0, 0.0, params);
    }

    // Convergence scale follows the subsystem's coordinate magnitude.
    let scale = 1.0 + initial.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let threshold = options.tolerance * scale;
    let mut lambda = options.lambda_initial;

    let eval = |p: &[f64]| -> Vec<f64> {
        let mut r = residual::collect(constraints, entities, layout, p);
        if let Some(alpha) = regularisation {
            for (j, v) in p.iter().enumerate() {
                r.push(alpha * (v - initial[j]));
            }
        }
        r
    };

    let spring_rows = regularisation.map_or(0, |_| n);
    for iteration in 0..options.max_iterations {
        let r = eval(&params);
        let m = r.len();
        // Convergence is judged on the constraint rows only; the restart
        // springs are a damping device, not requirements.
        let base = m - spring_rows;
        let inf_norm = r[..base].iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        if inf_norm < threshold {
            return (true, iteration, inf_norm, params);
        }

        // Numeric Jacobian of the (possibly regularised) residual stack.
        let jac = {
            let mut jac = residual::jacobian(
                constraints,
                entities,
                layout,
                &params,
                m - regularisation.map_or(0, |_| n),
            );
            if let Some(alpha) = regularisation {
                // Spring rows are diagonal.
                let base_rows = m - n;
                let mut full = vec![0.0; m * n];
                full[..base_rows * n].copy_from_slice(&jac[..base_rows * n]);
                for j in 0..n {
                    full[(base_rows + j) * n + j] = alpha;
                }
                jac = full;
            }
            jac
        };

        let j = DMatrix::from_row_slice(m, n, &jac);
        let rv = DVector::from_column_slice(&r);
        let jtj = j.transpose() * &j;
        let jtr = j.transpose() * rv;
        let total_sq: f64 = r.iter().map(|v| v * v).sum();

        let mut stepped = false;
        for _ in 0..10 {
            let mut damped = jtj.clone();
            for d in 0..n {
                damped[(d, d)] += lambda * (1.0 + jtj[(d, d)]);
            }
            if let Some(dx) = damped.lu().solve(&jtr) {
                let candidate: Vec<f64> =
                    params.iter().zip(dx.iter()).map(|(p, d)| p - d).collect();
                let new_r = eval(&candidate);
                let new_sq: f64 = new_r.iter().map(|v| v * v).sum();
                if new_sq < total_sq {
                    params = candidate;
                    lambda = (lambda / options.lambda_factor).max(1e-15);
                    stepped = true;
                    break;
                }
            }
            lambda *= options.lambda_factor;
        }

        if !stepped {
            // Gradient fallback keeps the iteration moving when every
            // damped step overshoots.
            let grad_sq: f64 = jtr.iter().map(|g| g * g).sum();
            if grad_sq < 1e-30 {
                break;
            }
            let step = 0.01 / grad_sq.sqrt();
            for (p, g) in params.iter_mut().zip(jtr.iter()) {
                *p -= step * g;
            }
            lambda *= options.lambda_factor;
        }
    }

    let r = eval(&params);
    let base = r.len() - spring_rows;
    let inf_norm = r[..base].iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    (inf_norm < threshold, options.max_iterations, inf_norm, params)
}

/// Leave-one-out search for a minimal conflicting subset of a failed
/// subsystem: a constraint is in the set when removing it lets the rest
/// converge to valid geometry.
fn minimal_conflict_set(
    entities: &[SolverEntity],
    constraints: &[SolverConstraint],
    subsystem: &analysis::Subsystem,
    options: &SolveOptions,
) -> Vec<ConstraintId> {
    let mut minimal = Vec::new();
    for &skip in &subsystem.constraints {
        let sub_constraints: Vec<SolverConstraint> = subsystem
            .constraints
            .iter()
            .filter(|&&ci| ci != skip)
            .map(|&ci| {
                let mut c = constraints[ci].clone();
                c.entities = c
                    .entities
                    .iter()
                    .map(|&ei| {
                        subsystem
                            .entities
                            .iter()
                            .position(|&x| x == ei)
                            .unwrap_or(0)
                    })
                    .collect();
                c
            })
            .collect();
        let mut sub_entities: Vec<SolverEntity> = subsystem
            .entities
            .iter()
            .map(|&ei| entities[ei].clone())
            .collect();
        let attempt = solve_subsystem(&mut sub_entities, &sub_constraints, options);
        if attempt.converged && sub_entities.iter().all(|e| e.invariants_hold()) {
            minimal.push(constraints[skip].id.clone());
        }
    }
    if minimal.is_empty() {
        // Nothing converged even after removals: report the whole subsystem.
        subsystem
            .constraints
            .iter()
            .map(|&ci| constraints[ci].id.clone())
            .collect()
    } else {
        minimal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{ConstraintKind, EntityId, EntityKind};

    fn line(id: &str, start: [f64; 3], end: [f64; 3]) -> SolverEntity {
        SolverEntity {
            id: EntityId(format!("main:line3d_{id}")),
            kind: EntityKind::Line3d,
            params: vec![start[0], start[1], start[2], end[0], end[1], end[2]],
        }
    }

    fn point(id: &str, p: [f64; 3]) -> SolverEntity {
        SolverEntity {
            id: EntityId(format!("main:point3d_{id}")),
            kind: EntityKind::Point3d,
            params: p.to_vec(),
        }
    }

    fn constraint(
        id: &str,
        kind: ConstraintKind,
        entities: Vec<usize>,
        value: Option<f64>,
    ) -> SolverConstraint {
        SolverConstraint {
            id: ConstraintId(format!("main:constraint_{id}")),
            kind,
            entities,
            value,
            tolerance: kind.default_tolerance(),
        }
    }

    #[test]
    fn already_satisfied_perpendicular() {
        let mut entities = vec![
            line("a", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]),
            line("b", [10.0, 0.0, 0.0], [10.0, 10.0, 0.0]),
        ];
        let constraints = vec![constraint(
            "perp",
            ConstraintKind::Perpendicular,
            vec![0, 1],
            None,
        )];
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        assert!(report.converged);
        assert!(report.conflicts.is_empty());
        assert_eq!(
            report.outcomes[0].1,
            SatisfactionStatus::Satisfied,
            "{:?}",
            report.outcomes
        );
        // 12 entity DOF minus 1 removed.
        assert_eq!(report.dof_remaining(), 11);
    }

    #[test]
    fn distance_solve_moves_points() {
        let mut entities = vec![point("a", [0.0, 0.0, 0.0]), point("b", [3.0, 4.0, 0.0])];
        let constraints = vec![constraint(
            "d",
            ConstraintKind::Distance,
            vec![0, 1],
            Some(10.0),
        )];
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        assert!(report.converged, "residual {}", report.residual_norm);
        let dx = entities[1].params[0] - entities[0].params[0];
        let dy = entities[1].params[1] - entities[0].params[1];
        let dz = entities[1].params[2] - entities[0].params[2];
        let dist = (dx * dx + dy * dy + dz * dz).sqrt();
        assert!((dist - 10.0).abs() < 1e-4, "distance {dist}");
    }

    #[test]
    fn perpendicular_then_parallel_conflicts() {
        let mut entities = vec![
            line("a", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]),
            line("b", [10.0, 0.0, 0.0], [10.0, 10.0, 0.0]),
        ];
        let constraints = vec![
            constraint("perp", ConstraintKind::Perpendicular, vec![0, 1], None),
            constraint("par", ConstraintKind::Parallel, vec![0, 1], None),
        ];
        let before = entities.clone();
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        assert!(!report.converged);
        assert_eq!(report.conflicts.len(), 1);
        let set = &report.conflicts[0].constraints;
        assert!(
            set.iter().any(|id| id.as_str().contains("perp")),
            "conflict set {set:?} must name the perpendicular constraint"
        );
        assert!(set.iter().any(|id| id.as_str().contains("par")));
        // Failed subsystems leave geometry untouched.
        for (a, b) in entities.iter().zip(before.iter()) {
            assert_eq!(a.params, b.params);
        }
    }

    #[test]
    fn redundant_duplicate_distance_labelled_redundant() {
        let mut entities = vec![point("a", [0.0, 0.0, 0.0]), point("b", [5.0, 0.0, 0.0])];
        let constraints = vec![
            constraint("d1", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
            constraint("d2", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
            constraint("d3", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
            constraint("d4", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
            constraint("d5", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
            constraint("d6", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
            constraint("d7", ConstraintKind::Distance, vec![0, 1], Some(5.0)),
        ];
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        assert!(report.converged);
        // 6 params, 7 equations: structurally over-determined but
        // numerically consistent, so everything is redundant or satisfied
        // and nothing conflicts.
        assert!(report.conflicts.is_empty());
        assert!(report
            .outcomes
            .iter()
            .any(|(_, s)| *s == SatisfactionStatus::Redundant));
    }

    #[test]
    fn radius_solve_sets_radius() {
        let mut entities = vec![SolverEntity {
            id: EntityId("main:circle_c".into()),
            kind: EntityKind::Circle,
            params: vec![0.0, 0.0, 0.0, 3.0],
        }];
        let constraints = vec![constraint(
            "r",
            ConstraintKind::Radius,
            vec![0],
            Some(10.0),
        )];
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        assert!(report.converged);
        assert!((entities[0].params[3] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn tangent_line_circle_converges() {
        let mut entities = vec![
            line("l", [-10.0, 5.5, 0.0], [10.0, 5.5, 0.0]),
            SolverEntity {
                id: EntityId("main:circle_c".into()),
                kind: EntityKind::Circle,
                params: vec![0.0, 0.0, 0.0, 5.0],
            },
        ];
        let constraints = vec![constraint(
            "t",
            ConstraintKind::Tangent,
            vec![0, 1],
            None,
        )];
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        assert!(report.converged, "residual {}", report.residual_norm);
    }
}

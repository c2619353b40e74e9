//! Property tests over the constraint engine: convergence of satisfiable
//! systems and the DOF census identity.

use proptest::prelude::*;

use anvil_types::{ConstraintId, ConstraintKind, EntityId, EntityKind};
use constraint_solver::{analyze, solve, SolveOptions, SolverConstraint, SolverEntity};

fn point(tag: &str, p: [f64; 3]) -> SolverEntity {
    SolverEntity {
        id: EntityId(format!("main:point3d_{tag}")),
        kind: EntityKind::Point3d,
        params: p.to_vec(),
    }
}

proptest! {
    #[test]
    fn distance_constraint_always_achievable(
        ax in -50.0f64..50.0,
        ay in -50.0f64..50.0,
        bx in -50.0f64..50.0,
        by in -50.0f64..50.0,
        target in 1.0f64..80.0,
    ) {
        let mut entities = vec![
            point("a", [ax, ay, 0.0]),
            point("b", [bx, by, 1.0]),
        ];
        let constraints = vec![SolverConstraint {
            id: ConstraintId("main:constraint_d".to_string()),
            kind: ConstraintKind::Distance,
            entities: vec![0, 1],
            value: Some(target),
            tolerance: 1e-4,
        }];
        let report = solve(&mut entities, &constraints, &SolveOptions::default());
        prop_assert!(report.converged, "residual {}", report.residual_norm);

        let dx = entities[1].params[0] - entities[0].params[0];
        let dy = entities[1].params[1] - entities[0].params[1];
        let dz = entities[1].params[2] - entities[0].params[2];
        let dist = (dx * dx + dy * dy + dz * dz).sqrt();
        prop_assert!((dist - target).abs() < 1e-3, "distance {dist} vs {target}");
    }

    #[test]
    fn census_identity_holds(count in 1usize..6) {
        // N free points chained by N-1 distance constraints: remaining DOF
        // equals entity DOF minus constraint removals, by construction.
        let entities: Vec<SolverEntity> = (0..count)
            .map(|i| point(&format!("p{i}"), [i as f64 * 10.0, 0.0, 0.0]))
            .collect();
        let constraints: Vec<SolverConstraint> = (1..count)
            .map(|i| SolverConstraint {
                id: ConstraintId(format!("main:constraint_{i}")),
                kind: ConstraintKind::Distance,
                entities: vec![i - 1, i],
                value: Some(10.0),
                tolerance: 1e-4,
            })
            .collect();
        let report = analyze(&entities, &constraints);
        prop_assert_eq!(report.total_dof, 3 * count as i64);
        prop_assert_eq!(report.dof_removed, count as i64 - 1);
        prop_assert_eq!(
            report.dof_remaining,
            report.total_dof - report.dof_removed
        );
    }
}

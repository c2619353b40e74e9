//! Residual kernels: each constraint contributes scalar equations that are
//! zero exactly at satisfaction. Directions are normalised so angular
//! residuals stay dimensionless and comparable to radian tolerances.

use nalgebra::Vector3;

use anvil_types::{ConstraintKind, EntityKind};

use crate::model::{SolverConstraint, SolverEntity};

/// A view of one subsystem's packed parameter vector: entity `i`'s params
/// live at `offsets[i]..offsets[i] + len`.
pub struct ParamLayout {
    pub offsets: Vec<usize>,
    pub total: usize,
}

impl ParamLayout {
    pub fn new(entities: &[SolverEntity]) -> Self {
        let mut offsets = Vec::with_capacity(entities.len());
        let mut total = 0;
        for e in entities {
            offsets.push(total);
            total += e.param_count();
        }
        Self { offsets, total }
    }

    pub fn pack(&self, entities: &[SolverEntity]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total);
        for e in entities {
            out.extend_from_slice(&e.params);
        }
        out
    }

    pub fn unpack(&self, entities: &mut [SolverEntity], params: &[f64]) {
        for (i, e) in entities.iter_mut().enumerate() {
            let o = self.offsets[i];
            let n = e.params.len();
            e.params.copy_from_slice(&params[o..o + n]);
        }
    }
}

/// A point-like entity's position (points, circle and arc centers).
fn point_of(e: &SolverEntity, params: &[f64], offset: usize) -> Vector3<f64> {
    match e.kind {
        EntityKind::Point2d => Vector3::new(params[offset], params[offset + 1], 0.0),
        EntityKind::Point3d | EntityKind::Circle | EntityKind::Arc => {
            Vector3::new(params[offset], params[offset + 1], params[offset + 2])
        }
        EntityKind::Line2d => Vector3::new(params[offset], params[offset + 1], 0.0),
        EntityKind::Line3d => {
            Vector3::new(params[offset], params[offset + 1], params[offset + 2])
        }
        _ => Vector3::zeros(),
    }
}

/// A line's endpoints.
fn line_of(
    e: &SolverEntity,
    params: &[f64],
    offset: usize,
) -> (Vector3<f64>, Vector3<f64>) {
    match e.kind {
        EntityKind::Line2d => (
            Vector3::new(params[offset], params[offset + 1], 0.0),
            Vector3::new(params[offset + 2], params[offset + 3], 0.0),
        ),
        EntityKind::Line3d => (
            Vector3::new(params[offset], params[offset + 1], params[offset + 2]),
            Vector3::new(params[offset + 3], params[offset + 4], params[offset + 5]),
        ),
        _ => (Vector3::zeros(), Vector3::x()),
    }
}

fn direction_of(e: &SolverEntity, params: &[f64], offset: usize) -> Vector3<f64> {
    let (s, t) = line_of(e, params, offset);
    let d = t - s;
    let len = d.norm();
    if len < 1e-12 {
        Vector3::x()
    } else {
        d / len
    }
}

fn radius_of(e: &SolverEntity, params: &[f64], offset: usize) -> f64 {
    match e.kind {
        EntityKind::Circle | EntityKind::Arc => params[offset + 3],
        _ => 0.0,
    }
}

/// Distance from a point to an infinite line.
fn point_line_distance(p: Vector3<f64>, a: Vector3<f64>, b: Vector3<f64>) -> f64 {
    let d = b - a;
    let len = d.norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    (p - a).cross(&d).norm() / len
}

/// Evaluate the residual equations of one constraint.
pub fn residuals(
    c: &SolverConstraint,
    entities: &[SolverEntity],
    layout: &ParamLayout,
    params: &[f64],
    out: &mut Vec<f64>,
) {
    let ent = |i: usize| &entities[c.entities[i]];
    let off = |i: usize| layout.offsets[c.entities[i]];

    match c.kind {
        ConstraintKind::Coincident => {
            let a = point_of(ent(0), params, off(0));
            let b = point_of(ent(1), params, off(1));
            let planar = ent(0).is_2d() || ent(1).is_2d();
            out.push(a.x - b.x);
            out.push(a.y - b.y);
            if !planar {
                out.push(a.z - b.z);
            }
        }
        ConstraintKind::Parallel => {
            let da = direction_of(ent(0), params, off(0));
            let db = direction_of(ent(1), params, off(1));
            let cross = da.cross(&db);
            let planar = ent(0).is_2d() && ent(1).is_2d();
            if planar {
                out.push(cross.z);
            } else {
                out.push(cross.x);
                out.push(cross.y);
                out.push(cross.z);
            }
        }
        ConstraintKind::Perpendicular => {
            let da = direction_of(ent(0), params, off(0));
            let db = direction_of(ent(1), params, off(1));
            out.push(da.dot(&db));
        }
        ConstraintKind::Tangent => {
            let (a, b) = (ent(0), ent(1));
            let a_line = matches!(a.kind, EntityKind::Line2d | EntityKind::Line3d);
            let b_line = matches!(b.kind, EntityKind::Line2d | EntityKind::Line3d);
            if a_line && !b_line {
                let (s, t) = line_of(a, params, off(0));
                let center = point_of(b, params, off(1));
                let r = radius_of(b, params, off(1));
                out.push(point_line_distance(center, s, t) - r);
            } else if b_line && !a_line {
                let (s, t) = line_of(b, params, off(1));
                let center = point_of(a, params, off(0));
                let r = radius_of(a, params, off(0));
                out.push(point_line_distance(center, s, t) - r);
            } else {
                // Circle-circle: whichever of external/internal tangency is
                // closer at the current positions.
                let ca = point_of(a, params, off(0));
                let cb = point_of(b, params, off(1));
                let ra = radius_of(a, params, off(0));
                let rb = radius_of(b, params, off(1));
                let dist = (ca - cb).norm();
                let external = dist - (ra + rb);
                let internal = dist - (ra - rb).abs();
                out.push(if external.abs() <= internal.abs() {
                    external
                } else {
                    internal
                });
            }
        }
        ConstraintKind::Distance => {
            let value = c.value.unwrap_or(0.0);
            let a = ent(0);
            let b = ent(1);
            let a_line = matches!(a.kind, EntityKind::Line2d | EntityKind::Line3d);
            let b_line = matches!(b.kind, EntityKind::Line2d | EntityKind::Line3d);
            if a_line != b_line {
                let (p, (s, t)) = if a_line {
                    (point_of(b, params, off(1)), line_of(a, params, off(0)))
                } else {
                    (point_of(a, params, off(0)), line_of(b, params, off(1)))
                };
                out.push(point_line_distance(p, s, t) - value);
            } else {
                let pa = point_of(a, params, off(0));
                let pb = point_of(b, params, off(1));
                out.push((pa - pb).norm() - value);
            }
        }
        ConstraintKind::Angle => {
            let value = c.value.unwrap_or(0.0);
            let da = direction_of(ent(0), params, off(0));
            let db = direction_of(ent(1), params, off(1));
            out.push(da.dot(&db) - value.cos());
        }
        ConstraintKind::Radius => {
            let value = c.value.unwrap_or(0.0);
            out.push(radius_of(ent(0), params, off(0)) - value);
        }
    }
}

/// Stack every constraint's residuals into one vector.
pub fn collect(
    constraints: &[SolverConstraint],
    entities: &[SolverEntity],
    layout: &ParamLayout,
    params: &[f64],
) -> Vec<f64> {
    let mut out = Vec::new();
    for c in constraints {
        residuals(c, entities, layout, params, &mut out);
    }
    out
}

/// Central-difference Jacobian, row-major `m × n`.
pub fn jacobian(
    constraints: &[SolverConstraint],
    entities: &[SolverEntity],
    layout: &ParamLayout,
    params: &[f64],
    m: usize,
) -> Vec<f64> {
    let n = params.len();
    let mut jac = vec![0.0; m * n];
    let mut work = params.to_vec();
    for j in 0..n {
        let scale = 1.0 + params[j].abs();
        let h = 1e-7 * scale;
        work[j] = params[j] + h;
        let plus = collect(constraints, entities, layout, &work);
        work[j] = params[j] - h;
        let minus = collect(constraints, entities, layout, &work);
        work[j] = params[j];
        for i in 0..m.min(plus.len()).min(minus.len()) {
            jac[i * n + j] = (plus[i] - minus[i]) / (2.0 * h);
        }
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{ConstraintId, EntityId};

    fn line(id: &str, start: [f64; 3], end: [f64; 3]) -> SolverEntity {
        SolverEntity {
            id: EntityId(format!("main:line3d_{id}")),
            kind: EntityKind::Line3d,
            params: vec![start[0], start[1], start[2], end[0], end[1], end[2]],
        }
    }

    fn cid(n: &str) -> ConstraintId {
        ConstraintId(format!("main:constraint_{n}"))
    }

    #[test]
    fn perpendicular_residual_zero_when_orthogonal() {
        let entities = vec![
            line("a", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]),
            line("b", [10.0, 0.0, 0.0], [10.0, 10.0, 0.0]),
        ];
        let layout = ParamLayout::new(&entities);
        let params = layout.pack(&entities);
        let c = SolverConstraint {
            id: cid("c"),
            kind: ConstraintKind::Perpendicular,
            entities: vec![0, 1],
            value: None,
            tolerance: 1e-3,
        };
        let r = collect(&[c], &entities, &layout, &params);
        assert_eq!(r.len(), 1);
        assert!(r[0].abs() < 1e-12);
    }

    #[test]
    fn parallel_residual_nonzero_for_orthogonal_lines() {
        let entities = vec![
            line("a", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]),
            line("b", [10.0, 0.0, 0.0], [10.0, 10.0, 0.0]),
        ];
        let layout = ParamLayout::new(&entities);
        let params = layout.pack(&entities);
        let c = SolverConstraint {
            id: cid("c"),
            kind: ConstraintKind::Parallel,
            entities: vec![0, 1],
            value: None,
            tolerance: 1e-3,
        };
        let r = collect(&[c], &entities, &layout, &params);
        let norm: f64 = r.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9, "unit directions cross norm");
    }

    #[test]
    fn jacobian_matches_finite_difference_of_distance() {
        let entities = vec![
            SolverEntity {
                id: EntityId("main:point3d_a".into()),
                kind: EntityKind::Point3d,
                params: vec![0.0, 0.0, 0.0],
            },
            SolverEntity {
                id: EntityId("main:point3d_b".into()),
                kind: EntityKind::Point3d,
                params: vec![3.0, 4.0, 0.0],
            },
        ];
        let layout = ParamLayout::new(&entities);
        let params = layout.pack(&entities);
        let c = SolverConstraint {
            id: cid("d"),
            kind: ConstraintKind::Distance,
            entities: vec![0, 1],
            value: Some(5.0),
            tolerance: 1e-4,
        };
        let constraints = vec![c];
        let jac = jacobian(&constraints, &entities, &layout, &params, 1);
        // d|a-b|/d(bx) = (bx-ax)/|a-b| = 3/5
        assert!((jac[3] - 0.6).abs() < 1e-5);
        assert!((jac[4] - 0.8).abs() < 1e-5);
    }
}

use anvil_types::{
    ConstraintId, ConstraintKind, EntityId, EntityKind, EntityRecord, PropertySet,
};

/// A variable-bearing node of the constraint graph: one geometric entity
/// flattened into a parameter slice.
///
/// Parameter layouts per kind:
/// - point2d: `[x, y]`
/// - point3d: `[x, y, z]`
/// - line2d: `[sx, sy, ex, ey]`
/// - line3d: `[sx, sy, sz, ex, ey, ez]`
/// - circle: `[cx, cy, cz, r]`
/// - arc: `[cx, cy, cz, r, a0, a1]`
#[derive(Debug, Clone)]
pub struct SolverEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub params: Vec<f64>,
}

impl SolverEntity {
    /// Extract solver parameters from a stored record. Returns `None` for
    /// kinds the constraint engine does not position (solids, sketches…).
    pub fn from_record(record: &EntityRecord) -> Option<Self> {
        let params = match &record.properties {
            PropertySet::Point2d { position } => position.to_vec(),
            PropertySet::Point3d { position } => position.to_vec(),
            PropertySet::Line2d { start, end } => {
                vec![start[0], start[1], end[0], end[1]]
            }
            PropertySet::Line3d { start, end } => {
                vec![start[0], start[1], start[2], end[0], end[1], end[2]]
            }
            PropertySet::Circle { center, radius, .. } => {
                vec![center[0], center[1], center[2], *radius]
            }
            PropertySet::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                ..
            } => vec![
                center[0],
                center[1],
                center[2],
                *radius,
                *start_angle,
                *end_angle,
            ],
            _ => return None,
        };
        Some(Self {
            id: record.id.clone(),
            kind: record.kind,
            params,
        })
    }

    /// Write solved parameters back into a property set, leaving fields the
    /// solver does not touch (normals, plane bindings) alone.
    pub fn write_back(&self, props: &mut PropertySet) {
        match props {
            PropertySet::Point2d { position } => {
                position[0] = self.params[0];
                position[1] = self.params[1];
            }
            PropertySet::Point3d { position } => {
                position.copy_from_slice(&self.params[..3]);
            }
            PropertySet::Line2d { start, end } => {
                start[0] = self.params[0];
                start[1] = self.params[1];
                end[0] = self.params[2];
                end[1] = self.params[3];
            }
            PropertySet::Line3d { start, end } => {
                start.copy_from_slice(&self.params[..3]);
                end.copy_from_slice(&self.params[3..6]);
            }
            PropertySet::Circle { center, radius, .. } => {
                center.copy_from_slice(&self.params[..3]);
                *radius = self.params[3];
            }
            PropertySet::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                ..
            } => {
                center.copy_from_slice(&self.params[..3]);
                *radius = self.params[3];
                *start_angle = self.params[4];
                *end_angle = self.params[5];
            }
            _ => {}
        }
    }

    /// Whether the solved parameters still satisfy the kind's invariants
    /// (a solver run that collapses a line to zero length is a conflict in
    /// disguise).
    pub fn invariants_hold(&self) -> bool {
        match self.kind {
            EntityKind::Line2d => {
                let dx = self.params[2] - self.params[0];
                let dy = self.params[3] - self.params[1];
                (dx * dx + dy * dy).sqrt() >= 1e-6
            }
            EntityKind::Line3d => {
                let dx = self.params[3] - self.params[0];
                let dy = self.params[4] - self.params[1];
                let dz = self.params[5] - self.params[2];
                (dx * dx + dy * dy + dz * dz).sqrt() >= 1e-6
            }
            EntityKind::Circle | EntityKind::Arc => self.params[3] >= 1e-6,
            _ => true,
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Whether the kind is intrinsically planar (z fixed at its stored value).
    pub fn is_2d(&self) -> bool {
        matches!(self.kind, EntityKind::Point2d | EntityKind::Line2d)
    }
}

/// One constraint edge over entity indices into the engine's entity slice.
#[derive(Debug, Clone)]
pub struct SolverConstraint {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
    /// Indices into the entity slice handed to the engine.
    pub entities: Vec<usize>,
    pub value: Option<f64>,
    pub tolerance: f64,
}

/// Degrees of freedom a constraint removes, given the kinds it touches.
pub fn dof_removed(kind: ConstraintKind, entity_kinds: &[EntityKind]) -> u32 {
    let any_2d = entity_kinds
        .iter()
        .any(|k| matches!(k, EntityKind::Point2d | EntityKind::Line2d));
    match kind {
        ConstraintKind::Coincident => {
            if any_2d {
                2
            } else {
                3
            }
        }
        ConstraintKind::Parallel => {
            if any_2d {
                1
            } else {
                2
            }
        }
        ConstraintKind::Perpendicular
        | ConstraintKind::Tangent
        | ConstraintKind::Distance
        | ConstraintKind::Angle
        | ConstraintKind::Radius => 1,
    }
}

/// Which entity kinds a constraint kind accepts, in order. Used by the
/// apply handler to produce a precise rejection before any numerical work.
pub fn accepts(kind: ConstraintKind, entity_kinds: &[EntityKind]) -> Result<(), String> {
    let point_like = |k: &EntityKind| {
        matches!(
            k,
            EntityKind::Point2d | EntityKind::Point3d | EntityKind::Circle | EntityKind::Arc
        )
    };
    let line_like = |k: &EntityKind| matches!(k, EntityKind::Line2d | EntityKind::Line3d);
    let circle_like = |k: &EntityKind| matches!(k, EntityKind::Circle | EntityKind::Arc);

    let ok = match kind {
        ConstraintKind::Coincident => {
            entity_kinds.len() == 2 && entity_kinds.iter().all(point_like)
        }
        ConstraintKind::Parallel | ConstraintKind::Perpendicular | ConstraintKind::Angle => {
            entity_kinds.len() == 2 && entity_kinds.iter().all(line_like)
        }
        ConstraintKind::Tangent => {
            entity_kinds.len() == 2
                && ((line_like(&entity_kinds[0]) && circle_like(&entity_kinds[1]))
                    || (circle_like(&entity_kinds[0]) && line_like(&entity_kinds[1]))
                    || entity_kinds.iter().all(circle_like))
        }
        ConstraintKind::Distance => {
            entity_kinds.len() == 2
                && ((entity_kinds.iter().all(point_like))
                    || (point_like(&entity_kinds[0]) && line_like(&entity_kinds[1]))
                    || (line_like(&entity_kinds[0]) && point_like(&entity_kinds[1])))
        }
        ConstraintKind::Radius => entity_kinds.len() == 1 && circle_like(&entity_kinds[0]),
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "{} cannot constrain entities of kinds {:?}",
            kind.as_str(),
            entity_kinds
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{AgentId, WorkspaceId};
    use chrono::Utc;

    fn record(props: PropertySet) -> EntityRecord {
        let ws = WorkspaceId::root();
        let id = EntityId::mint(&ws, props.kind());
        EntityRecord::new(id, ws, props, AgentId::new("test"), Utc::now())
    }

    #[test]
    fn line_round_trips_through_params() {
        let mut rec = record(PropertySet::Line3d {
            start: [0.0, 0.0, 0.0],
            end: [10.0, 0.0, 0.0],
        });
        let mut ent = SolverEntity::from_record(&rec).unwrap();
        ent.params[3] = 7.0;
        ent.write_back(&mut rec.properties);
        assert_eq!(
            rec.properties,
            PropertySet::Line3d {
                start: [0.0, 0.0, 0.0],
                end: [7.0, 0.0, 0.0],
            }
        );
    }

    #[test]
    fn solids_are_not_solver_entities() {
        let rec = record(PropertySet::Solid { brep: vec![1, 2] });
        assert!(SolverEntity::from_record(&rec).is_none());
    }

    #[test]
    fn dof_table_matches_spec_examples() {
        assert_eq!(
            dof_removed(ConstraintKind::Perpendicular, &[EntityKind::Line3d; 2]),
            1
        );
        assert_eq!(
            dof_removed(ConstraintKind::Parallel, &[EntityKind::Line3d; 2]),
            2
        );
        assert_eq!(
            dof_removed(
                ConstraintKind::Coincident,
                &[EntityKind::Point2d, EntityKind::Point2d]
            ),
            2
        );
    }

    #[test]
    fn kind_acceptance() {
        assert!(accepts(ConstraintKind::Radius, &[EntityKind::Circle]).is_ok());
        assert!(accepts(ConstraintKind::Radius, &[EntityKind::Line3d]).is_err());
        assert!(accepts(
            ConstraintKind::Tangent,
            &[EntityKind::Line3d, EntityKind::Circle]
        )
        .is_ok());
        assert!(accepts(
            ConstraintKind::Parallel,
            &[EntityKind::Line3d, EntityKind::Point3d]
        )
        .is_err());
    }
}

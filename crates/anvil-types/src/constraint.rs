use serde::{Deserialize, Serialize};

use crate::ids::{ConstraintId, EntityId, WorkspaceId};

/// Default tolerance for distance-like constraints, in millimetres.
pub const DISTANCE_TOLERANCE: f64 = 1e-4;
/// Default tolerance for angle-like constraints, in radians.
pub const ANGLE_TOLERANCE: f64 = 1e-3;

/// The kind of geometric constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Coincident,
    Parallel,
    Perpendicular,
    Tangent,
    Distance,
    Angle,
    Radius,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Coincident => "coincident",
            ConstraintKind::Parallel => "parallel",
            ConstraintKind::Perpendicular => "perpendicular",
            ConstraintKind::Tangent => "tangent",
            ConstraintKind::Distance => "distance",
            ConstraintKind::Angle => "angle",
            ConstraintKind::Radius => "radius",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "coincident" => ConstraintKind::Coincident,
            "parallel" => ConstraintKind::Parallel,
            "perpendicular" => ConstraintKind::Perpendicular,
            "tangent" => ConstraintKind::Tangent,
            "distance" => ConstraintKind::Distance,
            "angle" => ConstraintKind::Angle,
            "radius" => ConstraintKind::Radius,
            _ => return None,
        })
    }

    /// How many entities this constraint addresses.
    pub fn arity(&self) -> usize {
        match self {
            ConstraintKind::Radius => 1,
            _ => 2,
        }
    }

    /// Whether this constraint carries a numeric value parameter.
    pub fn takes_value(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Distance | ConstraintKind::Angle | ConstraintKind::Radius
        )
    }

    pub fn default_tolerance(&self) -> f64 {
        match self {
            ConstraintKind::Angle | ConstraintKind::Parallel | ConstraintKind::Perpendicular => {
                ANGLE_TOLERANCE
            }
            _ => DISTANCE_TOLERANCE,
        }
    }
}

/// Where a constraint sits in its lifecycle.
///
/// `Pending → Satisfied → (Violated | Redundant) → Satisfied`, with
/// `Conflicting` terminal unless the conflict set is pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionStatus {
    Pending,
    Satisfied,
    Violated,
    Redundant,
    Conflicting,
}

/// One stored constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRecord {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
    pub workspace_id: WorkspaceId,
    /// One or two entities, per `ConstraintKind::arity`.
    pub entities: Vec<EntityId>,
    /// Distance (mm), angle (rad) or radius (mm) parameter.
    pub value: Option<f64>,
    pub tolerance: f64,
    pub status: SatisfactionStatus,
    /// Degrees of freedom this constraint removes (0–6).
    pub dof_removed: u32,
}

impl ConstraintRecord {
    /// Range check the value parameter: distance ≥ 0, angle in [0, 2π],
    /// radius > 0.
    pub fn validate_value(kind: ConstraintKind, value: Option<f64>) -> Result<(), String> {
        match (kind, value) {
            (ConstraintKind::Distance, Some(v)) if !(v.is_finite() && v >= 0.0) => {
                Err("distance must be a finite value ≥ 0".into())
            }
            (ConstraintKind::Angle, Some(v))
                if !(v.is_finite() && (0.0..=std::f64::consts::TAU).contains(&v)) =>
            {
                Err("angle must lie in [0, 2π]".into())
            }
            (ConstraintKind::Radius, Some(v)) if !(v.is_finite() && v > 0.0) => {
                Err("radius must be a finite value > 0".into())
            }
            (k, None) if k.takes_value() => Err(format!("{} requires a value", k.as_str())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_ranges() {
        assert!(ConstraintRecord::validate_value(ConstraintKind::Distance, Some(0.0)).is_ok());
        assert!(ConstraintRecord::validate_value(ConstraintKind::Distance, Some(-1.0)).is_err());
        assert!(ConstraintRecord::validate_value(ConstraintKind::Angle, Some(7.0)).is_err());
        assert!(ConstraintRecord::validate_value(ConstraintKind::Radius, Some(0.0)).is_err());
        assert!(ConstraintRecord::validate_value(ConstraintKind::Radius, None).is_err());
        assert!(ConstraintRecord::validate_value(ConstraintKind::Parallel, None).is_ok());
    }
}

use serde::{Deserialize, Serialize};

use crate::ids::{ConstraintId, EntityId};

/// The closed union of wire-visible failures.
///
/// Handlers translate kernel and numerical failures into these kinds at the
/// boundary and never leak internal error types. The serialized `code` values
/// are stable wire strings.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum CoreError {
    #[error("request line is not valid JSON: {detail}")]
    ParseError { detail: String },

    #[error("unknown method: {method}")]
    MethodNotFound { method: String },

    #[error("invalid parameter `{field}`: {provided_value} (accepted: {accepted_range})")]
    InvalidParameter {
        field: String,
        provided_value: String,
        accepted_range: String,
        /// A corrective value likely to be accepted on resubmission.
        suggestion: Option<String>,
    },

    #[error("missing required parameter `{field}`")]
    MissingParameter { field: String },

    #[error("entity not found: {id}")]
    EntityNotFound { id: EntityId },

    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("invalid sketch: {reason}")]
    InvalidSketch { reason: String },

    #[error("topology validation failed: {codes:?}")]
    TopologyError { codes: Vec<String> },

    #[error("operation invalid: {reason}")]
    OperationInvalid { reason: String },

    #[error("constraint conflict involving {conflicting:?}")]
    ConstraintConflict {
        /// Minimal constraint subset sufficient to cause the conflict.
        conflicting: Vec<ConstraintId>,
        detail: String,
    },

    #[error("circular dependency: {detail}")]
    CircularDependency { detail: String },

    #[error("workspace conflict: {detail}")]
    WorkspaceConflict { detail: String },

    #[error("role `{role}` may not call `{method}`")]
    RoleViolation { role: String, method: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("import failed: {reason}")]
    ImportFailed { reason: String },

    #[error("operation exceeded its wall-clock budget of {budget_ms} ms")]
    Timeout { budget_ms: u64 },

    #[error("geometry engine error: {message}")]
    GeometryEngineError { message: String },
}

impl CoreError {
    /// The stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ParseError { .. } => "ParseError",
            CoreError::MethodNotFound { .. } => "MethodNotFound",
            CoreError::InvalidParameter { .. } => "InvalidParameter",
            CoreError::MissingParameter { .. } => "MissingParameter",
            CoreError::EntityNotFound { .. } => "EntityNotFound",
            CoreError::InvalidGeometry { .. } => "InvalidGeometry",
            CoreError::InvalidSketch { .. } => "InvalidSketch",
            CoreError::TopologyError { .. } => "TopologyError",
            CoreError::OperationInvalid { .. } => "OperationInvalid",
            CoreError::ConstraintConflict { .. } => "ConstraintConflict",
            CoreError::CircularDependency { .. } => "CircularDependency",
            CoreError::WorkspaceConflict { .. } => "WorkspaceConflict",
            CoreError::RoleViolation { .. } => "RoleViolation",
            CoreError::FileNotFound { .. } => "FileNotFound",
            CoreError::UnsupportedFormat { .. } => "UnsupportedFormat",
            CoreError::ImportFailed { .. } => "ImportFailed",
            CoreError::Timeout { .. } => "Timeout",
            CoreError::GeometryEngineError { .. } => "GeometryEngineError",
        }
    }

    /// Whether a corrected resubmission from the caller is likely to succeed.
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            CoreError::GeometryEngineError { .. } | CoreError::Timeout { .. }
        )
    }

    /// Convenience constructor for a range violation with a suggestion.
    pub fn invalid_parameter(
        field: &str,
        provided: impl ToString,
        accepted: &str,
        suggestion: Option<&str>,
    ) -> Self {
        CoreError::InvalidParameter {
            field: field.to_string(),
            provided_value: provided.to_string(),
            accepted_range: accepted.to_string(),
            suggestion: suggestion.map(str::to_string),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_wire_values() {
        let e = CoreError::MethodNotFound {
            method: "x".into(),
        };
        assert_eq!(e.code(), "MethodNotFound");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["code"], "MethodNotFound");
    }

    #[test]
    fn recoverable_flags() {
        assert!(CoreError::MissingParameter { field: "x".into() }.recoverable());
        assert!(!CoreError::Timeout { budget_ms: 1 }.recoverable());
    }
}

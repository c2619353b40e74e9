use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintRecord;
use crate::entity::{EntityRecord, PropertySet};
use crate::ids::{AgentId, ConstraintId, EntityId, WorkspaceId};

/// Terminal status of an operation. Warnings still succeed; errors produce
/// no output entities and no state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Warning,
    Error,
}

/// Payload sufficient to reverse an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UndoPayload {
    /// Reverse a creation: delete the created entity.
    CreatedEntity { id: EntityId },
    /// Reverse a modification: restore the prior properties.
    ModifiedEntity {
        id: EntityId,
        prior: Box<PropertySet>,
    },
    /// Reverse a deletion: reinsert the full record.
    DeletedEntity { record: Box<EntityRecord> },
    CreatedConstraint { id: ConstraintId },
    RemovedConstraint { record: Box<ConstraintRecord> },
    /// Multi-entity operations (boolean, merge) compose element payloads;
    /// they are reversed in reverse order.
    Composite { items: Vec<UndoPayload> },
}

/// One atomic recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Monotonic per workspace, starting at 1.
    pub operation_id: u64,
    /// The wire method name that produced this operation.
    pub operation_type: String,
    pub workspace_id: WorkspaceId,
    pub agent_id: AgentId,
    /// Strictly non-decreasing within a workspace.
    pub timestamp: DateTime<Utc>,
    pub inputs: serde_json::Value,
    pub outputs: Vec<EntityId>,
    pub status: OperationStatus,
    pub error_code: Option<String>,
    pub execution_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo: Option<UndoPayload>,
}

impl OperationRecord {
    /// Whether undo can walk over this entry (error entries changed nothing).
    pub fn is_reversible(&self) -> bool {
        self.status != OperationStatus::Error && self.undo.is_some()
    }
}

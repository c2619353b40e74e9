use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, EntityId, WorkspaceId};

/// Where a branch sits relative to its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Clean,
    Modified,
    Conflicted,
    Merged,
}

/// Metadata of one workspace node in the branch tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub workspace_id: WorkspaceId,
    pub parent_workspace_id: Option<WorkspaceId>,
    pub owning_agent_id: Option<AgentId>,
    pub branch_status: BranchStatus,
    /// Operation id in the parent at which this branch forked.
    pub divergence_point: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// How a merge run treats conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Apply only if the conflict set is empty; otherwise abort and report.
    #[default]
    Auto,
    /// Never apply; report the classification only.
    DryRun,
}

/// Per-entity conflict classifications from the three-way merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Modified in both source and target with divergent effect.
    BothModified,
    /// Deleted on one side, modified on the other.
    DeletedAndModified,
    /// New in source but colliding (spatially or by id) with a target entity.
    CollisionOnAdd,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::BothModified => "BothModified",
            ConflictKind::DeletedAndModified => "DeletedAndModified",
            ConflictKind::CollisionOnAdd => "CollisionOnAdd",
        }
    }
}

/// A single unresolved merge conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub entity_id: EntityId,
    pub kind: ConflictKind,
    pub source_workspace: WorkspaceId,
    pub target_workspace: WorkspaceId,
    pub detail: String,
}

/// Outcome of a merge attempt. `applied` is false whenever conflicts are
/// present — a conflicted merge changes nothing on either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MergeReport {
    pub source: String,
    pub target: String,
    pub added: Vec<EntityId>,
    pub updated: Vec<EntityId>,
    pub deleted: Vec<EntityId>,
    pub conflicts: Vec<MergeConflict>,
    pub applied: bool,
}

/// How to resolve one conflicted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResolveStrategy {
    KeepSource,
    KeepTarget,
    /// Caller supplies the merged properties as an opaque payload, which
    /// must parse into the entity kind's property set.
    ManualMerge { payload: serde_json::Value },
}

/// Status summary returned by `workspace.status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    pub workspace_id: WorkspaceId,
    pub entity_count: usize,
    pub op_count: usize,
    pub branch_status: BranchStatus,
    pub can_merge: bool,
}

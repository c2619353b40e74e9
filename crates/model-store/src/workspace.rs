//! Per-workspace state: the copy-on-write entity and constraint maps,
//! branch metadata, pending merge conflicts, and the operation log.

use std::collections::HashMap;

use chrono::Utc;
use im::HashMap as ImHashMap;

use anvil_types::{
    AgentId, BranchStatus, ConstraintId, ConstraintRecord, EntityId, EntityRecord, MergeConflict,
    ResolveStrategy, WorkspaceId, WorkspaceMeta, WorkspaceStatus,
};

use crate::oplog::OperationLog;

/// The full state of one workspace. Guarded by the slot's single-writer
/// lock; reads clone the persistent maps (cheap structural sharing) and
/// drop the lock before traversing.
pub struct WorkspaceState {
    pub meta: WorkspaceMeta,
    /// Entities visible in this workspace. A branch starts as an O(1)
    /// clone of its base's map; materialised copies are re-keyed into the
    /// branch namespace as they are mutated.
    pub entities: ImHashMap<EntityId, EntityRecord>,
    pub constraints: ImHashMap<ConstraintId, ConstraintRecord>,
    /// The base's entity map at the divergence point (branches only).
    pub base_entities: Option<ImHashMap<EntityId, EntityRecord>>,
    pub base_constraints: Option<ImHashMap<ConstraintId, ConstraintRecord>>,
    /// Conflicts left by the last merge attempt, keyed by local entity key.
    pub pending_conflicts: Vec<MergeConflict>,
    /// Conflict resolutions recorded by `resolve_conflict`, keyed by the
    /// entity's local key.
    pub resolutions: HashMap<String, ResolveStrategy>,
    pub log: OperationLog,
}

impl WorkspaceState {
    /// Fresh root workspace.
    pub fn root() -> Self {
        Self::new(WorkspaceMeta {
            workspace_id: WorkspaceId::root(),
            parent_workspace_id: None,
            owning_agent_id: None,
            branch_status: BranchStatus::Clean,
            divergence_point: None,
            created_at: Utc::now(),
        })
    }

    pub fn new(meta: WorkspaceMeta) -> Self {
        Self {
            meta,
            entities: ImHashMap::new(),
            constraints: ImHashMap::new(),
            base_entities: None,
            base_constraints: None,
            pending_conflicts: Vec::new(),
            resolutions: HashMap::new(),
            log: OperationLog::new(),
        }
    }

    /// Branch off this workspace: O(1) snapshot of both maps.
    pub fn branch(&self, name: WorkspaceId, owner: AgentId) -> Self {
        Self {
            meta: WorkspaceMeta {
                workspace_id: name,
                parent_workspace_id: Some(self.meta.workspace_id.clone()),
                owning_agent_id: Some(owner),
                branch_status: BranchStatus::Clean,
                divergence_point: self.log.last_applied_id(),
                created_at: Utc::now(),
            },
            entities: self.entities.clone(),
            constraints: self.constraints.clone(),
            base_entities: Some(self.entities.clone()),
            base_constraints: Some(self.constraints.clone()),
            pending_conflicts: Vec::new(),
            resolutions: HashMap::new(),
            log: OperationLog::new(),
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.meta.workspace_id
    }

    pub fn is_conflicted(&self) -> bool {
        self.meta.branch_status == BranchStatus::Conflicted
    }

    /// Mark that this workspace has diverged from its base.
    pub fn touch(&mut self) {
        if self.meta.branch_status == BranchStatus::Clean
            || self.meta.branch_status == BranchStatus::Merged
        {
            self.meta.branch_status = BranchStatus::Modified;
        }
    }

    pub fn status(&self) -> WorkspaceStatus {
        WorkspaceStatus {
            workspace_id: self.meta.workspace_id.clone(),
            entity_count: self.entities.len(),
            op_count: self.log.applied_count(),
            branch_status: self.meta.branch_status,
            can_merge: self.meta.parent_workspace_id.is_some() && !self.is_conflicted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_snapshots_share_structure() {
        let root = WorkspaceState::root();
        let branch = root.branch(WorkspaceId::new("b1"), AgentId::new("agent"));
        assert_eq!(branch.meta.parent_workspace_id, Some(WorkspaceId::root()));
        assert_eq!(branch.entities.len(), 0);
        assert!(branch.base_entities.is_some());
        assert_eq!(branch.meta.branch_status, BranchStatus::Clean);
    }

    #[test]
    fn touch_transitions_clean_to_modified() {
        let mut ws = WorkspaceState::root();
        ws.touch();
        assert_eq!(ws.meta.branch_status, BranchStatus::Modified);
    }
}

//! The model store: workspaces with copy-on-write branching, entity and
//! constraint storage, per-workspace operation logs with undo/redo, a
//! three-way merge, and write-through persistence.

pub mod entity_store;
pub mod merge;
pub mod oplog;
pub mod persist;
pub mod workspace;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use anvil_types::{
    AgentId, BranchStatus, CoreConfig, CoreError, CoreResult, EntityId, MergeReport,
    MergeStrategy, OperationRecord, OperationStatus, ResolveStrategy, WorkspaceId, WorkspaceMeta,
    WorkspaceStatus,
};

pub use entity_store::basic_computed;
pub use oplog::{OperationLog, RedoPayload};
pub use persist::{Persister, StoreError};
pub use workspace::WorkspaceState;

/// One workspace behind its single-writer lock.
pub struct WorkspaceSlot {
    pub state: Mutex<WorkspaceState>,
}

/// Process-wide store of all workspaces.
pub struct ModelStore {
    slots: RwLock<BTreeMap<WorkspaceId, Arc<WorkspaceSlot>>>,
    persister: Option<Persister>,
    pub config: CoreConfig,
}

impl ModelStore {
    /// Open the store: load persisted workspaces when a data directory is
    /// configured, and ensure the root workspace exists.
    pub fn open(config: CoreConfig) -> CoreResult<Self> {
        let persister = match &config.data_dir {
            Some(dir) => Some(Persister::new(dir).map_err(store_error)?),
            None => None,
        };

        let mut slots = BTreeMap::new();
        if let Some(p) = &persister {
            for state in p.load_all().map_err(store_error)? {
                info!(workspace = state.id().as_str(), "loaded workspace");
                slots.insert(
                    state.id().clone(),
                    Arc::new(WorkspaceSlot {
                        state: Mutex::new(state),
                    }),
                );
            }
        }
        if !slots.contains_key(&WorkspaceId::root()) {
            let state = WorkspaceState::root();
            if let Some(p) = &persister {
                p.sync_workspace(&state).map_err(store_error)?;
            }
            slots.insert(
                WorkspaceId::root(),
                Arc::new(WorkspaceSlot {
                    state: Mutex::new(state),
                }),
            );
        }

        Ok(Self {
            slots: RwLock::new(slots),
            persister,
            config,
        })
    }

    /// In-memory store for tests and ephemeral sessions.
    pub fn ephemeral() -> Self {
        Self::open(CoreConfig::ephemeral()).expect("in-memory store cannot fail to open")
    }

    pub fn slot(&self, ws: &WorkspaceId) -> CoreResult<Arc<WorkspaceSlot>> {
        self.slots
            .read()
            .get(ws)
            .cloned()
            .ok_or_else(|| CoreError::WorkspaceConflict {
                detail: format!("workspace {ws} does not exist"),
            })
    }

    pub fn workspace_ids(&self) -> Vec<WorkspaceId> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<WorkspaceStatus> {
        let slots = self.slots.read();
        slots.values().map(|s| s.state.lock().status()).collect()
    }

    /// Create a branch workspace from `base`.
    pub fn create_workspace(
        &self,
        name: &str,
        base: &WorkspaceId,
        owner: &AgentId,
    ) -> CoreResult<WorkspaceMeta> {
        if name.is_empty() || name.contains(':') || name.contains('/') {
            return Err(CoreError::invalid_parameter(
                "name",
                name,
                "non-empty, without ':' or '/'",
                Some("b1"),
            ));
        }
        let new_id = WorkspaceId::new(name);
        let base_slot = self.slot(base)?;

        let mut slots = self.slots.write();
        if slots.contains_key(&new_id) {
            return Err(CoreError::WorkspaceConflict {
                detail: format!("workspace {new_id} already exists"),
            });
        }
        let base_state = base_slot.state.lock();
        let branch = base_state.branch(new_id.clone(), owner.clone());
        let meta = branch.meta.clone();
        if let Some(p) = &self.persister {
            p.sync_workspace(&branch).map_err(store_error)?;
        }
        slots.insert(
            new_id,
            Arc::new(WorkspaceSlot {
                state: Mutex::new(branch),
            }),
        );
        Ok(meta)
    }

    /// Delete a workspace. The root workspace is permanent.
    pub fn delete_workspace(&self, ws: &WorkspaceId) -> CoreResult<()> {
        if ws.is_root() {
            return Err(CoreError::OperationInvalid {
                reason: "the root workspace cannot be deleted".to_string(),
            });
        }
        let removed = self.slots.write().remove(ws);
        if removed.is_none() {
            return Err(CoreError::WorkspaceConflict {
                detail: format!("workspace {ws} does not exist"),
            });
        }
        if let Some(p) = &self.persister {
            p.remove_workspace(ws).map_err(store_error)?;
        }
        Ok(())
    }

    /// Persist a workspace after a successful mutation. Failures are
    /// logged, not surfaced: the in-memory state is already committed.
    pub fn persist(&self, state: &WorkspaceState) {
        if let Some(p) = &self.persister {
            if let Err(e) = p.sync_workspace(state) {
                warn!(workspace = state.id().as_str(), error = %e, "persist failed");
            }
        }
    }

    /// Persist one operation record to the history log.
    pub fn persist_op(&self, ws: &WorkspaceId, record: &OperationRecord) {
        if let Some(p) = &self.persister {
            if let Err(e) = p.append_operation(ws, record) {
                warn!(workspace = ws.as_str(), error = %e, "history append failed");
            }
        }
    }

    /// Lock source and target in id order to avoid deadlock with
    /// concurrent merges.
    fn lock_pair<'a>(
        source_slot: &'a WorkspaceSlot,
        target_slot: &'a WorkspaceSlot,
        source: &WorkspaceId,
        target: &WorkspaceId,
    ) -> (MutexGuard<'a, WorkspaceState>, MutexGuard<'a, WorkspaceState>) {
        if source < target {
            let s = source_slot.state.lock();
            let t = target_slot.state.lock();
            (s, t)
        } else {
            let t = target_slot.state.lock();
            let s = source_slot.state.lock();
            (s, t)
        }
    }

    /// Three-way merge of `source` into `target`.
    ///
    /// A conflicting merge applies nothing, marks the source conflicted and
    /// reports the conflict set. A clean merge applies atomically, records
    /// one operation on the target, and marks the source merged.
    pub fn merge(
        &self,
        source: &WorkspaceId,
        target: &WorkspaceId,
        strategy: MergeStrategy,
        agent: &AgentId,
        inputs: serde_json::Value,
    ) -> CoreResult<MergeReport> {
        if source == target {
            return Err(CoreError::OperationInvalid {
                reason: "cannot merge a workspace into itself".to_string(),
            });
        }
        let source_slot = self.slot(source)?;
        let target_slot = self.slot(target)?;
        let (mut src, mut tgt) = Self::lock_pair(&source_slot, &target_slot, source, target);

        if tgt.is_conflicted() {
            return Err(CoreError::WorkspaceConflict {
                detail: format!("target workspace {target} has unresolved conflicts"),
            });
        }

        let plan = merge::plan(&src, &tgt);
        if !plan.conflicts.is_empty() {
            src.meta.branch_status = BranchStatus::Conflicted;
            src.pending_conflicts = plan.conflicts.clone();
            let report = MergeReport {
                source: source.to_string(),
                target: target.to_string(),
                conflicts: plan.conflicts,
                applied: false,
                ..MergeReport::default()
            };
            self.persist(&src);
            return Ok(report);
        }

        if strategy == MergeStrategy::DryRun {
            let report = MergeReport {
                source: source.to_string(),
                target: target.to_string(),
                applied: false,
                ..MergeReport::default()
            };
            return Ok(report);
        }

        let (report, undo) = merge::apply(&mut tgt, plan, source.as_str())?;

        let (op_id, timestamp) = tgt.log.stamp();
        let record = OperationRecord {
            operation_id: op_id,
            operation_type: "workspace.merge".to_string(),
            workspace_id: target.clone(),
            agent_id: agent.clone(),
            timestamp,
            inputs,
            outputs: report.added.clone(),
            status: OperationStatus::Success,
            error_code: None,
            execution_time_ms: 0.0,
            undo,
        };
        tgt.log.append(record.clone());

        src.meta.branch_status = BranchStatus::Merged;
        src.pending_conflicts.clear();
        src.resolutions.clear();
        // The branch re-bases on the merged target for any further work.
        src.base_entities = Some(tgt.entities.clone());
        src.base_constraints = Some(tgt.constraints.clone());
        src.meta.divergence_point = tgt.log.last_applied_id();
        src.entities = tgt.entities.clone();
        src.constraints = tgt.constraints.clone();

        self.persist(&tgt);
        self.persist(&src);
        self.persist_op(target, &record);
        info!(
            source = source.as_str(),
            target = target.as_str(),
            added = report.added.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            "merge applied"
        );
        Ok(report)
    }

    /// Record a conflict resolution and re-run the merge.
    pub fn resolve_conflict(
        &self,
        entity: &EntityId,
        source: &WorkspaceId,
        target: &WorkspaceId,
        strategy: ResolveStrategy,
        agent: &AgentId,
        inputs: serde_json::Value,
    ) -> CoreResult<MergeReport> {
        {
            let source_slot = self.slot(source)?;
            let mut src = source_slot.state.lock();
            let local = entity.local_key().to_string();
            let pending = src
                .pending_conflicts
                .iter()
                .any(|c| c.entity_id.local_key() == local);
            if !pending {
                return Err(CoreError::OperationInvalid {
                    reason: format!("entity {entity} has no pending merge conflict"),
                });
            }
            src.resolutions.insert(local, strategy);
            // Clear the conflicted gate so the re-run can proceed.
            src.meta.branch_status = BranchStatus::Modified;
        }
        {
            let target_slot = self.slot(target)?;
            let mut tgt = target_slot.state.lock();
            let (op_id, timestamp) = tgt.log.stamp();
            let record = OperationRecord {
                operation_id: op_id,
                operation_type: "workspace.resolve_conflict".to_string(),
                workspace_id: target.clone(),
                agent_id: agent.clone(),
                timestamp,
                inputs: inputs.clone(),
                outputs: vec![],
                status: OperationStatus::Success,
                error_code: None,
                execution_time_ms: 0.0,
                undo: None,
            };
            tgt.log.append(record.clone());
            self.persist_op(target, &record);
        }
        self.merge(source, target, MergeStrategy::Auto, agent, inputs)
    }
}

fn store_error(e: StoreError) -> CoreError {
    CoreError::GeometryEngineError {
        message: format!("storage failure: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::PropertySet;

    fn agent() -> AgentId {
        AgentId::new("tester")
    }

    fn point(x: f64) -> PropertySet {
        PropertySet::Point3d {
            position: [x, 100.0, 100.0],
        }
    }

    #[test]
    fn open_creates_root() {
        let store = ModelStore::ephemeral();
        assert_eq!(store.workspace_ids(), vec![WorkspaceId::root()]);
    }

    #[test]
    fn branch_diverge_merge_scenario() {
        let store = ModelStore::ephemeral();
        store
            .create_workspace("b1", &WorkspaceId::root(), &agent())
            .unwrap();
        let b1 = WorkspaceId::new("b1");

        let created = {
            let slot = store.slot(&b1).unwrap();
            let mut state = slot.state.lock();
            state.create_entity(point(100.0), &agent(), 10_000).unwrap()
        };

        let report = store
            .merge(
                &b1,
                &WorkspaceId::root(),
                MergeStrategy::Auto,
                &agent(),
                serde_json::json!({}),
            )
            .unwrap();
        assert!(report.applied);
        assert_eq!(report.added.len(), 1);

        let root_slot = store.slot(&WorkspaceId::root()).unwrap();
        let root = root_slot.state.lock();
        assert!(root.get_entity(&created.id.rekey(&WorkspaceId::root())).is_ok());

        let b1_slot = store.slot(&b1).unwrap();
        assert_eq!(
            b1_slot.state.lock().meta.branch_status,
            BranchStatus::Merged
        );
    }

    #[test]
    fn conflicted_merge_blocks_target_until_resolved() {
        let store = ModelStore::ephemeral();
        let root_id = WorkspaceId::root();
        let rec = {
            let slot = store.slot(&root_id).unwrap();
            let mut state = slot.state.lock();
            state.create_entity(point(1.0), &agent(), 10_000).unwrap()
        };
        store.create_workspace("b1", &root_id, &agent()).unwrap();
        let b1 = WorkspaceId::new("b1");
        {
            let slot = store.slot(&b1).unwrap();
            let mut state = slot.state.lock();
            state.modify_entity(&rec.id, point(9.0)).unwrap();
        }
        {
            let slot = store.slot(&root_id).unwrap();
            let mut state = slot.state.lock();
            state.modify_entity(&rec.id, point(5.0)).unwrap();
        }

        let report = store
            .merge(&b1, &root_id, MergeStrategy::Auto, &agent(), serde_json::json!({}))
            .unwrap();
        assert!(!report.applied);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(
            store.slot(&b1).unwrap().state.lock().meta.branch_status,
            BranchStatus::Conflicted
        );

        let resolved = store
            .resolve_conflict(
                &rec.id,
                &b1,
                &root_id,
                ResolveStrategy::KeepSource,
                &agent(),
                serde_json::json!({}),
            )
            .unwrap();
        assert!(resolved.applied);
        let root_slot = store.slot(&root_id).unwrap();
        let state = root_slot.state.lock();
        assert_eq!(state.get_entity(&rec.id).unwrap().properties, point(9.0));
    }

    #[test]
    fn root_cannot_be_deleted() {
        let store = ModelStore::ephemeral();
        assert!(store.delete_workspace(&WorkspaceId::root()).is_err());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::ephemeral().with_data_dir(dir.path());
        let created = {
            let store = ModelStore::open(config.clone()).unwrap();
            let slot = store.slot(&WorkspaceId::root()).unwrap();
            let mut state = slot.state.lock();
            let rec = state.create_entity(point(3.0), &agent(), 10_000).unwrap();
            drop(state);
            let slot = store.slot(&WorkspaceId::root()).unwrap();
            let state = slot.state.lock();
            store.persist(&state);
            rec
        };

        let store = ModelStore::open(config).unwrap();
        let slot = store.slot(&WorkspaceId::root()).unwrap();
        let state = slot.state.lock();
        assert!(state.get_entity(&created.id).is_ok());
    }
}

//! Three-way merge between a branch and its target: classification against
//! the divergence-point snapshot, conflict detection, resolution lookup,
//! and plan application with a composite undo payload.

use std::collections::{BTreeSet, HashMap};

use anvil_types::{
    ConflictKind, ConstraintRecord, CoreError, CoreResult, EntityId, EntityKind, EntityRecord,
    MergeConflict, MergeReport, PropertySet, ResolveStrategy, SatisfactionStatus, UndoPayload,
};

use crate::workspace::WorkspaceState;

/// One action of a clean merge, expressed against the target workspace.
#[derive(Debug, Clone)]
pub enum MergeAction {
    AddEntity { record: EntityRecord },
    UpdateEntity { id: EntityId, properties: PropertySet },
    DeleteEntity { id: EntityId },
    AddConstraint { record: ConstraintRecord },
}

/// The classified outcome of a merge attempt, before application.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub actions: Vec<MergeAction>,
    pub conflicts: Vec<MergeConflict>,
}

fn by_local_key(
    entities: impl Iterator<Item = EntityRecord>,
) -> HashMap<String, EntityRecord> {
    entities
        .map(|e| (e.id.local_key().to_string(), e))
        .collect()
}

/// Re-home an entity record into the target workspace's namespace.
fn adopt(record: &EntityRecord, target: &WorkspaceState) -> EntityRecord {
    let mut out = record.clone();
    out.id = record.id.rekey(target.id());
    out.workspace_id = target.id().clone();
    out.origin = None;
    out.parents = out.parents.iter().map(|p| remap_ref(p, target)).collect();
    out.children = out.children.iter().map(|c| remap_ref(c, target)).collect();
    out
}

/// Map a reference into the target namespace when the target holds that
/// local key; otherwise keep it unchanged.
fn remap_ref(id: &EntityId, target: &WorkspaceState) -> EntityId {
    match target.resolve_id(id) {
        Some(key) => key,
        None => id.rekey(target.id()),
    }
}

/// Classify every entity reachable from source or target against the
/// divergence-point snapshot.
pub fn plan(source: &WorkspaceState, target: &WorkspaceState) -> MergePlan {
    let base = by_local_key(
        source
            .base_entities
            .clone()
            .unwrap_or_default()
            .values()
            .cloned(),
    );
    let src = by_local_key(source.entities.values().cloned());
    let tgt = by_local_key(target.entities.values().cloned());

    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(base.keys());
    keys.extend(src.keys());
    keys.extend(tgt.keys());

    let mut out = MergePlan::default();

    for key in keys {
        let b = base.get(key);
        let s = src.get(key);
        let t = tgt.get(key);
        let resolution = source.resolutions.get(key.as_str());

        match (b, s, t) {
            // New in source only: adopt, unless it collides.
            (None, Some(s), None) => {
                if let Some(conflict) = add_collision(s, &base, &tgt, source, target) {
                    match resolution {
                        Some(ResolveStrategy::KeepTarget) => {}
                        Some(ResolveStrategy::KeepSource) => {
                            out.actions.push(MergeAction::AddEntity {
                                record: adopt(s, target),
                            });
                        }
                        Some(ResolveStrategy::ManualMerge { payload }) => {
                            merge_manual(&mut out, s, None, payload, target);
                        }
                        None => out.conflicts.push(conflict),
                    }
                } else {
                    out.actions.push(MergeAction::AddEntity {
                        record: adopt(s, target),
                    });
                }
            }
            // New in target only: keep.
            (None, None, Some(_)) => {}
            // Created independently on both sides.
            (None, Some(s), Some(t)) => {
                if s.properties != t.properties {
                    resolve_or_conflict(
                        &mut out,
                        resolution,
                        s,
                        Some(t),
                        target,
                        ConflictKind::CollisionOnAdd,
                        source,
                        "created on both sides with different geometry",
                    );
                }
            }
            // Present everywhere: compare both sides against the base.
            (Some(b), Some(s), Some(t)) => {
                let s_mod = s.properties != b.properties;
                let t_mod = t.properties != b.properties;
                match (s_mod, t_mod) {
                    (false, _) => {}
                    (true, false) => out.actions.push(MergeAction::UpdateEntity {
                        id: t.id.clone(),
                        properties: s.properties.clone(),
                    }),
                    (true, true) if s.properties == t.properties => {}
                    (true, true) => {
                        resolve_or_conflict(
                            &mut out,
                            resolution,
                            s,
                            Some(t),
                            target,
                            ConflictKind::BothModified,
                            source,
                            "modified in both workspaces with divergent geometry",
                        );
                    }
                }
            }
            // Deleted in source.
            (Some(b), None, Some(t)) => {
                let t_mod = t.properties != b.properties;
                if t_mod {
                    match resolution {
                        Some(ResolveStrategy::KeepSource) => {
                            out.actions.push(MergeAction::DeleteEntity { id: t.id.clone() });
                        }
                        Some(ResolveStrategy::KeepTarget) => {}
                        Some(ResolveStrategy::ManualMerge { payload }) => {
                            merge_manual(&mut out, t, Some(t), payload, target);
                        }
                        None => out.conflicts.push(MergeConflict {
                            entity_id: t.id.clone(),
                            kind: ConflictKind::DeletedAndModified,
                            source_workspace: source.id().clone(),
                            target_workspace: target.id().clone(),
                            detail: "deleted in source but modified in target".to_string(),
                        }),
                    }
                } else {
                    out.actions.push(MergeAction::DeleteEntity { id: t.id.clone() });
                }
            }
            // Deleted in target.
            (Some(b), Some(s), None) => {
                let s_mod = s.properties != b.properties;
                if s_mod {
                    match resolution {
                        Some(ResolveStrategy::KeepSource) => {
                            out.actions.push(MergeAction::AddEntity {
                                record: adopt(s, target),
                            });
                        }
                        Some(ResolveStrategy::KeepTarget) => {}
                        Some(ResolveStrategy::ManualMerge { payload }) => {
                            merge_manual(&mut out, s, None, payload, target);
                        }
                        None => out.conflicts.push(MergeConflict {
                            entity_id: s.id.clone(),
                            kind: ConflictKind::DeletedAndModified,
                            source_workspace: source.id().clone(),
                            target_workspace: target.id().clone(),
                            detail: "modified in source but deleted in target".to_string(),
                        }),
                    }
                }
            }
            (Some(_), None, None) | (None, None, None) => {}
        }
    }

    plan_constraints(source, target, &mut out);
    out
}

#[allow(clippy::too_many_arguments)]
fn resolve_or_conflict(
    out: &mut MergePlan,
    resolution: Option<&ResolveStrategy>,
    s: &EntityRecord,
    t: Option<&EntityRecord>,
    target: &WorkspaceState,
    kind: ConflictKind,
    source: &WorkspaceState,
    detail: &str,
) {
    match resolution {
        Some(ResolveStrategy::KeepSource) => match t {
            Some(t) => out.actions.push(MergeAction::UpdateEntity {
                id: t.id.clone(),
                properties: s.properties.clone(),
            }),
            None => out.actions.push(MergeAction::AddEntity {
                record: adopt(s, target),
            }),
        },
        Some(ResolveStrategy::KeepTarget) => {}
        Some(ResolveStrategy::ManualMerge { payload }) => {
            merge_manual(out, s, t, payload, target);
        }
        None => out.conflicts.push(MergeConflict {
            entity_id: s.id.clone(),
            kind,
            source_workspace: source.id().clone(),
            target_workspace: target.id().clone(),
            detail: detail.to_string(),
        }),
    }
}

/// Apply a manual-merge payload: the opaque object must parse into the
/// entity kind's property set; otherwise the resolution is ignored and the
/// conflict resurfaces on the next merge run.
fn merge_manual(
    out: &mut MergePlan,
    s: &EntityRecord,
    t: Option<&EntityRecord>,
    payload: &serde_json::Value,
    target: &WorkspaceState,
) {
    let Ok(props) = serde_json::from_value::<PropertySet>(payload.clone()) else {
        out.conflicts.push(MergeConflict {
            entity_id: s.id.clone(),
            kind: ConflictKind::BothModified,
            source_workspace: s.workspace_id.clone(),
            target_workspace: target.id().clone(),
            detail: "manual merge payload does not parse as a property set".to_string(),
        });
        return;
    };
    if props.kind() != s.kind {
        out.conflicts.push(MergeConflict {
            entity_id: s.id.clone(),
            kind: ConflictKind::BothModified,
            source_workspace: s.workspace_id.clone(),
            target_workspace: target.id().clone(),
            detail: format!(
                "manual merge payload has kind {} but the entity is {}",
                props.kind().as_str(),
                s.kind.as_str()
            ),
        });
        return;
    }
    match t {
        Some(t) => out.actions.push(MergeAction::UpdateEntity {
            id: t.id.clone(),
            properties: props,
        }),
        None => {
            let mut record = adopt(s, target);
            record.properties = props;
            out.actions.push(MergeAction::AddEntity { record });
        }
    }
}

/// Spatial or identifier collision for a source-only addition: another
/// entity of the same kind, itself added to the target since divergence,
/// occupying overlapping space.
fn add_collision(
    s: &EntityRecord,
    base: &HashMap<String, EntityRecord>,
    tgt: &HashMap<String, EntityRecord>,
    source: &WorkspaceState,
    target: &WorkspaceState,
) -> Option<MergeConflict> {
    let s_bbox = s.computed.bbox?;
    for (key, t) in tgt {
        if base.contains_key(key) || t.kind != s.kind {
            continue;
        }
        if let Some(t_bbox) = t.computed.bbox {
            if s_bbox.overlaps(&t_bbox) {
                return Some(MergeConflict {
                    entity_id: s.id.clone(),
                    kind: ConflictKind::CollisionOnAdd,
                    source_workspace: source.id().clone(),
                    target_workspace: target.id().clone(),
                    detail: format!("added entity overlaps target entity {}", t.id),
                });
            }
        }
    }
    None
}

/// Constraints follow their entities: new-in-source constraints are
/// adopted with remapped references; divergent modifications take the
/// source side and re-enter validation as pending.
fn plan_constraints(source: &WorkspaceState, target: &WorkspaceState, out: &mut MergePlan) {
    let base: HashMap<String, &ConstraintRecord> = source
        .base_constraints
        .as_ref()
        .map(|m| {
            m.values()
                .map(|c| (c.id.local_key().to_string(), c))
                .collect()
        })
        .unwrap_or_default();
    let tgt: HashMap<String, &ConstraintRecord> = target
        .constraints
        .values()
        .map(|c| (c.id.local_key().to_string(), c))
        .collect();

    for c in source.constraints.values() {
        let key = c.id.local_key().to_string();
        if base.contains_key(&key) || tgt.contains_key(&key) {
            continue;
        }
        let mut record = c.clone();
        record.id = c.id.rekey(target.id());
        record.workspace_id = target.id().clone();
        record.entities = c.entities.iter().map(|e| remap_ref(e, target)).collect();
        record.status = SatisfactionStatus::Pending;
        out.actions.push(MergeAction::AddConstraint { record });
    }
}

/// Apply a conflict-free plan to the target. Returns the report and the
/// composite undo payload. Solids entering the target must be
/// kernel-valid; otherwise nothing is applied.
pub fn apply(
    target: &mut WorkspaceState,
    plan: MergePlan,
    source_id: &str,
) -> CoreResult<(MergeReport, Option<UndoPayload>)> {
    debug_assert!(plan.conflicts.is_empty());

    for action in &plan.actions {
        if let MergeAction::AddEntity { record } = action {
            if record.kind == EntityKind::Solid
                && (!record.is_valid || !record.validation_codes.is_empty())
            {
                return Err(CoreError::TopologyError {
                    codes: record
                        .validation_codes
                        .iter()
                        .map(|c| c.as_str().to_string())
                        .collect(),
                });
            }
        }
    }

    let mut report = MergeReport {
        source: source_id.to_string(),
        target: target.id().to_string(),
        applied: true,
        ..MergeReport::default()
    };
    let mut undo_items = Vec::new();

    for action in plan.actions {
        match action {
            MergeAction::AddEntity { record } => {
                report.added.push(record.id.clone());
                undo_items.push(UndoPayload::CreatedEntity {
                    id: record.id.clone(),
                });
                target.entities.insert(record.id.clone(), record);
            }
            MergeAction::UpdateEntity { id, properties } => {
                let (stored, prior) = target.modify_entity(&id, properties)?;
                report.updated.push(stored);
                undo_items.push(UndoPayload::ModifiedEntity {
                    id,
                    prior: Box::new(prior),
                });
            }
            MergeAction::DeleteEntity { id } => {
                let payload = target.delete_entity(&id)?;
                report.deleted.push(id);
                undo_items.push(payload);
            }
            MergeAction::AddConstraint { record } => {
                undo_items.push(UndoPayload::CreatedConstraint {
                    id: record.id.clone(),
                });
                target.insert_constraint(record);
            }
        }
    }
    target.touch();

    let undo = if undo_items.is_empty() {
        None
    } else {
        Some(UndoPayload::Composite { items: undo_items })
    };
    Ok((report, undo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{AgentId, WorkspaceId};

    fn agent() -> AgentId {
        AgentId::new("merger")
    }

    fn point(x: f64) -> PropertySet {
        PropertySet::Point3d {
            position: [x, 0.0, 0.0],
        }
    }

    #[test]
    fn source_addition_lands_in_target() {
        let mut root = WorkspaceState::root();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        let created = branch
            .create_entity(point(100.0), &agent(), 10_000)
            .unwrap();

        let plan = plan(&branch, &root);
        assert!(plan.conflicts.is_empty());
        let (report, undo) = apply(&mut root, plan, "b1").unwrap();
        assert_eq!(report.added.len(), 1);
        assert!(undo.is_some());
        let adopted = &report.added[0];
        assert_eq!(adopted.workspace(), Some(WorkspaceId::root()));
        assert_eq!(adopted.local_key(), created.id.local_key());
        assert!(root.get_entity(adopted).is_ok());
    }

    #[test]
    fn modified_in_branch_updates_target() {
        let mut root = WorkspaceState::root();
        let rec = root.create_entity(point(1.0), &agent(), 10_000).unwrap();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        branch.modify_entity(&rec.id, point(9.0)).unwrap();

        let plan = plan(&branch, &root);
        assert!(plan.conflicts.is_empty(), "{:?}", plan.conflicts);
        apply(&mut root, plan, "b1").unwrap();
        assert_eq!(root.get_entity(&rec.id).unwrap().properties, point(9.0));
    }

    #[test]
    fn divergent_modification_is_both_modified() {
        let mut root = WorkspaceState::root();
        let rec = root.create_entity(point(1.0), &agent(), 10_000).unwrap();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        branch.modify_entity(&rec.id, point(9.0)).unwrap();
        root.modify_entity(&rec.id, point(5.0)).unwrap();

        let plan = plan(&branch, &root);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::BothModified);
    }

    #[test]
    fn identical_modifications_do_not_conflict() {
        let mut root = WorkspaceState::root();
        let rec = root.create_entity(point(1.0), &agent(), 10_000).unwrap();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        branch.modify_entity(&rec.id, point(4.0)).unwrap();
        root.modify_entity(&rec.id, point(4.0)).unwrap();

        let plan = plan(&branch, &root);
        assert!(plan.conflicts.is_empty());
        assert!(plan.actions.is_empty());
    }

    #[test]
    fn delete_vs_modify_conflicts() {
        let mut root = WorkspaceState::root();
        let rec = root.create_entity(point(1.0), &agent(), 10_000).unwrap();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        branch.delete_entity(&rec.id).unwrap();
        root.modify_entity(&rec.id, point(7.0)).unwrap();

        let plan = plan(&branch, &root);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::DeletedAndModified);
    }

    #[test]
    fn keep_target_resolution_clears_conflict() {
        let mut root = WorkspaceState::root();
        let rec = root.create_entity(point(1.0), &agent(), 10_000).unwrap();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        branch.modify_entity(&rec.id, point(9.0)).unwrap();
        root.modify_entity(&rec.id, point(5.0)).unwrap();

        branch.resolutions.insert(
            rec.id.local_key().to_string(),
            ResolveStrategy::KeepTarget,
        );
        let plan = plan(&branch, &root);
        assert!(plan.conflicts.is_empty());
        apply(&mut root, plan, "b1").unwrap();
        assert_eq!(root.get_entity(&rec.id).unwrap().properties, point(5.0));
    }

    #[test]
    fn concurrent_addition_same_spot_collides() {
        let root0 = WorkspaceState::root();
        let mut branch = root0.branch(WorkspaceId::new("b1"), agent());
        let mut root = root0;
        branch.create_entity(point(3.0), &agent(), 10_000).unwrap();
        root.create_entity(point(3.0), &agent(), 10_000).unwrap();

        let plan = plan(&branch, &root);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::CollisionOnAdd);
    }

    #[test]
    fn undo_payload_reverses_merge() {
        let mut root = WorkspaceState::root();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());
        branch.create_entity(point(42.0), &agent(), 10_000).unwrap();

        let before: Vec<EntityId> = root.entities.keys().cloned().collect();
        let plan = plan(&branch, &root);
        let (_report, undo) = apply(&mut root, plan, "b1").unwrap();
        assert_eq!(root.entities.len(), 1);
        root.apply_undo(&undo.unwrap()).unwrap();
        let after: Vec<EntityId> = root.entities.keys().cloned().collect();
        assert_eq!(before, after);
    }
}

//! Entity and constraint CRUD over one workspace's state, with kind
//! invariants, cached computed properties, copy-on-write materialisation
//! and referential integrity across parent/child links.

use chrono::Utc;

use anvil_types::{
    validate_properties, Aabb, AgentId, ComputedProps, ConstraintId, ConstraintRecord, CoreError,
    CoreResult, EntityId, EntityKind, EntityRecord, PropertySet, UndoPayload, WorkspaceId,
};

use crate::oplog::RedoPayload;
use crate::workspace::WorkspaceState;

/// Basic cached properties derivable from a property set without the
/// kernel: curve lengths and bounding boxes. Solid caches are written by
/// the modeling pipeline.
pub fn basic_computed(props: &PropertySet) -> ComputedProps {
    let mut out = ComputedProps::default();
    match props {
        PropertySet::Point2d { position } => {
            let p = [position[0], position[1], 0.0];
            out.bbox = Aabb::from_points([p]);
        }
        PropertySet::Point3d { position } => {
            out.bbox = Aabb::from_points([*position]);
        }
        PropertySet::Line2d { start, end } => {
            let s = [start[0], start[1], 0.0];
            let e = [end[0], end[1], 0.0];
            let dx = e[0] - s[0];
            let dy = e[1] - s[1];
            out.length = Some((dx * dx + dy * dy).sqrt());
            out.bbox = Aabb::from_points([s, e]);
        }
        PropertySet::Line3d { start, end } => {
            let dx = end[0] - start[0];
            let dy = end[1] - start[1];
            let dz = end[2] - start[2];
            out.length = Some((dx * dx + dy * dy + dz * dz).sqrt());
            out.bbox = Aabb::from_points([*start, *end]);
        }
        PropertySet::Circle { center, radius, .. } => {
            out.length = Some(std::f64::consts::TAU * radius);
            out.bbox = Aabb::from_points([
                [center[0] - radius, center[1] - radius, center[2] - radius],
                [center[0] + radius, center[1] + radius, center[2] + radius],
            ]);
        }
        PropertySet::Arc {
            center,
            radius,
            start_angle,
            end_angle,
            ..
        } => {
            out.length = Some((end_angle - start_angle).abs() * radius);
            out.bbox = Aabb::from_points([
                [center[0] - radius, center[1] - radius, center[2] - radius],
                [center[0] + radius, center[1] + radius, center[2] + radius],
            ]);
        }
        PropertySet::Sphere { center, radius } => {
            out.bbox = Aabb::from_points([
                [center[0] - radius, center[1] - radius, center[2] - radius],
                [center[0] + radius, center[1] + radius, center[2] + radius],
            ]);
        }
        _ => {}
    }
    out.valid = true;
    out
}

impl WorkspaceState {
    /// Create an entity, enforcing kind invariants and the per-workspace
    /// entity cap. Returns the stored record.
    pub fn create_entity(
        &mut self,
        properties: PropertySet,
        agent: &AgentId,
        entity_cap: usize,
    ) -> CoreResult<EntityRecord> {
        if self.entities.len() >= entity_cap {
            return Err(CoreError::OperationInvalid {
                reason: format!("workspace holds the maximum of {entity_cap} entities"),
            });
        }
        validate_properties(&properties)
            .map_err(|reason| CoreError::InvalidGeometry { reason })?;

        let id = EntityId::mint(self.id(), properties.kind());
        let mut record = EntityRecord::new(
            id.clone(),
            self.id().clone(),
            properties,
            agent.clone(),
            Utc::now(),
        );
        record.computed = basic_computed(&record.properties);
        self.entities.insert(id, record.clone());
        self.touch();
        Ok(record)
    }

    /// Resolve an id in this workspace, following the copy-on-write alias:
    /// a base id whose record was materialised resolves to the branch copy.
    pub fn resolve_id(&self, id: &EntityId) -> Option<EntityId> {
        if self.entities.contains_key(id) {
            return Some(id.clone());
        }
        let rekeyed = id.rekey(self.id());
        if self.entities.contains_key(&rekeyed) {
            return Some(rekeyed);
        }
        None
    }

    pub fn get_entity(&self, id: &EntityId) -> CoreResult<EntityRecord> {
        let key = self
            .resolve_id(id)
            .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
        Ok(self.entities[&key].clone())
    }

    /// Entities in creation order, optionally filtered by kind, with
    /// stable pagination.
    pub fn list_entities(
        &self,
        kind: Option<EntityKind>,
        limit: usize,
        offset: usize,
    ) -> Vec<EntityRecord> {
        let mut all: Vec<EntityRecord> = self
            .entities
            .values()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all.into_iter().skip(offset).take(limit).collect()
    }

    /// Replace an entity's properties. Returns `(stored_id, prior)` for
    /// undo. Copy-on-write: mutating a base-inherited record materialises
    /// a branch-keyed copy.
    pub fn modify_entity(
        &mut self,
        id: &EntityId,
        properties: PropertySet,
    ) -> CoreResult<(EntityId, PropertySet)> {
        let key = self
            .resolve_id(id)
            .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
        let record = self.entities[&key].clone();
        if record.kind != properties.kind() {
            return Err(CoreError::OperationInvalid {
                reason: format!(
                    "cannot change entity kind from {} to {}",
                    record.kind.as_str(),
                    properties.kind().as_str()
                ),
            });
        }
        if record.kind != EntityKind::Solid {
            validate_properties(&properties)
                .map_err(|reason| CoreError::InvalidGeometry { reason })?;
        }

        let mut updated = record.clone();
        let prior = std::mem::replace(&mut updated.properties, properties);
        updated.computed = basic_computed(&updated.properties);
        if record.kind == EntityKind::Solid {
            // Solid caches come from the pipeline; invalidate until it
            // writes fresh ones.
            updated.computed = ComputedProps::default();
        }
        updated.modified_at = Utc::now();

        let stored_id = if key.workspace() == Some(self.id().clone()) {
            self.entities.insert(key.clone(), updated);
            key
        } else {
            // Materialise a private copy in this branch's namespace.
            let branch_id = key.rekey(self.id());
            updated.origin = Some(key.clone());
            updated.id = branch_id.clone();
            updated.workspace_id = self.id().clone();
            self.entities.remove(&key);
            self.entities.insert(branch_id.clone(), updated);
            branch_id
        };
        self.touch();
        Ok((stored_id, prior))
    }

    /// Overwrite an entity's cached computed properties (pipeline only).
    pub fn set_computed(&mut self, id: &EntityId, computed: ComputedProps) -> CoreResult<()> {
        let key = self
            .resolve_id(id)
            .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
        let mut record = self.entities[&key].clone();
        record.computed = computed;
        self.entities.insert(key, record);
        Ok(())
    }

    /// Record validity and structured codes on an entity.
    pub fn set_validity(
        &mut self,
        id: &EntityId,
        is_valid: bool,
        codes: Vec<anvil_types::TopologyCode>,
    ) -> CoreResult<()> {
        let key = self
            .resolve_id(id)
            .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
        let mut record = self.entities[&key].clone();
        record.is_valid = is_valid;
        record.validation_codes = codes;
        self.entities.insert(key, record);
        Ok(())
    }

    /// Link a derived entity to its source.
    pub fn link(&mut self, parent: &EntityId, child: &EntityId) -> CoreResult<()> {
        let pk = self
            .resolve_id(parent)
            .ok_or_else(|| CoreError::EntityNotFound { id: parent.clone() })?;
        let ck = self
            .resolve_id(child)
            .ok_or_else(|| CoreError::EntityNotFound { id: child.clone() })?;
        let mut p = self.entities[&pk].clone();
        if !p.children.contains(&ck) {
            p.children.push(ck.clone());
        }
        self.entities.insert(pk.clone(), p);
        let mut c = self.entities[&ck].clone();
        if !c.parents.contains(&pk) {
            c.parents.push(pk);
        }
        self.entities.insert(ck, c);
        Ok(())
    }

    /// Delete an entity. Fails while live children exist; cascades link
    /// removal from parents and deletes constraints referencing it.
    /// Returns the composite undo payload.
    pub fn delete_entity(&mut self, id: &EntityId) -> CoreResult<UndoPayload> {
        let key = self
            .resolve_id(id)
            .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
        let record = self.entities[&key].clone();
        let live_children: Vec<&EntityId> = record
            .children
            .iter()
            .filter(|c| self.resolve_id(c).is_some())
            .collect();
        if !live_children.is_empty() {
            return Err(CoreError::OperationInvalid {
                reason: format!(
                    "entity {} has {} live child entities",
                    key,
                    live_children.len()
                ),
            });
        }

        let mut items = Vec::new();

        // Cascade: constraints addressing this entity go with it.
        let doomed: Vec<ConstraintRecord> = self
            .constraints
            .values()
            .filter(|c| {
                c.entities
                    .iter()
                    .any(|e| self.resolve_id(e).as_ref() == Some(&key))
            })
            .cloned()
            .collect();
        for c in doomed {
            self.constraints.remove(&c.id);
            items.push(UndoPayload::RemovedConstraint {
                record: Box::new(c),
            });
        }

        // Unlink from parents.
        for parent in &record.parents {
            if let Some(pk) = self.resolve_id(parent) {
                let mut p = self.entities[&pk].clone();
                p.children.retain(|c| self.resolve_id(c).as_ref() != Some(&key));
                self.entities.insert(pk, p);
            }
        }

        self.entities.remove(&key);
        self.touch();
        items.push(UndoPayload::DeletedEntity {
            record: Box::new(record),
        });
        Ok(if items.len() == 1 {
            items.pop().expect("one item")
        } else {
            UndoPayload::Composite { items }
        })
    }

    pub fn insert_constraint(&mut self, record: ConstraintRecord) {
        self.constraints.insert(record.id.clone(), record);
        self.touch();
    }

    pub fn get_constraint(&self, id: &ConstraintId) -> Option<ConstraintRecord> {
        if let Some(c) = self.constraints.get(id) {
            return Some(c.clone());
        }
        self.constraints.get(&id.rekey(self.id())).cloned()
    }

    pub fn remove_constraint(&mut self, id: &ConstraintId) -> Option<ConstraintRecord> {
        let key = if self.constraints.contains_key(id) {
            id.clone()
        } else {
            id.rekey(self.id())
        };
        let removed = self.constraints.remove(&key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Reverse one operation's effects. Returns the forward payload needed
    /// to redo it.
    pub fn apply_undo(&mut self, payload: &UndoPayload) -> CoreResult<RedoPayload> {
        Ok(match payload {
            UndoPayload::CreatedEntity { id } => {
                let key = self
                    .resolve_id(id)
                    .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
                let record = self.entities[&key].clone();
                for parent in &record.parents {
                    if let Some(pk) = self.resolve_id(parent) {
                        let mut p = self.entities[&pk].clone();
                        p.children.retain(|c| c != &key);
                        self.entities.insert(pk, p);
                    }
                }
                self.entities.remove(&key);
                RedoPayload::CreateEntity {
                    record: Box::new(record),
                }
            }
            UndoPayload::ModifiedEntity { id, prior } => {
                let key = self
                    .resolve_id(id)
                    .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
                let mut record = self.entities[&key].clone();
                let current = std::mem::replace(&mut record.properties, (**prior).clone());
                record.computed = basic_computed(&record.properties);
                if record.kind == EntityKind::Solid {
                    record.computed = ComputedProps::default();
                }
                record.modified_at = Utc::now();
                self.entities.insert(key.clone(), record);
                RedoPayload::ModifyEntity {
                    id: key,
                    properties: Box::new(current),
                }
            }
            UndoPayload::DeletedEntity { record } => {
                let key = record.id.clone();
                for parent in &record.parents {
                    if let Some(pk) = self.resolve_id(parent) {
                        let mut p = self.entities[&pk].clone();
                        if !p.children.contains(&key) {
                            p.children.push(key.clone());
                        }
                        self.entities.insert(pk, p);
                    }
                }
                self.entities.insert(key.clone(), (**record).clone());
                RedoPayload::DeleteEntity { id: key }
            }
            UndoPayload::CreatedConstraint { id } => {
                let record =
                    self.remove_constraint(id)
                        .ok_or_else(|| CoreError::OperationInvalid {
                            reason: format!("constraint {id} missing during undo"),
                        })?;
                RedoPayload::CreateConstraint {
                    record: Box::new(record),
                }
            }
            UndoPayload::RemovedConstraint { record } => {
                self.insert_constraint((**record).clone());
                RedoPayload::DeleteConstraint {
                    id: record.id.clone(),
                }
            }
            UndoPayload::Composite { items } => {
                let mut redos = Vec::with_capacity(items.len());
                for item in items.iter().rev() {
                    redos.push(self.apply_undo(item)?);
                }
                RedoPayload::Composite { items: redos }
            }
        })
    }

    /// Re-apply a previously undone operation.
    pub fn apply_redo(&mut self, payload: &RedoPayload) -> CoreResult<()> {
        match payload {
            RedoPayload::CreateEntity { record } => {
                let key = record.id.clone();
                for parent in &record.parents {
                    if let Some(pk) = self.resolve_id(parent) {
                        let mut p = self.entities[&pk].clone();
                        if !p.children.contains(&key) {
                            p.children.push(key.clone());
                        }
                        self.entities.insert(pk, p);
                    }
                }
                self.entities.insert(key, (**record).clone());
            }
            RedoPayload::ModifyEntity { id, properties } => {
                let key = self
                    .resolve_id(id)
                    .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
                let mut record = self.entities[&key].clone();
                record.properties = (**properties).clone();
                record.computed = basic_computed(&record.properties);
                if record.kind == EntityKind::Solid {
                    record.computed = ComputedProps::default();
                }
                record.modified_at = Utc::now();
                self.entities.insert(key, record);
            }
            RedoPayload::DeleteEntity { id } => {
                if let Some(key) = self.resolve_id(id) {
                    let record = self.entities[&key].clone();
                    for parent in &record.parents {
                        if let Some(pk) = self.resolve_id(parent) {
                            let mut p = self.entities[&pk].clone();
                            p.children.retain(|c| c != &key);
                            self.entities.insert(pk, p);
                        }
                    }
                    self.entities.remove(&key);
                }
            }
            RedoPayload::CreateConstraint { record } => {
                self.insert_constraint((**record).clone());
            }
            RedoPayload::DeleteConstraint { id } => {
                self.remove_constraint(id);
            }
            RedoPayload::Composite { items } => {
                for item in items.iter().rev() {
                    self.apply_redo(item)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::new("tester")
    }

    fn point(x: f64, y: f64, z: f64) -> PropertySet {
        PropertySet::Point3d {
            position: [x, y, z],
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let mut ws = WorkspaceState::root();
        let rec = ws.create_entity(point(1.0, 2.0, 3.0), &agent(), 10_000).unwrap();
        let got = ws.get_entity(&rec.id).unwrap();
        assert_eq!(got.properties, point(1.0, 2.0, 3.0));
        assert!(got.computed.valid);
    }

    #[test]
    fn entity_cap_rejects_create() {
        let mut ws = WorkspaceState::root();
        ws.create_entity(point(0.0, 0.0, 0.0), &agent(), 1).unwrap();
        let err = ws.create_entity(point(1.0, 0.0, 0.0), &agent(), 1);
        assert!(matches!(err, Err(CoreError::OperationInvalid { .. })));
    }

    #[test]
    fn invalid_geometry_rejected() {
        let mut ws = WorkspaceState::root();
        let err = ws.create_entity(
            PropertySet::Circle {
                center: [0.0, 0.0, 0.0],
                radius: 1e-7,
                normal: [0.0, 0.0, 1.0],
            },
            &agent(),
            10_000,
        );
        assert!(matches!(err, Err(CoreError::InvalidGeometry { .. })));
    }

    #[test]
    fn modify_in_branch_materialises_private_copy() {
        let mut root = WorkspaceState::root();
        let rec = root.create_entity(point(0.0, 0.0, 0.0), &agent(), 10_000).unwrap();
        let mut branch = root.branch(WorkspaceId::new("b1"), agent());

        let (branch_key, prior) = branch
            .modify_entity(&rec.id, point(5.0, 5.0, 5.0))
            .unwrap();
        assert_eq!(prior, point(0.0, 0.0, 0.0));
        assert_eq!(branch_key.workspace(), Some(WorkspaceId::new("b1")));
        assert_eq!(branch_key.local_key(), rec.id.local_key());

        // Base id still resolves inside the branch.
        let via_base = branch.get_entity(&rec.id).unwrap();
        assert_eq!(via_base.properties, point(5.0, 5.0, 5.0));
        assert_eq!(via_base.origin, Some(rec.id.clone()));

        // Root is untouched.
        assert_eq!(
            root.get_entity(&rec.id).unwrap().properties,
            point(0.0, 0.0, 0.0)
        );
    }

    #[test]
    fn delete_refuses_with_live_children() {
        let mut ws = WorkspaceState::root();
        let parent = ws.create_entity(point(0.0, 0.0, 0.0), &agent(), 10_000).unwrap();
        let child = ws.create_entity(point(1.0, 0.0, 0.0), &agent(), 10_000).unwrap();
        ws.link(&parent.id, &child.id).unwrap();
        assert!(matches!(
            ws.delete_entity(&parent.id),
            Err(CoreError::OperationInvalid { .. })
        ));
        ws.delete_entity(&child.id).unwrap();
        ws.delete_entity(&parent.id).unwrap();
    }

    #[test]
    fn undo_create_then_redo_restores_record() {
        let mut ws = WorkspaceState::root();
        let rec = ws.create_entity(point(7.0, 0.0, 0.0), &agent(), 10_000).unwrap();
        let undo = UndoPayload::CreatedEntity { id: rec.id.clone() };
        let redo = ws.apply_undo(&undo).unwrap();
        assert!(ws.get_entity(&rec.id).is_err());
        ws.apply_redo(&redo).unwrap();
        let back = ws.get_entity(&rec.id).unwrap();
        assert_eq!(back.properties, rec.properties);
        assert_eq!(back.created_at, rec.created_at);
    }

    #[test]
    fn delete_cascades_constraints_and_undo_restores_them() {
        let mut ws = WorkspaceState::root();
        let a = ws.create_entity(point(0.0, 0.0, 0.0), &agent(), 10_000).unwrap();
        let b = ws.create_entity(point(1.0, 0.0, 0.0), &agent(), 10_000).unwrap();
        let cid = ConstraintId::mint(ws.id());
        ws.insert_constraint(ConstraintRecord {
            id: cid.clone(),
            kind: anvil_types::ConstraintKind::Distance,
            workspace_id: ws.id().clone(),
            entities: vec![a.id.clone(), b.id.clone()],
            value: Some(1.0),
            tolerance: 1e-4,
            status: anvil_types::SatisfactionStatus::Satisfied,
            dof_removed: 1,
        });

        let undo = ws.delete_entity(&a.id).unwrap();
        assert!(ws.get_constraint(&cid).is_none());
        ws.apply_undo(&undo).unwrap();
        assert!(ws.get_constraint(&cid).is_some());
        assert!(ws.get_entity(&a.id).is_ok());
    }
}

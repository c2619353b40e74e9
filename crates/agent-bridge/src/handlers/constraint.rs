//! Constraint application, status reporting and removal. The numerical
//! engine runs over every solver-positionable entity of the active
//! workspace; failed systems surface minimal conflict sets and leave
//! geometry untouched.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{
    ConstraintId, ConstraintKind, ConstraintRecord, CoreError, CoreResult, EntityId,
    SatisfactionStatus, UndoPayload,
};
use constraint_solver::{analyze, model, solve, SolverConstraint, SolverEntity};
use model_store::WorkspaceState;

use crate::dispatch::Ctx;
use crate::messages::parse_params;

/// Build the solver view of a workspace: all positionable entities plus
/// the stored constraints that are not terminally conflicting.
fn solver_system(
    state: &WorkspaceState,
) -> (Vec<SolverEntity>, HashMap<EntityId, usize>, Vec<SolverConstraint>) {
    let mut entities = Vec::new();
    let mut index = HashMap::new();
    let mut records: Vec<_> = state.entities.values().collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    for record in records {
        if let Some(solver_entity) = SolverEntity::from_record(record) {
            index.insert(record.id.clone(), entities.len());
            entities.push(solver_entity);
        }
    }

    let mut constraints = Vec::new();
    let mut stored: Vec<_> = state.constraints.values().collect();
    stored.sort_by(|a, b| a.id.cmp(&b.id));
    for record in stored {
        if record.status == SatisfactionStatus::Conflicting {
            continue;
        }
        let mut slots = Vec::with_capacity(record.entities.len());
        let mut resolved = true;
        for id in &record.entities {
            match state.resolve_id(id).and_then(|key| index.get(&key).copied()) {
                Some(slot) => slots.push(slot),
                None => {
                    resolved = false;
                    break;
                }
            }
        }
        if resolved {
            constraints.push(SolverConstraint {
                id: record.id.clone(),
                kind: record.kind,
                entities: slots,
                value: record.value,
                tolerance: record.tolerance,
            });
        }
    }
    (entities, index, constraints)
}

fn apply_statuses(
    state: &mut WorkspaceState,
    outcomes: &[(ConstraintId, SatisfactionStatus)],
) {
    for (id, status) in outcomes {
        if let Some(mut record) = state.get_constraint(id) {
            record.status = *status;
            state.insert_constraint(record);
        }
    }
}

#[derive(Deserialize)]
struct ApplyParams {
    constraint_type: String,
    entities: Vec<EntityId>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    tolerance: Option<f64>,
}

pub fn apply(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ApplyParams = parse_params(&ctx.params)?;
    let kind = ConstraintKind::from_str_tag(&p.constraint_type).ok_or_else(|| {
        CoreError::invalid_parameter(
            "constraint_type",
            &p.constraint_type,
            "coincident|parallel|perpendicular|tangent|distance|angle|radius",
            Some("distance"),
        )
    })?;
    if p.entities.len() != kind.arity() {
        return Err(CoreError::invalid_parameter(
            "entities",
            p.entities.len(),
            &format!("{} entity id(s)", kind.arity()),
            None,
        ));
    }
    ConstraintRecord::validate_value(kind, p.value).map_err(|reason| {
        CoreError::InvalidParameter {
            field: "value".to_string(),
            provided_value: format!("{:?}", p.value),
            accepted_range: reason,
            suggestion: None,
        }
    })?;

    let (slot, ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();

    let mut kinds = Vec::with_capacity(p.entities.len());
    for id in &p.entities {
        kinds.push(state.get_entity(id)?.kind);
    }
    model::accepts(kind, &kinds).map_err(|reason| CoreError::InvalidParameter {
        field: "entities".to_string(),
        provided_value: format!("{:?}", p.entities),
        accepted_range: reason,
        suggestion: None,
    })?;

    let (mut entities, index, mut constraints) = solver_system(&state);
    let new_id = ConstraintId::mint(&ws);
    let mut slots = Vec::with_capacity(p.entities.len());
    for id in &p.entities {
        let key = state
            .resolve_id(id)
            .ok_or_else(|| CoreError::EntityNotFound { id: id.clone() })?;
        slots.push(*index.get(&key).ok_or_else(|| CoreError::InvalidParameter {
            field: "entities".to_string(),
            provided_value: key.to_string(),
            accepted_range: "a constraint-positionable entity".to_string(),
            suggestion: None,
        })?);
    }
    let tolerance = p.tolerance.unwrap_or_else(|| kind.default_tolerance());
    constraints.push(SolverConstraint {
        id: new_id.clone(),
        kind,
        entities: slots,
        value: p.value,
        tolerance,
    });

    let report = solve(&mut entities, &constraints, &ctx.core.solve_options);

    // A conflicting application is refused outright: no state change, and
    // the caller gets the minimal conflicting set to prune.
    if !report.converged || !report.conflicts.is_empty() {
        let conflict = report
            .conflicts
            .iter()
            .find(|c| c.constraints.contains(&new_id))
            .or_else(|| report.conflicts.first());
        let (mut conflicting, detail) = match conflict {
            Some(c) => (c.constraints.clone(), c.detail.clone()),
            None => (Vec::new(), "constraint system failed to converge".to_string()),
        };
        if !conflicting.contains(&new_id) {
            conflicting.push(new_id.clone());
        }
        return Err(CoreError::ConstraintConflict {
            conflicting,
            detail,
        });
    }

    // Write back solved positions, collecting undo payloads for entities
    // that actually moved.
    let mut undo_items = Vec::new();
    let mut affected = Vec::new();
    for solver_entity in &entities {
        let Some(key) = state.resolve_id(&solver_entity.id) else {
            continue;
        };
        let record = state.entities[&key].clone();
        let mut props = record.properties.clone();
        solver_entity.write_back(&mut props);
        if props != record.properties {
            let (stored, prior) = state.modify_entity(&key, props)?;
            affected.push(stored.clone());
            undo_items.push(UndoPayload::ModifiedEntity {
                id: stored,
                prior: Box::new(prior),
            });
        }
    }

    let dof_removed = model::dof_removed(kind, &kinds);
    let status = report
        .outcomes
        .iter()
        .find(|(id, _)| *id == new_id)
        .map(|(_, s)| *s)
        .unwrap_or(SatisfactionStatus::Satisfied);
    let record = ConstraintRecord {
        id: new_id.clone(),
        kind,
        workspace_id: ws.clone(),
        entities: p.entities.clone(),
        value: p.value,
        tolerance,
        status,
        dof_removed,
    };
    state.insert_constraint(record);
    apply_statuses(&mut state, &report.outcomes);
    undo_items.push(UndoPayload::CreatedConstraint { id: new_id.clone() });

    ctx.record_success(
        &mut state,
        vec![],
        Some(UndoPayload::Composite { items: undo_items }),
        false,
    );

    Ok(json!({
        "constraint_id": new_id,
        "constraint_type": kind.as_str(),
        "status": status,
        "dof_removed": dof_removed,
        "dof_remaining": report.dof_remaining(),
        "affected_entities": affected,
    }))
}

pub fn status(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let (slot, ws) = ctx.active_slot()?;
    let state = slot.state.lock();

    // Status never mutates geometry: solve over a scratch copy.
    let (mut entities, _index, constraints) = solver_system(&state);
    let structure = analyze(&entities, &constraints);
    let report = solve(&mut entities, &constraints, &ctx.core.solve_options);

    let outcome_of = |id: &ConstraintId| {
        report
            .outcomes
            .iter()
            .find(|(o, _)| o == id)
            .map(|(_, s)| *s)
    };
    let mut listed: Vec<_> = state.constraints.values().cloned().collect();
    listed.sort_by(|a, b| a.id.cmp(&b.id));
    let constraints_json: Vec<Value> = listed
        .iter()
        .map(|c| {
            json!({
                "constraint_id": c.id,
                "constraint_type": c.kind.as_str(),
                "entities": c.entities,
                "value": c.value,
                "status": outcome_of(&c.id).unwrap_or(c.status),
                "dof_removed": c.dof_removed,
            })
        })
        .collect();

    Ok(json!({
        "workspace_id": ws,
        "total_dof": structure.total_dof,
        "dof_removed": structure.dof_removed,
        "dof_remaining": structure.dof_remaining,
        "determination": match structure.determination {
            constraint_solver::Determination::WellDetermined => "well_determined",
            constraint_solver::Determination::UnderDetermined => "under_determined",
            constraint_solver::Determination::OverDetermined => "over_determined",
        },
        "constraints": constraints_json,
        // Constraints closing a rigid chain: potential conflict sources.
        "cycles": structure.cyclic,
        "conflicts": report.conflicts.iter().map(|c| json!({
            "constraints": c.constraints,
            "detail": c.detail,
        })).collect::<Vec<_>>(),
    }))
}

#[derive(Deserialize)]
struct RemoveParams {
    constraint_id: ConstraintId,
    /// Replay entity positions after removal (default: leave geometry).
    #[serde(default)]
    replay: bool,
}

pub fn remove(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: RemoveParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();

    let removed = state
        .remove_constraint(&p.constraint_id)
        .ok_or_else(|| CoreError::OperationInvalid {
            reason: format!("constraint {} does not exist", p.constraint_id),
        })?;

    let mut undo_items = vec![UndoPayload::RemovedConstraint {
        record: Box::new(removed.clone()),
    }];

    if p.replay {
        let (mut entities, _index, constraints) = solver_system(&state);
        let report = solve(&mut entities, &constraints, &ctx.core.solve_options);
        if report.converged {
            for solver_entity in &entities {
                let Some(key) = state.resolve_id(&solver_entity.id) else {
                    continue;
                };
                let record = state.entities[&key].clone();
                let mut props = record.properties.clone();
                solver_entity.write_back(&mut props);
                if props != record.properties {
                    let (stored, prior) = state.modify_entity(&key, props)?;
                    undo_items.push(UndoPayload::ModifiedEntity {
                        id: stored,
                        prior: Box::new(prior),
                    });
                }
            }
            apply_statuses(&mut state, &report.outcomes);
        }
    }

    ctx.record_success(
        &mut state,
        vec![],
        Some(UndoPayload::Composite { items: undo_items }),
        false,
    );
    Ok(json!({
        "removed": p.constraint_id,
        "dof_restored": removed.dof_removed,
    }))
}

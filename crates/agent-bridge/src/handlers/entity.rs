//! Entity creation, query, listing and deletion.

use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{CoreResult, EntityId, EntityKind, PropertySet, UndoPayload};

use crate::dispatch::Ctx;
use crate::handlers::entity_summary;
use crate::messages::parse_params;

#[derive(Deserialize)]
struct PointParams {
    coordinates: [f64; 3],
}

pub fn create_point(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: PointParams = parse_params(&ctx.params)?;
    create_with_properties(
        ctx,
        PropertySet::Point3d {
            position: p.coordinates,
        },
        Vec::new(),
    )
}

#[derive(Deserialize)]
struct LineParams {
    start: [f64; 3],
    end: [f64; 3],
}

pub fn create_line(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: LineParams = parse_params(&ctx.params)?;
    create_with_properties(
        ctx,
        PropertySet::Line3d {
            start: p.start,
            end: p.end,
        },
        Vec::new(),
    )
}

#[derive(Deserialize)]
struct CircleParams {
    center: [f64; 3],
    radius: f64,
    #[serde(default = "default_normal")]
    normal: [f64; 3],
}

fn default_normal() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

pub fn create_circle(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: CircleParams = parse_params(&ctx.params)?;
    create_with_properties(
        ctx,
        PropertySet::Circle {
            center: p.center,
            radius: p.radius,
            normal: p.normal,
        },
        Vec::new(),
    )
}

#[derive(Deserialize)]
struct SketchParams {
    entities: Vec<EntityId>,
    #[serde(default)]
    plane_origin: [f64; 3],
    #[serde(default = "default_normal")]
    plane_normal: [f64; 3],
}

pub fn create_sketch(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: SketchParams = parse_params(&ctx.params)?;
    create_with_properties(
        ctx,
        PropertySet::Sketch {
            plane_origin: p.plane_origin,
            plane_normal: p.plane_normal,
            entities: p.entities.clone(),
        },
        p.entities,
    )
}

/// Shared creation path: validate, insert, link parents, record.
fn create_with_properties(
    ctx: &Ctx<'_>,
    properties: PropertySet,
    parents: Vec<EntityId>,
) -> CoreResult<Value> {
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();

    // Parents must exist before anything is inserted.
    for parent in &parents {
        state.get_entity(parent)?;
    }

    let record = state.create_entity(
        properties,
        &ctx.agent_id(),
        ctx.core.store.config.entity_cap,
    )?;
    for parent in &parents {
        state.link(parent, &record.id)?;
    }

    ctx.record_success(
        &mut state,
        vec![record.id.clone()],
        Some(UndoPayload::CreatedEntity {
            id: record.id.clone(),
        }),
        false,
    );
    let stored = state.get_entity(&record.id)?;
    Ok(entity_summary(&stored))
}

#[derive(Deserialize)]
struct QueryParams {
    entity_id: EntityId,
}

pub fn query(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: QueryParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let state = slot.state.lock();
    let record = state.get_entity(&p.entity_id)?;
    Ok(entity_summary(&record))
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    kind: Option<EntityKind>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

pub fn list(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ListParams = parse_params(&ctx.params)?;
    let (slot, ws) = ctx.active_slot()?;
    let state = slot.state.lock();
    let records = state.list_entities(p.kind, p.limit, p.offset);
    Ok(json!({
        "workspace_id": ws,
        "count": records.len(),
        "entities": records.iter().map(entity_summary).collect::<Vec<_>>(),
    }))
}

#[derive(Deserialize)]
struct DeleteParams {
    entity_id: EntityId,
}

pub fn delete(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: DeleteParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let undo = state.delete_entity(&p.entity_id)?;
    ctx.record_success(&mut state, vec![], Some(undo), false);
    Ok(json!({ "deleted": p.entity_id }))
}

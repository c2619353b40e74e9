//! Solid-modeling handlers: creation operations, booleans, patterns and
//! mirror. Kernel work happens under the workspace's single-writer lock;
//! every result passes topology validation before any entity is created,
//! and the cooperative deadline is checked before committing.

use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{
    ComputedProps, CoreError, CoreResult, EntityId, PropertySet, UndoPayload,
};
use geom_kernel::{Kernel, PlaneFrame, PrimitiveSpec, Profile2d, SolidBrep};
use model_store::WorkspaceState;
use modeling_ops::{
    execute_boolean, execute_extrude, execute_loft, execute_mirror, execute_pattern_circular,
    execute_pattern_linear, execute_primitive, execute_revolve, execute_sweep,
    profile_from_entity, BooleanKind, OpOutcome, ProgressStage,
};

use crate::dispatch::Ctx;
use crate::messages::parse_params;

/// Resolve a profile-bearing entity into kernel inputs.
fn profile_of(
    state: &WorkspaceState,
    id: &EntityId,
) -> CoreResult<(Profile2d, PlaneFrame, EntityId)> {
    let record = state.get_entity(id)?;
    let resolve = |eid: &EntityId| state.get_entity(eid).ok();
    let (profile, frame) = profile_from_entity(&record, &resolve).map_err(CoreError::from)?;
    Ok((profile, frame, record.id))
}

/// Decode a stored solid's brep.
fn brep_of(ctx: &Ctx<'_>, state: &WorkspaceState, id: &EntityId) -> CoreResult<(SolidBrep, EntityId)> {
    let record = state.get_entity(id)?;
    match &record.properties {
        PropertySet::Solid { brep } => {
            let decoded = ctx.core.kernel.decode_brep(brep).map_err(|e| {
                CoreError::GeometryEngineError {
                    message: e.to_string(),
                }
            })?;
            Ok((decoded, record.id))
        }
        other => Err(CoreError::invalid_parameter(
            "entity_id",
            id,
            "a solid entity",
            Some(&format!("got kind {}", other.kind().as_str())),
        )),
    }
}

/// Store an operation outcome as a new solid entity with cached
/// properties, returning its summary response.
fn commit_solid(
    ctx: &Ctx<'_>,
    state: &mut WorkspaceState,
    outcome: OpOutcome,
    parents: Vec<EntityId>,
    extra_undo: Vec<UndoPayload>,
) -> CoreResult<Value> {
    ctx.check_deadline()?;
    let bytes = ctx
        .core
        .kernel
        .encode_brep(&outcome.brep)
        .map_err(|e| CoreError::GeometryEngineError {
            message: e.to_string(),
        })?;

    let record = state.create_entity(
        PropertySet::Solid { brep: bytes },
        &ctx.agent_id(),
        ctx.core.store.config.entity_cap,
    )?;
    for parent in &parents {
        if state.resolve_id(parent).is_some() {
            state.link(parent, &record.id)?;
        }
    }
    state.set_computed(
        &record.id,
        ComputedProps {
            volume: Some(outcome.mass.volume),
            surface_area: Some(outcome.mass.surface_area),
            length: None,
            center_of_mass: Some(outcome.mass.center_of_mass),
            face_count: Some(outcome.face_count),
            bbox: outcome.bbox,
            valid: true,
        },
    )?;
    state.set_validity(&record.id, true, Vec::new())?;

    let mut undo_items = extra_undo;
    undo_items.push(UndoPayload::CreatedEntity {
        id: record.id.clone(),
    });
    let undo = if undo_items.len() == 1 {
        undo_items.remove(0)
    } else {
        UndoPayload::Composite { items: undo_items }
    };
    ctx.record_success(
        &mut *state,
        vec![record.id.clone()],
        Some(undo),
        !outcome.warnings.is_empty(),
    );

    Ok(json!({
        "entity_id": record.id,
        "entity_type": "solid",
        "volume": outcome.mass.volume,
        "surface_area": outcome.mass.surface_area,
        "center_of_mass": outcome.mass.center_of_mass,
        "face_count": outcome.face_count,
        "is_closed": true,
        "is_manifold": true,
        "bounding_box": outcome.bbox.map(|b| json!({ "min": b.min, "max": b.max })),
        "warnings": outcome.warnings,
    }))
}

/// Progress sink bridging modeling-ops stages to wire frames.
macro_rules! sink {
    ($ctx:expr) => {
        &mut |stage: ProgressStage, percent: f32| $ctx.progress(stage.as_str(), percent)
    };
}

#[derive(Deserialize)]
struct ExtrudeParams {
    profile_id: EntityId,
    #[serde(default = "default_direction")]
    direction: [f64; 3],
    distance: f64,
}

fn default_direction() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

pub fn extrude(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ExtrudeParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (profile, frame, profile_id) = profile_of(&state, &p.profile_id)?;
    let outcome = execute_extrude(
        ctx.core.kernel.as_ref(),
        &profile,
        &frame,
        p.direction,
        p.distance,
        sink!(ctx),
    )
    .map_err(CoreError::from)?;
    commit_solid(ctx, &mut state, outcome, vec![profile_id], Vec::new())
}

#[derive(Deserialize)]
struct RevolveParams {
    profile_id: EntityId,
    axis_origin: [f64; 3],
    axis_direction: [f64; 3],
    #[serde(default = "default_angle")]
    angle: f64,
}

fn default_angle() -> f64 {
    std::f64::consts::TAU
}

pub fn revolve(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: RevolveParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (profile, frame, profile_id) = profile_of(&state, &p.profile_id)?;
    let outcome = execute_revolve(
        ctx.core.kernel.as_ref(),
        &profile,
        &frame,
        p.axis_origin,
        p.axis_direction,
        p.angle,
        sink!(ctx),
    )
    .map_err(CoreError::from)?;
    commit_solid(ctx, &mut state, outcome, vec![profile_id], Vec::new())
}

#[derive(Deserialize)]
struct LoftParams {
    profile_ids: Vec<EntityId>,
    #[serde(default = "default_true")]
    ruled: bool,
    #[serde(default = "default_true")]
    solid: bool,
}

fn default_true() -> bool {
    true
}

pub fn loft(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: LoftParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let mut sections = Vec::with_capacity(p.profile_ids.len());
    let mut parents = Vec::with_capacity(p.profile_ids.len());
    for id in &p.profile_ids {
        let (profile, frame, pid) = profile_of(&state, id)?;
        sections.push((profile, frame));
        parents.push(pid);
    }
    let outcome = execute_loft(
        ctx.core.kernel.as_ref(),
        &sections,
        p.ruled,
        p.solid,
        sink!(ctx),
    )
    .map_err(CoreError::from)?;
    commit_solid(ctx, &mut state, outcome, parents, Vec::new())
}

#[derive(Deserialize)]
struct SweepParams {
    profile_id: EntityId,
    /// Either a wire entity to follow…
    #[serde(default)]
    path_id: Option<EntityId>,
    /// …or explicit path points.
    #[serde(default)]
    path: Option<Vec<[f64; 3]>>,
}

/// Chain a wire entity's member curves into an ordered polyline.
fn wire_points(state: &WorkspaceState, id: &EntityId) -> CoreResult<Vec<[f64; 3]>> {
    let record = state.get_entity(id)?;
    let PropertySet::Wire { edges } = &record.properties else {
        return Err(CoreError::invalid_parameter(
            "path_id",
            id,
            "a wire entity",
            None,
        ));
    };
    let mut points: Vec<[f64; 3]> = Vec::new();
    for edge_id in edges {
        let edge = state.get_entity(edge_id)?;
        let (start, end) = match edge.properties {
            PropertySet::Line3d { start, end } => (start, end),
            PropertySet::Line2d { start, end } => {
                ([start[0], start[1], 0.0], [end[0], end[1], 0.0])
            }
            _ => {
                return Err(CoreError::invalid_parameter(
                    "path_id",
                    edge_id,
                    "wire members must be line entities",
                    None,
                ))
            }
        };
        if points.is_empty() {
            points.push(start);
        }
        points.push(end);
    }
    Ok(points)
}

pub fn sweep(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: SweepParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (profile, _frame, profile_id) = profile_of(&state, &p.profile_id)?;
    let path = match (&p.path, &p.path_id) {
        (Some(points), _) => points.clone(),
        (None, Some(wire)) => wire_points(&state, wire)?,
        (None, None) => {
            return Err(CoreError::MissingParameter {
                field: "path".to_string(),
            })
        }
    };
    let outcome = execute_sweep(ctx.core.kernel.as_ref(), &profile, &path, sink!(ctx))
        .map_err(CoreError::from)?;
    commit_solid(ctx, &mut state, outcome, vec![profile_id], Vec::new())
}

#[derive(Deserialize)]
struct BooleanParams {
    operation: String,
    target_id: EntityId,
    tool_id: EntityId,
}

pub fn boolean(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: BooleanParams = parse_params(&ctx.params)?;
    let kind = BooleanKind::from_str_tag(&p.operation).ok_or_else(|| {
        CoreError::invalid_parameter(
            "operation",
            &p.operation,
            "union|subtract|intersect",
            Some("union"),
        )
    })?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (a, a_id) = brep_of(ctx, &state, &p.target_id)?;
    let (b, b_id) = brep_of(ctx, &state, &p.tool_id)?;
    if a_id == b_id {
        return Err(CoreError::OperationInvalid {
            reason: "boolean operands must be distinct solids".to_string(),
        });
    }

    let outcome = execute_boolean(ctx.core.kernel.as_ref(), kind, &a, &b, sink!(ctx))
        .map_err(CoreError::from)?;
    ctx.check_deadline()?;

    // Booleans consume their operands: the result replaces both.
    let undo_a = state.delete_entity(&a_id)?;
    let undo_b = state.delete_entity(&b_id)?;
    commit_solid(ctx, &mut state, outcome, vec![], vec![undo_a, undo_b])
}

pub fn primitive(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let spec: PrimitiveSpec = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let outcome = execute_primitive(ctx.core.kernel.as_ref(), &spec, sink!(ctx))
        .map_err(CoreError::from)?;
    commit_solid(ctx, &mut state, outcome, vec![], Vec::new())
}

#[derive(Deserialize)]
struct PatternLinearParams {
    base_id: EntityId,
    direction: [f64; 3],
    spacing: f64,
    count: usize,
}

pub fn pattern_linear(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: PatternLinearParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (base, base_id) = brep_of(ctx, &state, &p.base_id)?;
    let outcome = execute_pattern_linear(
        ctx.core.kernel.as_ref(),
        &base,
        p.direction,
        p.spacing,
        p.count,
        sink!(ctx),
    )
    .map_err(CoreError::from)?;
    ctx.check_deadline()?;
    let undo_base = state.delete_entity(&base_id)?;
    commit_solid(ctx, &mut state, outcome, vec![], vec![undo_base])
}

#[derive(Deserialize)]
struct PatternCircularParams {
    base_id: EntityId,
    axis_origin: [f64; 3],
    axis_direction: [f64; 3],
    count: usize,
    #[serde(default = "default_angle")]
    total_angle: f64,
}

pub fn pattern_circular(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: PatternCircularParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (base, base_id) = brep_of(ctx, &state, &p.base_id)?;
    let outcome = execute_pattern_circular(
        ctx.core.kernel.as_ref(),
        &base,
        p.axis_origin,
        p.axis_direction,
        p.count,
        p.total_angle,
        sink!(ctx),
    )
    .map_err(CoreError::from)?;
    ctx.check_deadline()?;
    let undo_base = state.delete_entity(&base_id)?;
    commit_solid(ctx, &mut state, outcome, vec![], vec![undo_base])
}

#[derive(Deserialize)]
struct MirrorParams {
    base_id: EntityId,
    plane_point: [f64; 3],
    plane_normal: [f64; 3],
}

pub fn mirror(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: MirrorParams = parse_params(&ctx.params)?;
    let (slot, _ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let (base, base_id) = brep_of(ctx, &state, &p.base_id)?;
    let outcome = execute_mirror(
        ctx.core.kernel.as_ref(),
        &base,
        p.plane_point,
        p.plane_normal,
        sink!(ctx),
    )
    .map_err(CoreError::from)?;
    // Mirror keeps its source; the reflected copy is a derived entity.
    commit_solid(ctx, &mut state, outcome, vec![base_id], Vec::new())
}

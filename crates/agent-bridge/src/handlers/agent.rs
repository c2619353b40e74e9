//! Session introspection and scripted practice scenarios.

use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{CoreError, CoreResult};

use crate::dispatch::Ctx;
use crate::handlers;
use crate::messages::parse_params;

pub fn metrics(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let session = ctx.session.lock();
    Ok(json!({
        "session_id": session.session_id,
        "agent_id": session.agent_id,
        "active_workspace": session.active_workspace,
        "role": session.ruleset.role_name,
        "attempts": session.counters.attempts,
        "successes": session.counters.successes,
        "errors": session.counters.errors,
        "recent_errors": session.recent_errors().map(|e| json!({
            "method": e.method,
            "code": e.code,
            "message": e.message,
        })).collect::<Vec<_>>(),
    }))
}

/// Run one inner request as part of a scenario: role-gated like a normal
/// request, progress discarded, result collected.
fn call(ctx: &Ctx<'_>, method: &'static str, params: Value) -> CoreResult<Value> {
    {
        let session = ctx.session.lock();
        if !session.ruleset.permits(method) {
            return Err(CoreError::RoleViolation {
                role: session.ruleset.role_name.clone(),
                method: method.to_string(),
            });
        }
    }
    let silent = |_frame: crate::messages::ResponseFrame| {};
    let child = ctx.child(method, params, &silent);
    handlers::invoke(&child)
}

#[derive(Deserialize)]
struct ScenarioParams {
    name: String,
}

pub fn run_scenario(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ScenarioParams = parse_params(&ctx.params)?;
    let steps = match p.name.as_str() {
        "point_and_query" => point_and_query(ctx)?,
        "rectangle_to_box" => rectangle_to_box(ctx)?,
        "boolean_subtract" => boolean_subtract(ctx)?,
        other => {
            return Err(CoreError::invalid_parameter(
                "name",
                other,
                "point_and_query|rectangle_to_box|boolean_subtract",
                Some("rectangle_to_box"),
            ))
        }
    };
    Ok(json!({ "scenario": p.name, "steps": steps }))
}

fn point_and_query(ctx: &Ctx<'_>) -> CoreResult<Vec<Value>> {
    let created = call(
        ctx,
        "entity.create.point",
        json!({ "coordinates": [0.0, 0.0, 0.0] }),
    )?;
    let id = created["entity_id"].clone();
    let queried = call(ctx, "entity.query", json!({ "entity_id": id }))?;
    Ok(vec![created, queried])
}

/// Four lines closing a 10×5 rectangle, bound into a sketch, extruded 10.
fn rectangle_to_box(ctx: &Ctx<'_>) -> CoreResult<Vec<Value>> {
    let corners = [
        [0.0, 0.0, 0.0],
        [10.0, 0.0, 0.0],
        [10.0, 5.0, 0.0],
        [0.0, 5.0, 0.0],
    ];
    let mut steps = Vec::new();
    let mut line_ids = Vec::new();
    for i in 0..4 {
        let line = call(
            ctx,
            "entity.create.line",
            json!({ "start": corners[i], "end": corners[(i + 1) % 4] }),
        )?;
        line_ids.push(line["entity_id"].clone());
        steps.push(line);
    }
    let sketch = call(ctx, "entity.create.sketch", json!({ "entities": line_ids }))?;
    let sketch_id = sketch["entity_id"].clone();
    steps.push(sketch);
    let solid = call(
        ctx,
        "solid.extrude",
        json!({ "profile_id": sketch_id, "direction": [0.0, 0.0, 1.0], "distance": 10.0 }),
    )?;
    steps.push(solid);
    Ok(steps)
}

/// The rectangle box minus a drilled cylinder.
fn boolean_subtract(ctx: &Ctx<'_>) -> CoreResult<Vec<Value>> {
    let mut steps = rectangle_to_box(ctx)?;
    let box_id = steps
        .last()
        .map(|s| s["entity_id"].clone())
        .unwrap_or(Value::Null);
    let circle = call(
        ctx,
        "entity.create.circle",
        json!({ "center": [5.0, 2.5, 0.0], "radius": 2.0 }),
    )?;
    let circle_id = circle["entity_id"].clone();
    steps.push(circle);
    let cylinder = call(
        ctx,
        "solid.extrude",
        json!({ "profile_id": circle_id, "direction": [0.0, 0.0, 1.0], "distance": 15.0 }),
    )?;
    let cylinder_id = cylinder["entity_id"].clone();
    steps.push(cylinder);
    let result = call(
        ctx,
        "solid.boolean",
        json!({ "operation": "subtract", "target_id": box_id, "tool_id": cylinder_id }),
    )?;
    steps.push(result);
    Ok(steps)
}

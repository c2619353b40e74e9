//! Method handlers, grouped by wire namespace.

pub mod agent;
pub mod constraint;
pub mod entity;
pub mod files;
pub mod history;
pub mod solid;
pub mod workspace;

use serde_json::{json, Value};

use anvil_types::{CoreError, CoreResult, EntityKind, EntityRecord, PropertySet};

use crate::dispatch::Ctx;

/// Route an already-gated request to its handler.
pub fn invoke(ctx: &Ctx<'_>) -> CoreResult<Value> {
    match ctx.method {
        "entity.create.point" => entity::create_point(ctx),
        "entity.create.line" => entity::create_line(ctx),
        "entity.create.circle" => entity::create_circle(ctx),
        "entity.create.sketch" => entity::create_sketch(ctx),
        "entity.query" => entity::query(ctx),
        "entity.list" => entity::list(ctx),
        "entity.delete" => entity::delete(ctx),
        "constraint.apply" => constraint::apply(ctx),
        "constraint.status" => constraint::status(ctx),
        "constraint.remove" => constraint::remove(ctx),
        "solid.extrude" => solid::extrude(ctx),
        "solid.revolve" => solid::revolve(ctx),
        "solid.loft" => solid::loft(ctx),
        "solid.sweep" => solid::sweep(ctx),
        "solid.boolean" => solid::boolean(ctx),
        "solid.primitive" => solid::primitive(ctx),
        "solid.pattern_linear" => solid::pattern_linear(ctx),
        "solid.pattern_circular" => solid::pattern_circular(ctx),
        "solid.mirror" => solid::mirror(ctx),
        "workspace.create" => workspace::create(ctx),
        "workspace.switch" => workspace::switch(ctx),
        "workspace.status" => workspace::status(ctx),
        "workspace.list" => workspace::list(ctx),
        "workspace.merge" => workspace::merge(ctx),
        "workspace.resolve_conflict" => workspace::resolve_conflict(ctx),
        "workspace.delete" => workspace::delete(ctx),
        "history.list" => history::list(ctx),
        "history.undo" => history::undo(ctx),
        "history.redo" => history::redo(ctx),
        "file.import" => files::import(ctx),
        "file.export" => files::export(ctx),
        "agent.metrics" => agent::metrics(ctx),
        "scenario.run" => agent::run_scenario(ctx),
        other => Err(CoreError::MethodNotFound {
            method: other.to_string(),
        }),
    }
}

/// Wire-facing entity type names: the common kinds drop their dimension
/// suffix, matching the creation method names.
pub fn wire_entity_type(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Point3d => "point",
        EntityKind::Line3d => "line",
        other => other.as_str(),
    }
}

/// The standard entity summary returned by query/list/create responses.
pub fn entity_summary(record: &EntityRecord) -> Value {
    let mut out = json!({
        "entity_id": record.id,
        "entity_type": wire_entity_type(record.kind),
        "kind": record.kind,
        "workspace_id": record.workspace_id,
        "parents": record.parents,
        "children": record.children,
        "created_at": record.created_at,
        "modified_at": record.modified_at,
        "created_by": record.created_by,
        "is_valid": record.is_valid,
        "validation_codes": record.validation_codes.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
    });
    let map = out.as_object_mut().expect("summary is an object");

    match &record.properties {
        PropertySet::Point2d { position } => {
            map.insert("coordinates".into(), json!([position[0], position[1], 0.0]));
        }
        PropertySet::Point3d { position } => {
            map.insert("coordinates".into(), json!(position));
        }
        PropertySet::Solid { .. } => {
            // Blobs stay out of summaries; callers export them explicitly.
        }
        other => {
            if let Ok(props) = serde_json::to_value(other) {
                map.insert("properties".into(), props);
            }
        }
    }

    if record.computed.valid {
        if let Some(v) = record.computed.volume {
            map.insert("volume".into(), json!(v));
        }
        if let Some(a) = record.computed.surface_area {
            map.insert("surface_area".into(), json!(a));
        }
        if let Some(l) = record.computed.length {
            map.insert("length".into(), json!(l));
        }
        if let Some(c) = record.computed.center_of_mass {
            map.insert("center_of_mass".into(), json!(c));
        }
        if let Some(f) = record.computed.face_count {
            map.insert("face_count".into(), json!(f));
        }
        if let Some(b) = record.computed.bbox {
            map.insert("bounding_box".into(), json!({ "min": b.min, "max": b.max }));
        }
    }
    out
}

//! Dispatcher contract tests: parse failures, routing, role enforcement,
//! parameter validation, boundary geometry and invariant checks.

use serde_json::json;

use anvil_types::RoleRuleset;
use test_harness::{assert_close, TestClient};
use test_harness::assertions::f64_of;

#[test]
fn unknown_method_is_method_not_found() {
    let client = TestClient::new();
    let exchange = client.call("entity.create.hyperboloid", json!({}));
    assert_eq!(exchange.error_code(), "MethodNotFound");
}

#[test]
fn missing_parameter_names_the_field() {
    let client = TestClient::new();
    let exchange = client.call("entity.create.circle", json!({ "center": [0, 0, 0] }));
    assert_eq!(exchange.error_code(), "MissingParameter");
    assert_eq!(exchange.error()["data"]["field"], "radius");
}

#[test]
fn role_gate_blocks_disallowed_methods() {
    let readonly = RoleRuleset::allow_only("validator", ["entity.query", "entity.list"]);
    let client = TestClient::with_role(readonly);

    let denied = client.call(
        "entity.create.point",
        json!({ "coordinates": [0.0, 0.0, 0.0] }),
    );
    assert_eq!(denied.error_code(), "RoleViolation");
    assert_eq!(denied.error()["data"]["role"], "validator");
    assert_eq!(denied.error()["data"]["method"], "entity.create.point");

    // The gate fires before any state mutation.
    let listing = client.expect("entity.list", json!({}));
    assert_eq!(listing["count"], 0);
}

#[test]
fn circle_radius_boundary() {
    let client = TestClient::new();
    let too_small = client.call(
        "entity.create.circle",
        json!({ "center": [0.0, 0.0, 0.0], "radius": 1e-7 }),
    );
    assert_eq!(too_small.error_code(), "InvalidGeometry");

    let at_boundary = client.expect(
        "entity.create.circle",
        json!({ "center": [0.0, 0.0, 0.0], "radius": 1e-6 }),
    );
    assert_eq!(at_boundary["entity_type"], "circle");
}

#[test]
fn under_constrained_status_reports_positive_dof() {
    let client = TestClient::new();
    let a = client.expect(
        "entity.create.point",
        json!({ "coordinates": [0.0, 0.0, 0.0] }),
    );
    let b = client.expect(
        "entity.create.point",
        json!({ "coordinates": [3.0, 4.0, 0.0] }),
    );
    client.expect(
        "constraint.apply",
        json!({
            "constraint_type": "distance",
            "entities": [a["entity_id"], b["entity_id"]],
            "value": 5.0,
        }),
    );
    let status = client.expect("constraint.status", json!({}));
    assert!(status["dof_remaining"].as_i64().unwrap() > 0);
    assert_eq!(status["determination"], "under_determined");
}

#[test]
fn errors_produce_no_output_entities() {
    let client = TestClient::new();
    let before = client.expect("entity.list", json!({}));
    let exchange = client.call(
        "entity.create.line",
        json!({ "start": [0.0, 0.0, 0.0], "end": [0.0, 0.0, 0.0] }),
    );
    assert_eq!(exchange.error_code(), "InvalidGeometry");
    let after = client.expect("entity.list", json!({}));
    assert_eq!(before["count"], after["count"]);

    // The failure is still visible in history, as a status=error record.
    let history = client.expect("history.list", json!({}));
    let ops = history["operations"].as_array().unwrap();
    assert!(ops
        .iter()
        .any(|op| op["status"] == "error" && op["error_code"] == "InvalidGeometry"));
}

#[test]
fn operation_timestamps_are_monotonic_per_workspace() {
    let client = TestClient::new();
    for i in 0..5 {
        client.expect(
            "entity.create.point",
            json!({ "coordinates": [i as f64, 0.0, 0.0] }),
        );
    }
    let history = client.expect("history.list", json!({}));
    let ops = history["operations"].as_array().unwrap();
    // Reverse-chronological listing: each timestamp is >= the next one.
    for pair in ops.windows(2) {
        let newer = pair[0]["timestamp"].as_str().unwrap();
        let older = pair[1]["timestamp"].as_str().unwrap();
        assert!(newer >= older, "{newer} < {older}");
    }
}

#[test]
fn entity_delete_with_children_rejected() {
    let client = TestClient::new();
    let (_lines, sketch_id, _solid) = client.build_rectangle_box();
    let exchange = client.call("entity.delete", json!({ "entity_id": sketch_id }));
    assert_eq!(exchange.error_code(), "OperationInvalid");
}

#[test]
fn primitive_cylinder_properties() {
    let client = TestClient::new();
    let solid = client.expect(
        "solid.primitive",
        json!({
            "shape": "cylinder",
            "base": [0.0, 0.0, 0.0],
            "axis": [0.0, 0.0, 1.0],
            "radius": 3.0,
            "height": 5.0,
        }),
    );
    assert_close(
        f64_of(&solid, "volume"),
        std::f64::consts::PI * 9.0 * 5.0,
        0.05,
    );
    assert_eq!(solid["face_count"], 3);
}

#[test]
fn export_reports_tessellation_error() {
    let client = TestClient::new();
    let (_lines, _sketch, solid_id) = client.build_rectangle_box();
    let export = client.expect(
        "file.export",
        json!({ "entity_id": solid_id, "format": "stl" }),
    );
    // A polyhedral box tessellates exactly.
    assert_close(f64_of(&export, "volume_error"), 0.0, 1e-9);
    assert!(export["data"].is_string());
}

#[test]
fn import_then_reexport_round_trips_volume() {
    let client = TestClient::new();
    let (_lines, _sketch, solid_id) = client.build_rectangle_box();
    let exported = client.expect(
        "file.export",
        json!({ "entity_id": solid_id, "format": "stl" }),
    );

    let imported = client.expect(
        "file.import",
        json!({ "format": "stl", "data": exported["data"] }),
    );
    assert_close(f64_of(&imported, "volume"), 500.0, 0.01);
}

#[test]
fn scenario_runner_executes_library_scenario() {
    let client = TestClient::new();
    let run = client.expect("scenario.run", json!({ "name": "rectangle_to_box" }));
    let steps = run["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 6);
    let solid = steps.last().unwrap();
    assert_close(f64_of(solid, "volume"), 500.0, 0.01);
}

#[test]
fn metrics_track_attempts_and_errors() {
    let client = TestClient::new();
    client.expect(
        "entity.create.point",
        json!({ "coordinates": [0.0, 0.0, 0.0] }),
    );
    client.call("entity.create.circle", json!({}));
    let metrics = client.expect("agent.metrics", json!({}));
    assert_eq!(metrics["successes"], 1);
    assert_eq!(metrics["errors"], 1);
    assert_eq!(metrics["recent_errors"][0]["code"], "MissingParameter");
}

#[test]
fn workspace_entity_cap_enforced() {
    let mut config = anvil_types::CoreConfig::ephemeral();
    config.entity_cap = 3;
    let core = agent_bridge::Core::new(config).unwrap();
    let client = TestClient::with_core(core, RoleRuleset::unrestricted());
    for i in 0..3 {
        client.expect(
            "entity.create.point",
            json!({ "coordinates": [i as f64, 0.0, 0.0] }),
        );
    }
    let over = client.call(
        "entity.create.point",
        json!({ "coordinates": [9.0, 0.0, 0.0] }),
    );
    assert_eq!(over.error_code(), "OperationInvalid");
}

//! An in-process agent: submits requests straight into the dispatcher and
//! collects every emitted frame, exactly as they would appear on the wire.

use parking_lot::Mutex;
use serde_json::{json, Value};

use agent_bridge::{dispatch_request, Core, RequestFrame, ResponseFrame, Session};
use anvil_types::{AgentId, RoleRuleset};

/// All frames of one request/response exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub frames: Vec<Value>,
}

impl Exchange {
    /// Progress frames, in emission order.
    pub fn progress(&self) -> Vec<&Value> {
        self.frames
            .iter()
            .filter(|f| f["status"] == "progress")
            .collect()
    }

    /// The terminal frame (result or error).
    pub fn terminal(&self) -> &Value {
        self.frames
            .iter()
            .find(|f| f["status"] != "progress")
            .expect("exchange has a terminal frame")
    }

    pub fn result(&self) -> &Value {
        let terminal = self.terminal();
        assert!(
            terminal.get("error").is_none(),
            "expected success, got {terminal}"
        );
        &terminal["result"]
    }

    pub fn error(&self) -> &Value {
        let terminal = self.terminal();
        assert!(
            terminal.get("error").is_some(),
            "expected error, got {terminal}"
        );
        &terminal["error"]
    }

    pub fn error_code(&self) -> &str {
        self.error()["code"].as_str().expect("error has a code")
    }
}

/// A synchronous in-process session against one core.
pub struct TestClient {
    pub core: Core,
    session: Mutex<Session>,
    next_id: Mutex<u64>,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_role(RoleRuleset::unrestricted())
    }

    pub fn with_role(ruleset: RoleRuleset) -> Self {
        Self::with_core(Core::ephemeral(), ruleset)
    }

    pub fn with_core(core: Core, ruleset: RoleRuleset) -> Self {
        Self {
            core,
            session: Mutex::new(Session::new(AgentId::new("harness"), ruleset)),
            next_id: Mutex::new(1),
        }
    }

    /// Submit one request and capture every frame it produces.
    pub fn call(&self, method: &str, params: Value) -> Exchange {
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        let frame = RequestFrame {
            version: "1.0".to_string(),
            method: method.to_string(),
            params,
            id: json!(id),
        };
        let collected: Mutex<Vec<Value>> = Mutex::new(Vec::new());
        let emit = |frame: ResponseFrame| {
            let line = frame.to_line();
            let value: Value =
                serde_json::from_str(&line).expect("frames serialize to valid JSON");
            collected.lock().push(value);
        };
        dispatch_request(&self.core, &self.session, frame, &emit);
        Exchange {
            frames: collected.into_inner(),
        }
    }

    /// Submit and unwrap the success result.
    pub fn expect(&self, method: &str, params: Value) -> Value {
        self.call(method, params).result().clone()
    }

    /// Create the four lines of the spec rectangle, its sketch, and the
    /// extruded box. Returns (line ids, sketch id, solid id).
    pub fn build_rectangle_box(&self) -> (Vec<Value>, Value, Value) {
        let corners = [
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [10.0, 5.0, 0.0],
            [0.0, 5.0, 0.0],
        ];
        let mut line_ids = Vec::new();
        for i in 0..4 {
            let line = self.expect(
                "entity.create.line",
                json!({ "start": corners[i], "end": corners[(i + 1) % 4] }),
            );
            line_ids.push(line["entity_id"].clone());
        }
        let sketch = self.expect(
            "entity.create.sketch",
            json!({ "entities": line_ids }),
        );
        let sketch_id = sketch["entity_id"].clone();
        let solid = self.expect(
            "solid.extrude",
            json!({
                "profile_id": sketch_id,
                "direction": [0.0, 0.0, 1.0],
                "distance": 10.0,
            }),
        );
        (line_ids, sketch_id, solid["entity_id"].clone())
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

//! The per-request pipeline: parse, route, role gate, parameter
//! validation, handler invocation under the workspace's single-writer
//! lock, and response serialization. All frames of one exchange share the
//! request's correlation id.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use anvil_types::{CoreError, CoreResult, OperationRecord, OperationStatus, UndoPayload};
use model_store::{WorkspaceSlot, WorkspaceState};

use crate::handlers;
use crate::messages::{RequestFrame, ResponseFrame, SUPPORTED_VERSIONS};
use crate::session::Session;
use crate::Core;

/// Every method this build serves.
pub const METHODS: &[&str] = &[
    "entity.create.point",
    "entity.create.line",
    "entity.create.circle",
    "entity.create.sketch",
    "entity.query",
    "entity.list",
    "entity.delete",
    "constraint.apply",
    "constraint.status",
    "constraint.remove",
    "solid.extrude",
    "solid.revolve",
    "solid.loft",
    "solid.sweep",
    "solid.boolean",
    "solid.primitive",
    "solid.pattern_linear",
    "solid.pattern_circular",
    "solid.mirror",
    "workspace.create",
    "workspace.switch",
    "workspace.status",
    "workspace.list",
    "workspace.merge",
    "workspace.resolve_conflict",
    "workspace.delete",
    "history.list",
    "history.undo",
    "history.redo",
    "file.import",
    "file.export",
    "agent.metrics",
    "scenario.run",
];

/// Methods that never mutate model state. They bypass the per-session
/// ordering gate and may run concurrently with mutations.
pub fn is_read_only(method: &str) -> bool {
    matches!(
        method,
        "entity.query"
            | "entity.list"
            | "constraint.status"
            | "workspace.status"
            | "workspace.list"
            | "history.list"
            | "file.export"
            | "agent.metrics"
    )
}

/// Everything a handler needs for one invocation.
pub struct Ctx<'a> {
    pub core: &'a Core,
    pub session: &'a Mutex<Session>,
    pub method: &'a str,
    pub params: Value,
    pub correlation: Value,
    pub emit: &'a dyn Fn(ResponseFrame),
    pub deadline: Instant,
    timed_out: Cell<bool>,
    pub started: Instant,
}

impl<'a> Ctx<'a> {
    /// Emit a progress frame carrying the request's correlation id, and
    /// note deadline expiry for the next cooperative checkpoint.
    pub fn progress(&self, stage: &str, percent: f32) {
        if Instant::now() > self.deadline {
            self.timed_out.set(true);
        }
        (self.emit)(ResponseFrame::progress(
            self.correlation.clone(),
            stage,
            percent,
        ));
    }

    /// Cooperative cancellation checkpoint: called between kernel calls
    /// and before committing results. Partial kernel output is discarded
    /// by returning before any store mutation.
    pub fn check_deadline(&self) -> CoreResult<()> {
        if self.timed_out.get() || Instant::now() > self.deadline {
            let budget = self.core.store.config.handler_budget;
            return Err(CoreError::Timeout {
                budget_ms: budget.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// A derived context for an inner request (scenario steps), sharing
    /// the session, deadline and correlation id.
    pub fn child<'b>(
        &'b self,
        method: &'b str,
        params: Value,
        emit: &'b dyn Fn(ResponseFrame),
    ) -> Ctx<'b> {
        Ctx {
            core: self.core,
            session: self.session,
            method,
            params,
            correlation: self.correlation.clone(),
            emit,
            deadline: self.deadline,
            timed_out: Cell::new(self.timed_out.get()),
            started: Instant::now(),
        }
    }

    /// The session's active workspace slot.
    pub fn active_slot(&self) -> CoreResult<(Arc<WorkspaceSlot>, anvil_types::WorkspaceId)> {
        let ws = self.session.lock().active_workspace.clone();
        Ok((self.core.store.slot(&ws)?, ws))
    }

    pub fn agent_id(&self) -> anvil_types::AgentId {
        self.session.lock().agent_id.clone()
    }

    /// Append a successful operation record and persist the workspace.
    pub fn record_success(
        &self,
        state: &mut WorkspaceState,
        outputs: Vec<anvil_types::EntityId>,
        undo: Option<UndoPayload>,
        warnings: bool,
    ) -> OperationRecord {
        let (op_id, timestamp) = state.log.stamp();
        let record = OperationRecord {
            operation_id: op_id,
            operation_type: self.method.to_string(),
            workspace_id: state.id().clone(),
            agent_id: self.agent_id(),
            timestamp,
            inputs: self.params.clone(),
            outputs,
            status: if warnings {
                OperationStatus::Warning
            } else {
                OperationStatus::Success
            },
            error_code: None,
            execution_time_ms: self.started.elapsed().as_secs_f64() * 1e3,
            undo,
        };
        state.log.append(record.clone());
        self.core.store.persist(state);
        self.core.store.persist_op(state.id(), &record);
        record
    }

    /// Append a `status = error` record: the operation changed nothing.
    fn record_error(&self, error: &CoreError) {
        let Ok((slot, ws)) = self.active_slot() else {
            return;
        };
        let mut state = slot.state.lock();
        let (op_id, timestamp) = state.log.stamp();
        let record = OperationRecord {
            operation_id: op_id,
            operation_type: self.method.to_string(),
            workspace_id: ws.clone(),
            agent_id: self.agent_id(),
            timestamp,
            inputs: self.params.clone(),
            outputs: vec![],
            status: OperationStatus::Error,
            error_code: Some(error.code().to_string()),
            execution_time_ms: self.started.elapsed().as_secs_f64() * 1e3,
            undo: None,
        };
        state.log.append(record.clone());
        self.core.store.persist_op(&ws, &record);
    }
}

/// Process one parsed request and emit all of its frames.
pub fn dispatch_request(
    core: &Core,
    session: &Mutex<Session>,
    frame: RequestFrame,
    emit: &dyn Fn(ResponseFrame),
) {
    session.lock().record_attempt();
    let correlation = frame.id.clone();

    if !SUPPORTED_VERSIONS.contains(&frame.version.as_str()) {
        let error = CoreError::invalid_parameter(
            "version",
            &frame.version,
            "1 or 1.0",
            Some("1.0"),
        );
        finish_error(session, &frame.method, correlation, &error, emit, None);
        return;
    }

    if !METHODS.contains(&frame.method.as_str()) {
        let error = CoreError::MethodNotFound {
            method: frame.method.clone(),
        };
        finish_error(session, &frame.method, correlation, &error, emit, None);
        return;
    }

    // Role gate: enforced before any state is touched.
    {
        let guard = session.lock();
        if !guard.ruleset.permits(&frame.method) {
            let error = CoreError::RoleViolation {
                role: guard.ruleset.role_name.clone(),
                method: frame.method.clone(),
            };
            drop(guard);
            finish_error(session, &frame.method, correlation, &error, emit, None);
            return;
        }
    }

    let budget = core.store.config.handler_budget;
    let ctx = Ctx {
        core,
        session,
        method: &frame.method,
        params: frame.params,
        correlation: correlation.clone(),
        emit,
        deadline: Instant::now() + budget,
        timed_out: Cell::new(false),
        started: Instant::now(),
    };

    debug!(method = ctx.method, "dispatch");
    match handlers::invoke(&ctx) {
        Ok(result) => {
            session.lock().record_success();
            emit(ResponseFrame::result(correlation, result));
        }
        Err(error) => {
            warn!(method = ctx.method, code = error.code(), "handler failed");
            finish_error(
                session,
                &frame.method,
                correlation,
                &error,
                emit,
                Some(&ctx),
            );
        }
    }
}

fn finish_error(
    session: &Mutex<Session>,
    method: &str,
    correlation: Value,
    error: &CoreError,
    emit: &dyn Fn(ResponseFrame),
    ctx: Option<&Ctx<'_>>,
) {
    session
        .lock()
        .record_error(method, error.code(), &error.to_string());
    // Handler-level failures leave a single error record in the history;
    // dispatcher-level failures (parse, route, role) never touch state.
    if let Some(ctx) = ctx {
        ctx.record_error(error);
    }
    emit(ResponseFrame::error(correlation, error));
}

/// Parse one raw line and dispatch it. Malformed lines produce a
/// `ParseError` response with a null correlation id.
pub fn dispatch_line(
    core: &Core,
    session: &Mutex<Session>,
    line: &str,
    emit: &dyn Fn(ResponseFrame),
) {
    match serde_json::from_str::<RequestFrame>(line) {
        Ok(frame) => dispatch_request(core, session, frame, emit),
        Err(e) => {
            let error = CoreError::ParseError {
                detail: e.to_string(),
            };
            session.lock().record_error("<parse>", error.code(), &error.to_string());
            emit(ResponseFrame::error(Value::Null, &error));
        }
    }
}

//! Operation history: paginated listing, undo and redo over the active
//! workspace's log.

use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{CoreError, CoreResult, OperationRecord};

use crate::dispatch::Ctx;
use crate::messages::parse_params;

fn op_json(record: &OperationRecord) -> Value {
    json!({
        "operation_id": record.operation_id,
        "operation_type": record.operation_type,
        "workspace_id": record.workspace_id,
        "agent_id": record.agent_id,
        "timestamp": record.timestamp,
        "outputs": record.outputs,
        "status": record.status,
        "error_code": record.error_code,
        "execution_time_ms": record.execution_time_ms,
    })
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

pub fn list(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ListParams = parse_params(&ctx.params)?;
    let (slot, ws) = ctx.active_slot()?;
    let state = slot.state.lock();
    let records: Vec<Value> = state.log.list(p.limit, p.offset).iter().map(|r| op_json(r)).collect();
    Ok(json!({
        "workspace_id": ws,
        "op_count": state.log.applied_count(),
        "operations": records,
    }))
}

pub fn undo(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let (slot, ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let Some((idx, payload, record)) = state.log.begin_undo() else {
        return Err(CoreError::OperationInvalid {
            reason: "nothing to undo".to_string(),
        });
    };
    let redo = state.apply_undo(&payload)?;
    state.log.confirm_undo(idx, redo);
    ctx.core.store.persist(&state);
    Ok(json!({
        "workspace_id": ws,
        "undone": op_json(&record),
    }))
}

pub fn redo(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let (slot, ws) = ctx.active_slot()?;
    let mut state = slot.state.lock();
    let Some((idx, payload, record)) = state.log.begin_redo() else {
        return Err(CoreError::OperationInvalid {
            reason: "nothing to redo".to_string(),
        });
    };
    state.apply_redo(&payload)?;
    state.log.confirm_redo(idx);
    ctx.core.store.persist(&state);
    Ok(json!({
        "workspace_id": ws,
        "redone": op_json(&record),
    }))
}

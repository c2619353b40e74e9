//! Workspace handlers: branching, switching, status, merge and conflict
//! resolution.

use serde::Deserialize;
use serde_json::{json, Value};

use anvil_types::{
    CoreError, CoreResult, EntityId, MergeReport, MergeStrategy, ResolveStrategy, WorkspaceId,
};

use crate::dispatch::Ctx;
use crate::messages::parse_params;

#[derive(Deserialize)]
struct CreateParams {
    name: String,
    #[serde(default)]
    base_id: Option<WorkspaceId>,
}

pub fn create(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: CreateParams = parse_params(&ctx.params)?;
    let base = match p.base_id {
        Some(ws) => ws,
        None => ctx.session.lock().active_workspace.clone(),
    };
    let meta = ctx
        .core
        .store
        .create_workspace(&p.name, &base, &ctx.agent_id())?;
    Ok(json!({
        "workspace_id": meta.workspace_id,
        "parent_workspace_id": meta.parent_workspace_id,
        "branch_status": meta.branch_status,
        "divergence_point": meta.divergence_point,
    }))
}

#[derive(Deserialize)]
struct SwitchParams {
    workspace_id: WorkspaceId,
}

pub fn switch(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: SwitchParams = parse_params(&ctx.params)?;
    // Existence check before the session is touched.
    ctx.core.store.slot(&p.workspace_id)?;
    ctx.session.lock().active_workspace = p.workspace_id.clone();
    Ok(json!({ "active_workspace": p.workspace_id }))
}

#[derive(Deserialize)]
struct StatusParams {
    #[serde(default)]
    workspace_id: Option<WorkspaceId>,
}

pub fn status(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: StatusParams = parse_params(&ctx.params)?;
    let ws = match p.workspace_id {
        Some(ws) => ws,
        None => ctx.session.lock().active_workspace.clone(),
    };
    let slot = ctx.core.store.slot(&ws)?;
    let state = slot.state.lock();
    let status = state.status();
    Ok(json!({
        "workspace_id": status.workspace_id,
        "entity_count": status.entity_count,
        "op_count": status.op_count,
        "branch_status": status.branch_status,
        "can_merge": status.can_merge,
        "pending_conflicts": state.pending_conflicts,
    }))
}

pub fn list(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let statuses = ctx.core.store.statuses();
    Ok(json!({
        "active_workspace": ctx.session.lock().active_workspace,
        "workspaces": statuses,
    }))
}

#[derive(Deserialize)]
struct MergeParams {
    source_id: WorkspaceId,
    target_id: WorkspaceId,
    #[serde(default)]
    strategy: MergeStrategy,
}

fn report_json(report: &MergeReport) -> Value {
    json!({
        "source": report.source,
        "target": report.target,
        "applied": report.applied,
        "added": report.added,
        "updated": report.updated,
        "deleted": report.deleted,
        "conflicts": report.conflicts,
    })
}

pub fn merge(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: MergeParams = parse_params(&ctx.params)?;
    let report = ctx.core.store.merge(
        &p.source_id,
        &p.target_id,
        p.strategy,
        &ctx.agent_id(),
        ctx.params.clone(),
    )?;
    Ok(report_json(&report))
}

#[derive(Deserialize)]
struct ResolveParams {
    entity_id: EntityId,
    source_id: WorkspaceId,
    target_id: WorkspaceId,
    #[serde(flatten)]
    strategy: ResolveStrategy,
}

pub fn resolve_conflict(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: ResolveParams = parse_params(&ctx.params)?;
    let report = ctx.core.store.resolve_conflict(
        &p.entity_id,
        &p.source_id,
        &p.target_id,
        p.strategy,
        &ctx.agent_id(),
        ctx.params.clone(),
    )?;
    Ok(report_json(&report))
}

#[derive(Deserialize)]
struct DeleteParams {
    workspace_id: WorkspaceId,
}

pub fn delete(ctx: &Ctx<'_>) -> CoreResult<Value> {
    let p: DeleteParams = parse_params(&ctx.params)?;
    {
        let session = ctx.session.lock();
        if session.active_workspace == p.workspace_id {
            return Err(CoreError::OperationInvalid {
                reason: "cannot delete the session's active workspace".to_string(),
            });
        }
    }
    ctx.core.store.delete_workspace(&p.workspace_id)?;
    Ok(json!({ "deleted": p.workspace_id }))
}

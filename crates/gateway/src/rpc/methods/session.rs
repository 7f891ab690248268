//! `session.*` — create, resume, list, delete, fork, switchModel.

use serde_json::Value;

use sb_events::SessionFilter;

use crate::rpc::{
    opt_bool_param, opt_str_param, opt_u64_param, str_param, MethodRegistry, RequestContext,
    RpcError,
};

fn session_json(record: &sb_events::SessionRecord, active: bool) -> Value {
    let mut json = serde_json::to_value(record).unwrap_or_default();
    json["isActive"] = Value::Bool(active);
    json
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "session.create",
        &["workingDirectory"],
        |ctx: RequestContext, params: Value| async move {
            let working_directory = str_param(&params, "workingDirectory")?;
            let model = opt_str_param(&params, "model");
            let title = opt_str_param(&params, "title");
            let record = ctx
                .state
                .orchestrator
                .create_session(&working_directory, model.as_deref(), title.as_deref())
                .await?;
            Ok(session_json(&record, true))
        },
    );

    registry.register(
        "session.resume",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let active = ctx.state.orchestrator.resume(&session_id)?;
            let record = ctx
                .state
                .store
                .get_session(&session_id)?
                .ok_or_else(|| RpcError::not_found(format!("session {session_id}")))?;
            let mut json = session_json(&record, true);
            json["model"] = Value::String(active.model.read().clone());
            Ok(json)
        },
    );

    registry.register(
        "session.list",
        &[],
        |ctx: RequestContext, params: Value| async move {
            let filter = SessionFilter {
                workspace_id: opt_str_param(&params, "workspaceId"),
                include_ended: opt_bool_param(&params, "includeEnded").unwrap_or(false),
                exclude_subagents: opt_bool_param(&params, "excludeSubagents")
                    .unwrap_or(false),
                limit: opt_u64_param(&params, "limit").map(|l| l as usize),
            };
            let active_only = opt_bool_param(&params, "activeOnly").unwrap_or(false);
            let sessions = ctx.state.store.list_sessions(&filter)?;
            let rows: Vec<Value> = sessions
                .iter()
                .filter_map(|record| {
                    let active = ctx.state.orchestrator.get_active(&record.id).is_some();
                    if active_only && !active {
                        return None;
                    }
                    Some(session_json(record, active))
                })
                .collect();
            Ok(serde_json::json!({"sessions": rows}))
        },
    );

    registry.register(
        "session.delete",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let reason = opt_str_param(&params, "reason").unwrap_or_else(|| "user".into());
            ctx.state
                .orchestrator
                .delete_session(&session_id, &reason)
                .await?;
            Ok(serde_json::json!({"deleted": true}))
        },
    );

    registry.register(
        "session.fork",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let at_event_id = opt_str_param(&params, "atEventId");
            let title = opt_str_param(&params, "title");
            let record = ctx.state.orchestrator.fork(
                &session_id,
                at_event_id.as_deref(),
                title.as_deref(),
            )?;
            Ok(serde_json::json!({
                "newSessionId": record.id,
                "forkedFromSessionId": session_id,
                "forkedFromEventId": record.fork_parent_event_id,
            }))
        },
    );

    registry.register(
        "session.switchModel",
        &["sessionId", "model"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let model = str_param(&params, "model")?;
            ctx.state.orchestrator.switch_model(&session_id, &model)?;
            Ok(serde_json::json!({"model": model}))
        },
    );

    registry.register(
        "session.setPlanMode",
        &["sessionId", "enabled"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let enabled = params
                .get("enabled")
                .and_then(Value::as_bool)
                .ok_or_else(|| RpcError::invalid_params("'enabled' must be a boolean"))?;
            ctx.state.orchestrator.set_plan_mode(&session_id, enabled)?;
            Ok(serde_json::json!({"planMode": enabled}))
        },
    );
}

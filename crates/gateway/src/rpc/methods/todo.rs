//! `todo.*` — session task lists and the cross-session backlog.

use serde_json::Value;

use sb_domain::todo::TodoStatus;
use sb_events::{EventPayload, TodoWritePayload};

use crate::rpc::{opt_str_param, str_param, MethodRegistry, RequestContext, RpcError};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "todo.list",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let todos = session.todos.lock().clone();
            Ok(serde_json::json!({"todos": todos}))
        },
    );

    registry.register(
        "todo.getSummary",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let todos = session.todos.lock().clone();
            let count = |status: TodoStatus| {
                todos.iter().filter(|t| t.status == status).count()
            };
            Ok(serde_json::json!({
                "total": todos.len(),
                "pending": count(TodoStatus::Pending),
                "inProgress": count(TodoStatus::InProgress),
                "completed": count(TodoStatus::Completed),
            }))
        },
    );

    registry.register(
        "todo.getBacklog",
        &[],
        |ctx: RequestContext, params: Value| async move {
            let workspace_id = opt_str_param(&params, "workspaceId");
            let entries = ctx.state.store.get_backlog(workspace_id.as_deref())?;
            let rows: Vec<Value> = entries
                .into_iter()
                .map(|(id, entry)| {
                    let mut json = serde_json::to_value(&entry).unwrap_or_default();
                    json["backlogId"] = Value::String(id);
                    json
                })
                .collect();
            Ok(serde_json::json!({"backlog": rows}))
        },
    );

    registry.register(
        "todo.getBacklogCount",
        &[],
        |ctx: RequestContext, params: Value| async move {
            let workspace_id = opt_str_param(&params, "workspaceId");
            let count = ctx.state.store.backlog_count(workspace_id.as_deref())?;
            Ok(serde_json::json!({"count": count}))
        },
    );

    registry.register(
        "todo.restore",
        &["sessionId", "backlogIds"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let ids: Vec<String> = params
                .get("backlogIds")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .ok_or_else(|| {
                    RpcError::invalid_params("'backlogIds' must be an array of strings")
                })?;

            let session = ctx.state.orchestrator.resume(&session_id)?;
            let restored = ctx.state.store.restore_backlog(&ids, &session_id)?;

            let todos = {
                let mut current = session.todos.lock();
                current.extend(restored.iter().cloned());
                current.clone()
            };
            ctx.state.store.append(
                &session_id,
                EventPayload::TodoWrite(TodoWritePayload {
                    todos: todos.clone(),
                }),
            )?;
            Ok(serde_json::json!({
                "restored": restored.len(),
                "todos": todos,
            }))
        },
    );
}

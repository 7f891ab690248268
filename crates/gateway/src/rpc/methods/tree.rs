//! `tree.*` — DAG visualization over the event store.

use serde_json::Value;

use sb_events::SubtreeDirection;

use crate::rpc::{opt_str_param, opt_u64_param, str_param, MethodRegistry, RequestContext, RpcError};

fn parse_direction(params: &Value) -> Result<SubtreeDirection, RpcError> {
    match opt_str_param(params, "direction").as_deref() {
        None | Some("both") => Ok(SubtreeDirection::Both),
        Some("ancestors") => Ok(SubtreeDirection::Ancestors),
        Some("descendants") => Ok(SubtreeDirection::Descendants),
        Some(other) => Err(RpcError::invalid_params(format!(
            "direction must be ancestors|descendants|both, got '{other}'"
        ))),
    }
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "tree.getVisualization",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let max_depth = opt_u64_param(&params, "maxDepth").unwrap_or(100) as u32;
            let record = ctx
                .state
                .store
                .get_session(&session_id)?
                .ok_or_else(|| RpcError::not_found(format!("session {session_id}")))?;
            let Some(head) = record.head_event_id else {
                return Ok(serde_json::json!({"nodes": [], "branches": []}));
            };
            let nodes = ctx
                .state
                .store
                .get_subtree(&head, max_depth, SubtreeDirection::Ancestors)?;
            let branches = ctx.state.store.get_branches(&session_id)?;
            Ok(serde_json::json!({
                "nodes": nodes,
                "branches": branches,
            }))
        },
    );

    registry.register(
        "tree.getBranches",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let branches = ctx.state.store.get_branches(&session_id)?;
            Ok(serde_json::json!({"branches": branches}))
        },
    );

    registry.register(
        "tree.getSubtree",
        &["eventId"],
        |ctx: RequestContext, params: Value| async move {
            let event_id = str_param(&params, "eventId")?;
            let max_depth = opt_u64_param(&params, "maxDepth").unwrap_or(10) as u32;
            let direction = parse_direction(&params)?;
            let nodes = ctx
                .state
                .store
                .get_subtree(&event_id, max_depth, direction)?;
            Ok(serde_json::json!({"nodes": nodes}))
        },
    );

    registry.register(
        "tree.getAncestors",
        &["eventId"],
        |ctx: RequestContext, params: Value| async move {
            let event_id = str_param(&params, "eventId")?;
            let ancestors = ctx.state.store.get_ancestors(&event_id)?;
            let events: Vec<Value> = ancestors.iter().map(|e| e.to_wire()).collect();
            Ok(serde_json::json!({"events": events}))
        },
    );
}

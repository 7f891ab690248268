//! `search.*` — content index queries.

use serde_json::Value;
use std::str::FromStr;

use sb_events::{EventType, SearchOptions};

use crate::rpc::{opt_str_param, opt_u64_param, str_param, MethodRegistry, RequestContext, RpcError};

fn options_from(params: &Value) -> Result<SearchOptions, RpcError> {
    let types = match params.get("types").and_then(Value::as_array) {
        Some(raw) => {
            let mut types = Vec::new();
            for value in raw {
                let s = value.as_str().ok_or_else(|| {
                    RpcError::invalid_params("'types' must be an array of strings")
                })?;
                types.push(EventType::from_str(s).map_err(RpcError::invalid_params)?);
            }
            Some(types)
        }
        None => None,
    };
    Ok(SearchOptions {
        session_id: opt_str_param(params, "sessionId"),
        workspace_id: opt_str_param(params, "workspaceId"),
        types,
        limit: opt_u64_param(params, "limit").map(|l| l as usize),
    })
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "search.content",
        &["query"],
        |ctx: RequestContext, params: Value| async move {
            let query = str_param(&params, "query")?;
            let options = options_from(&params)?;
            let results = ctx.state.store.search(&query, &options)?;
            Ok(serde_json::json!({"results": results}))
        },
    );

    registry.register(
        "search.events",
        &["query"],
        |ctx: RequestContext, params: Value| async move {
            let query = str_param(&params, "query")?;
            let options = options_from(&params)?;
            let results = ctx.state.store.search(&query, &options)?;
            // Same index; this surface also hydrates the full events.
            let mut events = Vec::new();
            for hit in &results {
                if let Some(event) = ctx.state.store.get_event(&hit.event_id)? {
                    events.push(event.to_wire());
                }
            }
            Ok(serde_json::json!({"results": results, "events": events}))
        },
    );
}

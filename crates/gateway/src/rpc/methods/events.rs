//! `events.*` — history, sync cursor, raw append, subscribe.

use serde_json::Value;
use std::str::FromStr;

use sb_events::{EventPayload, EventType, HistoryOptions};

use crate::rpc::{
    opt_bool_param, opt_str_param, opt_u64_param, str_param, MethodRegistry, RequestContext,
    RpcError,
};

fn parse_types(params: &Value) -> Result<Option<Vec<EventType>>, RpcError> {
    let Some(raw) = params.get("types").and_then(Value::as_array) else {
        return Ok(None);
    };
    let mut types = Vec::new();
    for value in raw {
        let s = value
            .as_str()
            .ok_or_else(|| RpcError::invalid_params("'types' must be an array of strings"))?;
        let ty = EventType::from_str(s).map_err(RpcError::invalid_params)?;
        types.push(ty);
    }
    Ok(Some(types))
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "events.getHistory",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let opts = HistoryOptions {
                types: parse_types(&params)?,
                limit: opt_u64_param(&params, "limit").map(|l| l as usize),
                before_event_id: opt_str_param(&params, "beforeEventId"),
                chronological: opt_bool_param(&params, "chronological").unwrap_or(false),
            };
            let page = ctx.state.store.get_history(&session_id, &opts)?;
            let events: Vec<Value> = page.events.iter().map(|e| e.to_wire()).collect();
            Ok(serde_json::json!({
                "events": events,
                "hasMore": page.has_more,
                "oldestId": page.oldest_id,
            }))
        },
    );

    registry.register(
        "events.getSince",
        &[],
        |ctx: RequestContext, params: Value| async move {
            let cursor = opt_str_param(&params, "cursor");
            let session_id = opt_str_param(&params, "sessionId");
            let limit = opt_u64_param(&params, "limit").unwrap_or(200) as usize;
            let page = ctx.state.store.get_since(
                cursor.as_deref(),
                session_id.as_deref(),
                limit,
            )?;
            let events: Vec<Value> = page.events.iter().map(|e| e.to_wire()).collect();
            Ok(serde_json::json!({
                "events": events,
                "nextCursor": page.next_cursor,
                "hasMore": page.has_more,
            }))
        },
    );

    registry.register(
        "events.append",
        &["sessionId", "type", "payload"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let type_str = str_param(&params, "type")?;
            let event_type =
                EventType::from_str(&type_str).map_err(RpcError::invalid_params)?;
            let payload_value = params.get("payload").cloned().unwrap_or(Value::Null);
            let payload = EventPayload::from_parts(event_type, payload_value)
                .map_err(|e| RpcError::invalid_params(e.to_string()))?;

            // An explicit expected head makes the append CAS-checked;
            // a Conflict tells the caller to re-read and retry.
            let event = match opt_str_param(&params, "expectedHeadId") {
                Some(expected) => ctx.state.store.append_after(
                    &session_id,
                    Some(expected.as_str()),
                    payload,
                )?,
                None => ctx.state.store.append(&session_id, payload)?,
            };
            Ok(event.to_wire())
        },
    );

    registry.register(
        "events.subscribe",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            // Materialize the session so its bus exists.
            ctx.state.orchestrator.resume(&session_id)?;
            let subscribed = ctx.client.subscribe(&ctx.state, &session_id);
            Ok(serde_json::json!({"subscribed": subscribed}))
        },
    );

    registry.register(
        "events.unsubscribe",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let removed = ctx.client.unsubscribe(&session_id);
            Ok(serde_json::json!({"unsubscribed": removed}))
        },
    );
}

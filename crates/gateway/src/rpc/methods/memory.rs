//! `memory.*` — the stubbed memory surface.
//!
//! Adapters return empty results; the interface stays intact for a
//! future backend.

use serde_json::Value;

use crate::rpc::{opt_str_param, opt_u64_param, str_param, MethodRegistry, RequestContext};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "memory.search",
        &["query"],
        |ctx: RequestContext, params: Value| async move {
            let query = str_param(&params, "query")?;
            let limit = opt_u64_param(&params, "limit").unwrap_or(10) as usize;
            Ok(serde_json::json!({
                "results": ctx.state.memory.search(&query, limit),
            }))
        },
    );

    registry.register(
        "memory.addEntry",
        &["content"],
        |ctx: RequestContext, params: Value| async move {
            let content = str_param(&params, "content")?;
            let entry_id = ctx
                .state
                .memory
                .add_entry(&content, params.get("metadata"));
            Ok(serde_json::json!({"entryId": entry_id}))
        },
    );

    registry.register(
        "memory.getHandoffs",
        &[],
        |ctx: RequestContext, params: Value| async move {
            let session_id = opt_str_param(&params, "sessionId");
            Ok(serde_json::json!({
                "handoffs": ctx.state.memory.get_handoffs(session_id.as_deref()),
            }))
        },
    );
}

//! `agent.*` — prompt, abort, getState.
//!
//! `agent.prompt` is acknowledged as soon as the prompt lands on the
//! session's single-writer queue; the authoritative failure signal for a
//! turn is the `turn.failed` event, never this response.

use serde_json::Value;
use std::sync::atomic::Ordering;

use sb_domain::message::ContentBlock;

use crate::rpc::{str_param, MethodRegistry, RequestContext};
use crate::runtime::turn;

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "agent.prompt",
        &["sessionId", "text"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let text = str_param(&params, "text")?;
            let attachments: Vec<ContentBlock> = params
                .get("attachments")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| {
                    crate::rpc::RpcError::invalid_params(format!("attachments: {e}"))
                })?
                .unwrap_or_default();

            ctx.state
                .orchestrator
                .prompt(&session_id, text, attachments)
                .await?;
            Ok(serde_json::json!({"queued": true}))
        },
    );

    registry.register(
        "agent.abort",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let fired = ctx.state.orchestrator.abort(&session_id)?;
            Ok(serde_json::json!({"aborted": fired}))
        },
    );

    registry.register(
        "agent.getState",
        &["sessionId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let session = ctx.state.orchestrator.resume(&session_id)?;
            let messages =
                turn::reconstruct(ctx.state.orchestrator.deps(), &session_id)?;
            Ok(serde_json::json!({
                "sessionId": session_id,
                "isRunning": session.running.load(Ordering::SeqCst),
                "turn": session.turn.load(Ordering::SeqCst),
                "model": session.model.read().clone(),
                "planMode": session.plan_mode.load(Ordering::SeqCst),
                "messageCount": messages.len(),
                "subscriberCount": session.bus.subscriber_count(),
            }))
        },
    );
}

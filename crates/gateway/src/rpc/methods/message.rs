//! `message.delete` — soft delete by appending a tombstone.

use serde_json::Value;

use crate::rpc::{opt_str_param, str_param, MethodRegistry, RequestContext};

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "message.delete",
        &["sessionId", "targetEventId"],
        |ctx: RequestContext, params: Value| async move {
            let session_id = str_param(&params, "sessionId")?;
            let target_event_id = str_param(&params, "targetEventId")?;
            let reason = opt_str_param(&params, "reason");
            let event = ctx.state.store.delete_message(
                &session_id,
                &target_event_id,
                reason.as_deref(),
            )?;
            Ok(event.to_wire())
        },
    );
}

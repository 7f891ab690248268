//! `system.*` and `client.*` — liveness, server info, client identity.

use serde_json::Value;

use crate::rpc::{opt_str_param, str_param, MethodRegistry, RequestContext};
use crate::ws::ClientIdentity;

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "system.ping",
        &[],
        |_ctx: RequestContext, _params: Value| async move {
            Ok(serde_json::json!({
                "pong": true,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }))
        },
    );

    registry.register(
        "system.getInfo",
        &[],
        |ctx: RequestContext, _params: Value| async move {
            Ok(serde_json::json!({
                "name": "switchboard",
                "version": env!("CARGO_PKG_VERSION"),
                "uptimeSecs": ctx.state.started_at.elapsed().as_secs(),
                "activeSessions": ctx.state.orchestrator.active_count(),
                "connectedClients": ctx.state.clients.count(),
            }))
        },
    );

    registry.register(
        "client.identify",
        &["name"],
        |ctx: RequestContext, params: Value| async move {
            let identity = ClientIdentity {
                name: str_param(&params, "name")?,
                kind: opt_str_param(&params, "kind").unwrap_or_else(|| "unknown".into()),
                version: opt_str_param(&params, "version").unwrap_or_default(),
            };
            *ctx.client.identity.lock() = Some(identity);
            Ok(serde_json::json!({"clientId": ctx.client.client_id}))
        },
    );

    registry.register(
        "client.list",
        &[],
        |ctx: RequestContext, _params: Value| async move {
            Ok(serde_json::json!({"clients": ctx.state.clients.list()}))
        },
    );
}

//! Methods whose backends are external collaborators this server does
//! not bundle: speech transcription, the container sandbox, and
//! client-executed tool completion. All answer `NOT_AVAILABLE` so
//! clients can feature-detect.

use serde_json::Value;

use crate::rpc::{MethodRegistry, RequestContext, RpcError};

fn unavailable(what: &'static str) -> RpcError {
    RpcError::not_available(format!("{what} is not configured on this server"))
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(
        "transcribe.audio",
        &["audio"],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("speech transcription"))
        },
    );
    registry.register(
        "transcribe.listModels",
        &[],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("speech transcription"))
        },
    );

    registry.register(
        "sandbox.listContainers",
        &[],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("the container sandbox"))
        },
    );
    registry.register(
        "sandbox.stopContainer",
        &["containerId"],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("the container sandbox"))
        },
    );
    registry.register(
        "sandbox.startContainer",
        &["containerId"],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("the container sandbox"))
        },
    );
    registry.register(
        "sandbox.killContainer",
        &["containerId"],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("the container sandbox"))
        },
    );

    registry.register(
        "tool.result",
        &["toolCallId"],
        |_ctx: RequestContext, _params: Value| async move {
            Err(unavailable("client-executed tools"))
        },
    );
}

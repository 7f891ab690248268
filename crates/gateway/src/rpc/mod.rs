//! The JSON-RPC surface: typed method registry, declarative parameter
//! validation, and the error taxonomy mapping.
//!
//! Every method is registered by name with its required top-level
//! parameters; validation runs before dispatch, so handlers see
//! well-formed input or nothing. Unknown method → `NOT_FOUND`, missing
//! parameter → `INVALID_PARAMS` — only validation and not-found surface
//! directly at this boundary, everything else arrives via events.

pub mod methods;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sb_domain::error::{Error, ErrorCode};

use crate::state::AppState;
use crate::ws::ClientConnection;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub id: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: Value, error: RpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcErrorBody {
                code: error.code,
                message: error.message,
                details: error.details,
            }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotAvailable, message)
    }
}

impl From<Error> for RpcError {
    fn from(error: Error) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

impl From<sb_events::StoreError> for RpcError {
    fn from(error: sb_events::StoreError) -> Self {
        RpcError::from(Error::from(error))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-request context handed to handlers.
#[derive(Clone)]
pub struct RequestContext {
    pub state: AppState,
    pub client: Arc<ClientConnection>,
}

pub type MethodResult = Result<Value, RpcError>;
pub type Handler =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, MethodResult> + Send + Sync>;

struct Method {
    required: &'static [&'static str],
    handler: Handler,
}

#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<&'static str, Method>,
}

impl MethodRegistry {
    /// Build the full registry (every namespace from the protocol).
    pub fn build() -> Self {
        let mut registry = Self::default();
        methods::register_all(&mut registry);
        registry
    }

    pub fn register<F, Fut>(
        &mut self,
        name: &'static str,
        required: &'static [&'static str],
        handler: F,
    ) where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MethodResult> + Send + 'static,
    {
        let previous = self.methods.insert(
            name,
            Method {
                required,
                handler: Arc::new(move |ctx, params| Box::pin(handler(ctx, params))),
            },
        );
        debug_assert!(previous.is_none(), "duplicate method registration: {name}");
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Validate declaratively, then dispatch.
    pub async fn dispatch(&self, ctx: RequestContext, request: RpcRequest) -> RpcResponse {
        let Some(method) = self.methods.get(request.method.as_str()) else {
            return RpcResponse::fail(
                request.id,
                RpcError::not_found(format!("unknown method '{}'", request.method)),
            );
        };

        for key in method.required {
            let present = request
                .params
                .get(key)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                return RpcResponse::fail(
                    request.id,
                    RpcError::invalid_params(format!(
                        "method '{}' requires parameter '{key}'",
                        request.method
                    )),
                );
            }
        }

        let span = tracing::debug_span!("rpc", method = %request.method);
        let _guard = span.enter();
        match (method.handler)(ctx, request.params).await {
            Ok(result) => RpcResponse::ok(request.id, result),
            Err(error) => {
                tracing::debug!(
                    method = %request.method,
                    code = error.code.as_str(),
                    message = %error.message,
                    "rpc error"
                );
                RpcResponse::fail(request.id, error)
            }
        }
    }
}

// ── Param extraction helpers ───────────────────────────────────────

pub fn str_param(params: &Value, key: &str) -> Result<String, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RpcError::invalid_params(format!("'{key}' must be a string")))
}

pub fn opt_str_param(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_owned)
}

pub fn opt_u64_param(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

pub fn opt_bool_param(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_helpers() {
        let params = serde_json::json!({"a": "x", "n": 7, "b": true});
        assert_eq!(str_param(&params, "a").unwrap(), "x");
        assert!(str_param(&params, "n").is_err());
        assert_eq!(opt_u64_param(&params, "n"), Some(7));
        assert_eq!(opt_bool_param(&params, "b"), Some(true));
        assert_eq!(opt_str_param(&params, "missing"), None);
    }

    #[test]
    fn response_shapes() {
        let ok = RpcResponse::ok(serde_json::json!(1), serde_json::json!({"x": 1}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());

        let fail = RpcResponse::fail(
            serde_json::json!(2),
            RpcError::not_found("missing thing"),
        );
        let json = serde_json::to_value(&fail).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }
}

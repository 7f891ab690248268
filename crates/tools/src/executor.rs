//! The tool executor: argument validation, timeout enforcement, denial,
//! and duration capture.
//!
//! Timeout and cancellation are distinct paths: a timeout yields
//! `details.timedOut`, a fired cancellation token yields
//! `details.interrupted` (with partial output where the tool captured
//! any). A tool returning `is_error` never fails the turn — the error
//! text goes back to the model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use sb_domain::config::ToolsConfig;
use sb_domain::tool::ToolResult;

use crate::registry::{DenialPolicy, ToolRegistry};
use crate::ToolContext;

/// A finished tool invocation, ready to be persisted as `tool.result`.
#[derive(Debug, Clone)]
pub struct ExecutedTool {
    pub result: ToolResult,
    pub duration_ms: u64,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ToolsConfig,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: ToolsConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    /// Run one tool call to completion, whatever happens.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        policy: &DenialPolicy,
        ctx: &ToolContext,
    ) -> ExecutedTool {
        let started = Instant::now();

        if let Some(reason) = policy.check(tool_name, args) {
            tracing::info!(tool = tool_name, reason, "tool call denied");
            return ExecutedTool {
                result: ToolResult::error(reason)
                    .with_details(serde_json::json!({"denied": true})),
                duration_ms: 0,
            };
        }

        let Some(tool) = self.registry.get(tool_name) else {
            return ExecutedTool {
                result: ToolResult::error(format!("unknown tool '{tool_name}'")),
                duration_ms: 0,
            };
        };

        if let Err(problem) = validate_args(&tool.parameters(), args) {
            return ExecutedTool {
                result: ToolResult::error(format!(
                    "invalid arguments for '{tool_name}': {problem}"
                )),
                duration_ms: 0,
            };
        }

        let timeout_ms = tool.timeout_ms().unwrap_or(self.config.default_timeout_ms);
        let result = tokio::select! {
            result = tool.execute(args.clone(), ctx) => match result {
                Ok(result) => result,
                Err(e) if ctx.cancellation.is_cancelled() => {
                    ToolResult::interrupted(Some(e.to_string()))
                }
                Err(e) => ToolResult::error(format!("tool '{tool_name}' failed: {e}")),
            },
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                tracing::warn!(tool = tool_name, timeout_ms, "tool timed out");
                ToolResult::timed_out(timeout_ms)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            tool = tool_name,
            duration_ms,
            is_error = result.is_error,
            "tool finished"
        );
        ExecutedTool {
            result,
            duration_ms,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check `args` against a JSON-Schema-like `parameters` object: required
/// keys present, declared property types respected.
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err("arguments must be an object".into());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(key) {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args_obj {
            let Some(declared) = properties.get(key) else {
                continue;
            };
            let Some(expected) = declared.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!(
                    "parameter '{key}' should be {expected}, got {}",
                    type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tool;
    use tokio_util::sync::CancellationToken;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo back the input"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "count": {"type": "integer"},
                },
                "required": ["text"],
            })
        }
        async fn execute(
            &self,
            args: Value,
            _ctx: &ToolContext,
        ) -> sb_domain::error::Result<ToolResult> {
            Ok(ToolResult::ok(
                args.get("text").and_then(Value::as_str).unwrap_or(""),
            ))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn timeout_ms(&self) -> Option<u64> {
            Some(50)
        }
        async fn execute(
            &self,
            _args: Value,
            ctx: &ToolContext,
        ) -> sb_domain::error::Result<ToolResult> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                _ = ctx.cancellation.cancelled() => {
                    return Ok(ToolResult::interrupted(Some("partial".into())));
                }
            }
            Ok(ToolResult::ok("never"))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SlowTool));
        ToolExecutor::new(Arc::new(registry), ToolsConfig::default())
    }

    fn ctx() -> ToolContext {
        ToolContext {
            tool_call_id: "c1".into(),
            session_id: "s1".into(),
            working_directory: "/tmp".into(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn happy_path_with_duration() {
        let executed = executor()
            .execute(
                "echo",
                &serde_json::json!({"text": "hi"}),
                &DenialPolicy::default(),
                &ctx(),
            )
            .await;
        assert!(!executed.result.is_error);
        assert_eq!(executed.result.content, "hi");
    }

    #[tokio::test]
    async fn missing_required_arg_is_an_error_result() {
        let executed = executor()
            .execute("echo", &serde_json::json!({}), &DenialPolicy::default(), &ctx())
            .await;
        assert!(executed.result.is_error);
        assert!(executed.result.content.contains("missing required"));
    }

    #[tokio::test]
    async fn wrong_type_is_an_error_result() {
        let executed = executor()
            .execute(
                "echo",
                &serde_json::json!({"text": "x", "count": "three"}),
                &DenialPolicy::default(),
                &ctx(),
            )
            .await;
        assert!(executed.result.is_error);
        assert!(executed.result.content.contains("should be integer"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let executed = executor()
            .execute("ghost", &serde_json::json!({}), &DenialPolicy::default(), &ctx())
            .await;
        assert!(executed.result.is_error);
        assert!(executed.result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn timeout_sets_timed_out_detail() {
        let executed = executor()
            .execute("slow", &serde_json::json!({}), &DenialPolicy::default(), &ctx())
            .await;
        assert!(executed.result.is_error);
        let details = executed.result.details.unwrap();
        assert_eq!(details["timedOut"], true);
        assert!(details.get("interrupted").is_none());
    }

    #[tokio::test]
    async fn cancellation_sets_interrupted_detail() {
        let context = ctx();
        let cancel = context.cancellation.clone();
        let exec = executor();
        let task = tokio::spawn(async move {
            exec.execute("slow", &serde_json::json!({}), &DenialPolicy::default(), &context)
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let executed = task.await.unwrap();
        assert!(executed.result.is_error);
        let details = executed.result.details.unwrap();
        assert_eq!(details["interrupted"], true);
    }

    #[tokio::test]
    async fn denied_call_never_executes() {
        let mut policy = DenialPolicy::default();
        policy.deny_tools(&["echo".into()]);
        let executed = executor()
            .execute("echo", &serde_json::json!({"text": "hi"}), &policy, &ctx())
            .await;
        assert!(executed.result.is_error);
        assert_eq!(executed.result.details.unwrap()["denied"], true);
    }
}

use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// The uniform result shape every tool produces.
///
/// `details` is an opaque structured field whose schema is tool-specific;
/// only the consumer that produced it parses it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// When true the agent turn loop terminates after this result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stop_turn: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Result for a tool interrupted by cancellation, preserving any
    /// partial output.
    pub fn interrupted(partial: Option<String>) -> Self {
        let mut details = serde_json::json!({ "interrupted": true });
        if let Some(ref p) = partial {
            details["partialContent"] = serde_json::Value::String(p.clone());
        }
        Self {
            content: "tool execution interrupted".into(),
            is_error: true,
            details: Some(details),
            stop_turn: false,
        }
    }

    /// Result for a tool that exceeded its timeout.
    pub fn timed_out(timeout_ms: u64) -> Self {
        Self {
            content: format!("tool execution timed out after {timeout_ms}ms"),
            is_error: true,
            details: Some(serde_json::json!({ "timedOut": true })),
            stop_turn: false,
        }
    }
}

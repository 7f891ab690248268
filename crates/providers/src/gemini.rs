//! Google Gemini adapter (streamed `generateContent` dialect).
//!
//! Function calls arrive whole (no argument streaming) and carry no ids,
//! so the adapter mints per-turn synthetic ids. Usage reports full
//! context with no cache accounting.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_domain::config::{ProviderConfig, RetryConfig};
use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentBlock, Message, Role};
use sb_domain::stream::{BoxStream, StreamEvent};
use sb_domain::tokens::RawTokenCounts;
use sb_domain::tool::ToolDefinition;

use crate::retry::with_retry;
use crate::sse::sse_event_stream;
use crate::traits::{
    normalize_stop_reason, with_cancellation, Provider, ProviderRequest, ToolIdFormat,
    UsageSemantics,
};
use crate::util::{from_reqwest, from_status, resolve_api_key};

pub struct GeminiProvider {
    id: String,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn from_config(cfg: &ProviderConfig, retry: RetryConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let base_url = if cfg.base_url.is_empty() {
            "https://generativelanguage.googleapis.com/v1beta".to_owned()
        } else {
            cfg.base_url.trim_end_matches('/').to_owned()
        };
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: cfg.id.clone(),
            base_url,
            api_key,
            retry,
            client,
        })
    }

    fn build_body(&self, req: &ProviderRequest) -> Value {
        // Gemini addresses function responses by name, not id.
        let call_names = tool_call_names(&req.messages);

        let mut contents: Vec<Value> = Vec::new();
        for msg in &req.messages {
            match msg.role {
                Role::System | Role::User => {
                    let mut parts: Vec<Value> = Vec::new();
                    for block in &msg.content {
                        match block {
                            ContentBlock::Text { text } => {
                                parts.push(serde_json::json!({"text": text}));
                            }
                            ContentBlock::Image { data, mime_type } => {
                                parts.push(serde_json::json!({
                                    "inline_data": {"mime_type": mime_type, "data": data},
                                }));
                            }
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => {
                                let name = call_names
                                    .get(tool_use_id.as_str())
                                    .cloned()
                                    .unwrap_or_else(|| "unknown".to_owned());
                                parts.push(serde_json::json!({
                                    "function_response": {
                                        "name": name,
                                        "response": {"content": content},
                                    },
                                }));
                            }
                            _ => {}
                        }
                    }
                    if !parts.is_empty() {
                        contents.push(serde_json::json!({"role": "user", "parts": parts}));
                    }
                }
                Role::Assistant => {
                    let mut parts: Vec<Value> = Vec::new();
                    for block in &msg.content {
                        match block {
                            ContentBlock::Text { text } => {
                                parts.push(serde_json::json!({"text": text}));
                            }
                            ContentBlock::ToolUse { name, input, .. } => {
                                parts.push(serde_json::json!({
                                    "function_call": {"name": name, "args": input},
                                }));
                            }
                            _ => {}
                        }
                    }
                    if !parts.is_empty() {
                        contents.push(serde_json::json!({"role": "model", "parts": parts}));
                    }
                }
            }
        }

        let mut body = serde_json::json!({"contents": contents});

        let system_text: Vec<&str> = req
            .system_parts
            .iter()
            .filter(|p| !p.text.is_empty())
            .map(|p| p.text.as_str())
            .collect();
        if !system_text.is_empty() {
            body["system_instruction"] = serde_json::json!({
                "parts": [{"text": system_text.join("\n\n")}],
            });
        }

        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req.tools.iter().map(tool_to_api).collect();
            body["tools"] = serde_json::json!([{"function_declarations": declarations}]);
        }

        let mut generation: serde_json::Map<String, Value> = Default::default();
        if let Some(temp) = req.temperature {
            generation.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.max_output {
            generation.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if !req.stop_sequences.is_empty() {
            generation.insert("stopSequences".into(), serde_json::json!(req.stop_sequences));
        }
        if !generation.is_empty() {
            body["generation_config"] = Value::Object(generation);
        }

        body
    }
}

/// Map tool-call ids → function names from prior assistant turns.
fn tool_call_names(messages: &[Message]) -> std::collections::HashMap<&str, String> {
    let mut map = std::collections::HashMap::new();
    for msg in messages {
        for block in &msg.content {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                map.insert(id.as_str(), name.clone());
            }
        }
    }
    map
}

fn tool_to_api(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamState {
    usage: Option<RawTokenCounts>,
    text_open: bool,
    call_counter: u32,
}

fn parse_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    if let Some(usage) = v.get("usageMetadata") {
        let input = usage
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output = usage
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if input > 0 || output > 0 {
            state.usage = Some(RawTokenCounts {
                input_tokens: input,
                output_tokens: output,
                ..Default::default()
            });
        }
    }

    let Some(candidate) = v.get("candidates").and_then(|c| c.get(0)) else {
        return events;
    };

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    if !state.text_open {
                        state.text_open = true;
                        events.push(Ok(StreamEvent::TextStart));
                    }
                    events.push(Ok(StreamEvent::TextDelta {
                        text: text.to_owned(),
                    }));
                }
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned();
                let args = call.get("args").cloned().unwrap_or(Value::Null);
                state.call_counter += 1;
                let call_id = format!("fc_{:04}", state.call_counter);
                if state.text_open {
                    state.text_open = false;
                    events.push(Ok(StreamEvent::TextEnd));
                }
                events.push(Ok(StreamEvent::ToolCallStart {
                    call_id: call_id.clone(),
                    tool_name: name,
                }));
                // Arguments arrive whole; emit them as one delta.
                events.push(Ok(StreamEvent::ToolCallDelta {
                    call_id,
                    delta: args.to_string(),
                }));
            }
        }
    }

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        if state.text_open {
            state.text_open = false;
            events.push(Ok(StreamEvent::TextEnd));
        }
        let stop_reason = if state.call_counter > 0 && reason == "STOP" {
            normalize_stop_reason("tool_use")
        } else {
            normalize_stop_reason(reason)
        };
        events.push(Ok(StreamEvent::Done {
            stop_reason,
            usage: state.usage,
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn usage_semantics(&self) -> UsageSemantics {
        UsageSemantics::NoCacheAccounting
    }

    fn tool_id_format(&self) -> ToolIdFormat {
        ToolIdFormat::Gemini
    }

    fn context_window(&self, _model: &str) -> u64 {
        1_000_000
    }

    async fn stream(
        &self,
        req: &ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, req.model
        );

        let response = with_retry(&self.retry, || {
            let request = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body);
            let provider = self.id.clone();
            async move {
                let response = request.send().await.map_err(from_reqwest)?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(from_status(&provider, status, &text));
                }
                Ok(response)
            }
        })
        .await?;

        let mut state = StreamState {
            usage: None,
            text_open: false,
            call_counter: 0,
        };
        let stream = sse_event_stream(response, move |frame| parse_sse(&frame.data, &mut state));
        Ok(with_cancellation(stream, cancel))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_state() -> StreamState {
        StreamState {
            usage: None,
            text_open: false,
            call_counter: 0,
        }
    }

    fn drive(state: &mut StreamState, data: &str) -> Vec<StreamEvent> {
        parse_sse(data, state)
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn text_and_finish() {
        let mut state = fresh_state();
        let mut all = Vec::new();
        all.extend(drive(
            &mut state,
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}]}}]}"#,
        ));
        all.extend(drive(
            &mut state,
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":40,"candidatesTokenCount":3}}"#,
        ));
        assert!(matches!(all[0], StreamEvent::TextStart));
        assert!(matches!(all[1], StreamEvent::TextDelta { ref text } if text == "Hello"));
        assert!(matches!(all[2], StreamEvent::TextEnd));
        match &all[3] {
            StreamEvent::Done { usage, .. } => {
                let usage = usage.unwrap();
                assert_eq!(usage.input_tokens, 40);
                assert_eq!(usage.cache_read_tokens, 0);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn function_call_gets_synthetic_id_and_full_args() {
        let mut state = fresh_state();
        let events = drive(
            &mut state,
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"bash","args":{"command":"ls"}}}]}}]}"#,
        );
        assert!(matches!(
            &events[0],
            StreamEvent::ToolCallStart { call_id, tool_name }
                if call_id == "fc_0001" && tool_name == "bash"
        ));
        assert!(matches!(
            &events[1],
            StreamEvent::ToolCallDelta { delta, .. } if delta.contains("command")
        ));
    }

    #[test]
    fn stop_after_function_call_normalizes_to_tool_use() {
        let mut state = fresh_state();
        drive(
            &mut state,
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"bash","args":{}}}]}}]}"#,
        );
        let done = drive(
            &mut state,
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}]}"#,
        );
        assert!(matches!(
            done.last().unwrap(),
            StreamEvent::Done { stop_reason, .. }
                if *stop_reason == sb_domain::stream::StopReason::ToolUse
        ));
    }

    #[test]
    fn function_responses_are_addressed_by_name() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: vec![ContentBlock::ToolUse {
                    id: "fc_0001".into(),
                    name: "read_file".into(),
                    input: serde_json::json!({"path": "x"}),
                }],
            },
            Message::tool_result("fc_0001", "contents", false),
        ];
        let names = tool_call_names(&messages);
        assert_eq!(names.get("fc_0001").map(String::as_str), Some("read_file"));
    }
}

//! OpenAI-compatible adapter (chat completions dialect).
//!
//! Covers OpenAI itself plus the long tail of compatible backends. Tool
//! calls arrive as indexed fragments in `choices[].delta.tool_calls`;
//! usage arrives in a trailing chunk when `stream_options.include_usage`
//! is set and reports the FULL context sent, so the normalizer derives
//! per-turn input as a delta against the previous turn.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_domain::config::{ProviderConfig, RetryConfig};
use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentBlock, Message, Role};
use sb_domain::stream::{BoxStream, StopReason, StreamEvent};
use sb_domain::tokens::RawTokenCounts;
use sb_domain::tool::ToolDefinition;

use crate::remap::IdRemap;
use crate::retry::with_retry;
use crate::sse::sse_event_stream;
use crate::traits::{
    normalize_stop_reason, with_cancellation, Provider, ProviderRequest, ToolIdFormat,
    UsageSemantics,
};
use crate::util::{from_reqwest, from_status, resolve_api_key};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig, retry: RetryConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let base_url = if cfg.base_url.is_empty() {
            "https://api.openai.com/v1".to_owned()
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

    fn build_body(&self, req: &ProviderRequest, remap: &IdRemap) -> Value {
        let mut messages = req.messages.clone();
        remap.apply_to_messages(&mut messages);

        let mut api_messages: Vec<Value> = Vec::new();

        // All system parts collapse into one leading system message; this
        // dialect has no cache grouping.
        let system_text: Vec<&str> = req
            .system_parts
            .iter()
            .filter(|p| !p.text.is_empty())
            .map(|p| p.text.as_str())
            .collect();
        if !system_text.is_empty() {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": system_text.join("\n\n"),
            }));
        }

        for msg in &messages {
            project_message(msg, &mut api_messages);
        }

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": api_messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_api).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_output {
            body["max_tokens"] = serde_json::json!(max);
        }
        if !req.stop_sequences.is_empty() {
            body["stop"] = serde_json::json!(req.stop_sequences);
        }
        if let Some(ref level) = req.reasoning_level {
            body["reasoning_effort"] = serde_json::json!(level);
        }
        body
    }
}

fn project_message(msg: &Message, out: &mut Vec<Value>) {
    match msg.role {
        Role::System => {
            out.push(serde_json::json!({"role": "system", "content": msg.text()}));
        }
        Role::User => {
            // Tool results become their own `tool` role messages; the rest
            // folds into a user message.
            let mut text_parts: Vec<&str> = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        out.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    }
                    ContentBlock::Image { data, mime_type } => {
                        out.push(serde_json::json!({
                            "role": "user",
                            "content": [{
                                "type": "image_url",
                                "image_url": {"url": format!("data:{mime_type};base64,{data}")},
                            }],
                        }));
                    }
                    _ => {}
                }
            }
            if !text_parts.is_empty() {
                out.push(serde_json::json!({
                    "role": "user",
                    "content": text_parts.join("\n"),
                }));
            }
        }
        Role::Assistant => {
            let text = msg.text();
            let tool_calls: Vec<Value> = msg
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": input.to_string(),
                        },
                    })),
                    _ => None,
                })
                .collect();
            let mut api = serde_json::json!({"role": "assistant"});
            api["content"] = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            if !tool_calls.is_empty() {
                api["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(api);
        }
    }
}

fn tool_to_api(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamState {
    /// delta index → call id, for fragments that omit the id.
    call_ids: std::collections::HashMap<u64, String>,
    finish_reason: Option<StopReason>,
    usage: Option<RawTokenCounts>,
    text_open: bool,
    remap: IdRemap,
}

fn parse_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    if data == "[DONE]" {
        if state.text_open {
            state.text_open = false;
            events.push(Ok(StreamEvent::TextEnd));
        }
        events.push(Ok(StreamEvent::Done {
            stop_reason: state.finish_reason.unwrap_or(StopReason::EndTurn),
            usage: state.usage,
        }));
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    // Usage rides a trailing chunk with empty choices.
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let input = usage
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output = usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let cached = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        state.usage = Some(RawTokenCounts {
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: cached,
            ..Default::default()
        });
    }

    let Some(choice) = v.get("choices").and_then(|c| c.get(0)) else {
        return events;
    };

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        state.finish_reason = Some(normalize_stop_reason(reason));
    }

    let Some(delta) = choice.get("delta") else {
        return events;
    };

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
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

    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tool_calls {
            let idx = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(wire_id) = tc.get("id").and_then(Value::as_str) {
                let call_id = state.remap.reverse(wire_id);
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned();
                state.call_ids.insert(idx, call_id.clone());
                if state.text_open {
                    state.text_open = false;
                    events.push(Ok(StreamEvent::TextEnd));
                }
                events.push(Ok(StreamEvent::ToolCallStart {
                    call_id,
                    tool_name: name,
                }));
            }
            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
            {
                if !args.is_empty() {
                    if let Some(call_id) = state.call_ids.get(&idx) {
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: call_id.clone(),
                            delta: args.to_owned(),
                        }));
                    }
                }
            }
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn usage_semantics(&self) -> UsageSemantics {
        UsageSemantics::FullContext
    }

    fn tool_id_format(&self) -> ToolIdFormat {
        ToolIdFormat::OpenAi
    }

    fn context_window(&self, _model: &str) -> u64 {
        128_000
    }

    async fn stream(
        &self,
        req: &ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let remap = IdRemap::build(&req.messages, self.tool_id_format());
        let body = self.build_body(req, &remap);
        let url = format!("{}/chat/completions", self.base_url);

        let response = with_retry(&self.retry, || {
            let request = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
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
            call_ids: Default::default(),
            finish_reason: None,
            usage: None,
            text_open: false,
            remap,
        };
        // This dialect never sets `event:`; everything rides the data line.
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
            call_ids: Default::default(),
            finish_reason: None,
            usage: None,
            text_open: false,
            remap: IdRemap::default(),
        }
    }

    fn drive(state: &mut StreamState, data: &str) -> Vec<StreamEvent> {
        parse_sse(data, state)
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn text_then_done() {
        let mut state = fresh_state();
        let mut all = Vec::new();
        all.extend(drive(
            &mut state,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
        ));
        all.extend(drive(
            &mut state,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        ));
        all.extend(drive(
            &mut state,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        ));
        all.extend(drive(
            &mut state,
            r#"{"choices":[],"usage":{"prompt_tokens":900,"completion_tokens":12}}"#,
        ));
        all.extend(drive(&mut state, "[DONE]"));

        assert!(matches!(all[0], StreamEvent::TextStart));
        assert!(matches!(all[1], StreamEvent::TextDelta { ref text } if text == "Hel"));
        assert!(matches!(all[2], StreamEvent::TextDelta { ref text } if text == "lo"));
        assert!(matches!(all[3], StreamEvent::TextEnd));
        match &all[4] {
            StreamEvent::Done { stop_reason, usage } => {
                assert_eq!(*stop_reason, StopReason::EndTurn);
                assert_eq!(usage.unwrap().input_tokens, 900);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_fragments_assemble() {
        let mut state = fresh_state();
        let start = drive(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"bash","arguments":""}}]}}]}"#,
        );
        assert!(matches!(
            &start[0],
            StreamEvent::ToolCallStart { call_id, tool_name }
                if call_id == "call_9" && tool_name == "bash"
        ));

        let delta = drive(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"command\""}}]}}]}"#,
        );
        assert!(matches!(
            &delta[0],
            StreamEvent::ToolCallDelta { call_id, .. } if call_id == "call_9"
        ));

        let done = drive(
            &mut state,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        );
        assert!(done.is_empty());
        let fin = drive(&mut state, "[DONE]");
        assert!(matches!(
            &fin[0],
            StreamEvent::Done { stop_reason, .. } if *stop_reason == StopReason::ToolUse
        ));
    }

    #[test]
    fn cached_tokens_captured() {
        let mut state = fresh_state();
        drive(
            &mut state,
            r#"{"choices":[],"usage":{"prompt_tokens":1000,"completion_tokens":5,"prompt_tokens_details":{"cached_tokens":800}}}"#,
        );
        let usage = state.usage.unwrap();
        assert_eq!(usage.cache_read_tokens, 800);
    }

    #[test]
    fn assistant_tool_calls_project_to_function_shape() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text {
                    text: "running".into(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                },
            ],
        };
        let mut out = Vec::new();
        project_message(&msg, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["tool_calls"][0]["function"]["name"], "bash");
        // Arguments are a JSON-encoded string in this dialect.
        assert!(out[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap()
            .contains("command"));
    }

    #[test]
    fn tool_results_project_to_tool_role() {
        let msg = Message::tool_result("call_1", "file list", false);
        let mut out = Vec::new();
        project_message(&msg, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["role"], "tool");
        assert_eq!(out[0]["tool_call_id"], "call_1");
    }
}

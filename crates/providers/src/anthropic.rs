//! Anthropic-native adapter.
//!
//! Speaks the Messages API: system prompt in a top-level `system` array
//! (with cache-control breakpoints on the stable/volatile groups), tool
//! results as user messages with `tool_result` blocks, SSE streaming via
//! `content_block_*` events. Reports per-turn NEW input tokens with cache
//! read/creation splits.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_domain::config::{ProviderConfig, RetryConfig};
use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentBlock, Message, Role};
use sb_domain::stream::{BoxStream, StreamEvent};
use sb_domain::tokens::RawTokenCounts;
use sb_domain::tool::ToolDefinition;

use crate::remap::IdRemap;
use crate::retry::with_retry;
use crate::sse::{sse_event_stream, SseFrame};
use crate::traits::{
    normalize_stop_reason, with_cancellation, CacheGroup, Provider, ProviderRequest,
    SystemPart, ToolIdFormat, UsageSemantics,
};
use crate::util::{from_reqwest, from_status, resolve_api_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8_192;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig, retry: RetryConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let base_url = if cfg.base_url.is_empty() {
            "https://api.anthropic.com".to_owned()
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
        for msg in &messages {
            match msg.role {
                Role::System => {
                    // System context travels in system_parts; a stray
                    // system message becomes a user-visible note.
                    api_messages.push(serde_json::json!({
                        "role": "user",
                        "content": [{"type": "text", "text": text_of(msg)}],
                    }));
                }
                Role::User => api_messages.push(user_to_api(msg)),
                Role::Assistant => api_messages.push(assistant_to_api(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": api_messages,
            "max_tokens": req.max_output.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        let system = system_to_api(&req.system_parts);
        if !system.is_empty() {
            body["system"] = Value::Array(system);
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_api).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if !req.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(req.stop_sequences);
        }
        if let Some(budget) = req.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Project system parts onto the `system` array, closing each cache group
/// with a breakpoint: long TTL after the stable group, default (5m) after
/// the volatile group.
fn system_to_api(parts: &[SystemPart]) -> Vec<Value> {
    let mut blocks: Vec<Value> = Vec::new();
    let last_stable = parts
        .iter()
        .rposition(|p| p.group == CacheGroup::Stable && !p.text.is_empty());
    let last_volatile = parts
        .iter()
        .rposition(|p| p.group == CacheGroup::Volatile && !p.text.is_empty());

    for (i, part) in parts.iter().enumerate() {
        if part.text.is_empty() {
            continue;
        }
        let mut block = serde_json::json!({"type": "text", "text": part.text});
        if Some(i) == last_stable {
            block["cache_control"] = serde_json::json!({"type": "ephemeral", "ttl": "1h"});
        } else if Some(i) == last_volatile {
            block["cache_control"] = serde_json::json!({"type": "ephemeral"});
        }
        blocks.push(block);
    }
    blocks
}

fn text_of(msg: &Message) -> String {
    msg.text()
}

fn user_to_api(msg: &Message) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => {
                Some(serde_json::json!({"type": "text", "text": text}))
            }
            ContentBlock::Image { data, mime_type } => Some(serde_json::json!({
                "type": "image",
                "source": {"type": "base64", "media_type": mime_type, "data": data},
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            })),
            _ => None,
        })
        .collect();
    serde_json::json!({"role": "user", "content": content})
}

fn assistant_to_api(msg: &Message) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => {
                Some(serde_json::json!({"type": "text", "text": text}))
            }
            ContentBlock::ToolUse { id, name, input } => Some(serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            })),
            // Thinking blocks are not replayed.
            _ => None,
        })
        .collect();
    serde_json::json!({"role": "assistant", "content": content})
}

fn tool_to_api(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable state carried across SSE payloads.
struct StreamState {
    /// block index → tool call id, for routing input_json_delta.
    tool_blocks: std::collections::HashMap<u64, String>,
    usage: RawTokenCounts,
    saw_usage: bool,
    done_emitted: bool,
    remap: IdRemap,
}

fn parse_usage(v: &Value, into: &mut RawTokenCounts) -> bool {
    let mut saw = false;
    if let Some(n) = v.get("input_tokens").and_then(Value::as_u64) {
        into.input_tokens = n;
        saw = true;
    }
    if let Some(n) = v.get("output_tokens").and_then(Value::as_u64) {
        into.output_tokens = n;
        saw = true;
    }
    if let Some(n) = v.get("cache_read_input_tokens").and_then(Value::as_u64) {
        into.cache_read_tokens = n;
    }
    if let Some(creation) = v.get("cache_creation") {
        if let Some(n) = creation
            .get("ephemeral_5m_input_tokens")
            .and_then(Value::as_u64)
        {
            into.cache_creation_5m_tokens = n;
        }
        if let Some(n) = creation
            .get("ephemeral_1h_input_tokens")
            .and_then(Value::as_u64)
        {
            into.cache_creation_1h_tokens = n;
        }
    } else if let Some(n) = v
        .get("cache_creation_input_tokens")
        .and_then(Value::as_u64)
    {
        into.cache_creation_5m_tokens = n;
    }
    saw
}

fn parse_frame(frame: &SseFrame, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    // This dialect names every frame via `event:`; the JSON `type` field
    // is the fallback for proxies that drop it.
    let event_type = frame
        .name()
        .or_else(|| v.get("type").and_then(Value::as_str))
        .unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(usage) = v.get("message").and_then(|m| m.get("usage")) {
                state.saw_usage |= parse_usage(usage, &mut state.usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                match block.get("type").and_then(Value::as_str).unwrap_or("") {
                    "text" => events.push(Ok(StreamEvent::TextStart)),
                    "tool_use" => {
                        let wire_id = block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_owned();
                        // Incoming ids rewrite back to the original log ids.
                        let call_id = state.remap.reverse(&wire_id);
                        let name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_owned();
                        state.tool_blocks.insert(idx, call_id.clone());
                        events.push(Ok(StreamEvent::ToolCallStart {
                            call_id,
                            tool_name: name,
                        }));
                    }
                    _ => {}
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::TextDelta {
                                    text: text.to_owned(),
                                }));
                            }
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::ThinkingDelta {
                                    text: text.to_owned(),
                                }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) =
                            delta.get("partial_json").and_then(Value::as_str)
                        {
                            if let Some(call_id) = state.tool_blocks.get(&idx) {
                                events.push(Ok(StreamEvent::ToolCallDelta {
                                    call_id: call_id.clone(),
                                    delta: partial.to_owned(),
                                }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(Value::as_u64).unwrap_or(0);
            if state.tool_blocks.remove(&idx).is_none() {
                events.push(Ok(StreamEvent::TextEnd));
            }
        }

        "message_delta" => {
            if let Some(usage) = v.get("usage") {
                state.saw_usage |= parse_usage(usage, &mut state.usage);
            }
            if let Some(stop) = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
            {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    stop_reason: normalize_stop_reason(stop),
                    usage: state.saw_usage.then_some(state.usage),
                }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    stop_reason: normalize_stop_reason("end_turn"),
                    usage: state.saw_usage.then_some(state.usage),
                }));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error {
                message: msg.to_owned(),
            }));
        }

        _ => {
            // ping and unknown event types -- ignore.
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn usage_semantics(&self) -> UsageSemantics {
        UsageSemantics::PerTurnInput
    }

    fn tool_id_format(&self) -> ToolIdFormat {
        ToolIdFormat::Anthropic
    }

    fn context_window(&self, _model: &str) -> u64 {
        200_000
    }

    async fn stream(
        &self,
        req: &ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let remap = IdRemap::build(&req.messages, self.tool_id_format());
        let body = self.build_body(req, &remap);
        let url = format!("{}/v1/messages", self.base_url);

        let response = with_retry(&self.retry, || {
            let request = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
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
            tool_blocks: Default::default(),
            usage: RawTokenCounts::default(),
            saw_usage: false,
            done_emitted: false,
            remap,
        };
        let stream = sse_event_stream(response, move |frame| parse_frame(&frame, &mut state));
        Ok(with_cancellation(stream, cancel))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(state: &mut StreamState, data: &str) -> Vec<StreamEvent> {
        parse_frame(&SseFrame::data_only(data), state)
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    fn fresh_state() -> StreamState {
        StreamState {
            tool_blocks: Default::default(),
            usage: RawTokenCounts::default(),
            saw_usage: false,
            done_emitted: false,
            remap: IdRemap::default(),
        }
    }

    #[test]
    fn text_stream_sequence() {
        let mut state = fresh_state();
        let mut all = Vec::new();
        all.extend(drive(
            &mut state,
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}"#,
        ));
        all.extend(drive(
            &mut state,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        ));
        all.extend(drive(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        ));
        all.extend(drive(&mut state, r#"{"type":"content_block_stop","index":0}"#));
        all.extend(drive(
            &mut state,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
        ));

        assert!(matches!(all[0], StreamEvent::TextStart));
        assert!(matches!(all[1], StreamEvent::TextDelta { ref text } if text == "Hi"));
        assert!(matches!(all[2], StreamEvent::TextEnd));
        match &all[3] {
            StreamEvent::Done { stop_reason, usage } => {
                assert_eq!(*stop_reason, sb_domain::stream::StopReason::EndTurn);
                let usage = usage.unwrap();
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_stream_assembly() {
        let mut state = fresh_state();
        let start = drive(
            &mut state,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01A","name":"bash"}}"#,
        );
        assert!(matches!(
            &start[0],
            StreamEvent::ToolCallStart { call_id, tool_name }
                if call_id == "toolu_01A" && tool_name == "bash"
        ));

        let delta = drive(
            &mut state,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"command\":"}}"#,
        );
        assert!(matches!(
            &delta[0],
            StreamEvent::ToolCallDelta { call_id, .. } if call_id == "toolu_01A"
        ));

        // Tool block stop is not a TextEnd.
        let stop = drive(&mut state, r#"{"type":"content_block_stop","index":1}"#);
        assert!(stop.is_empty());
    }

    #[test]
    fn tool_use_stop_reason() {
        let mut state = fresh_state();
        let done = drive(
            &mut state,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        );
        assert!(matches!(
            &done[0],
            StreamEvent::Done { stop_reason, .. }
                if *stop_reason == sb_domain::stream::StopReason::ToolUse
        ));
    }

    #[test]
    fn thinking_delta() {
        let mut state = fresh_state();
        let events = drive(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        );
        assert!(matches!(
            &events[0],
            StreamEvent::ThinkingDelta { text } if text == "hmm"
        ));
    }

    #[test]
    fn cache_usage_splits() {
        let mut state = fresh_state();
        drive(
            &mut state,
            r#"{"type":"message_start","message":{"usage":{"input_tokens":100,"output_tokens":0,"cache_read_input_tokens":5000,"cache_creation":{"ephemeral_5m_input_tokens":200,"ephemeral_1h_input_tokens":300}}}}"#,
        );
        assert_eq!(state.usage.cache_read_tokens, 5_000);
        assert_eq!(state.usage.cache_creation_5m_tokens, 200);
        assert_eq!(state.usage.cache_creation_1h_tokens, 300);
    }

    #[test]
    fn frame_event_name_routes_without_json_type() {
        let mut state = fresh_state();
        let frame = SseFrame {
            event: Some("message_stop".into()),
            data: "{}".into(),
        };
        let events: Vec<StreamEvent> = parse_frame(&frame, &mut state)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(matches!(events[0], StreamEvent::Done { .. }));
    }

    #[test]
    fn system_parts_get_cache_breakpoints() {
        let parts = vec![
            SystemPart::stable("core prompt"),
            SystemPart::stable("project rules"),
            SystemPart::volatile("task context"),
        ];
        let blocks = system_to_api(&parts);
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].get("cache_control").is_none());
        assert_eq!(blocks[1]["cache_control"]["ttl"], "1h");
        assert_eq!(blocks[2]["cache_control"]["type"], "ephemeral");
        assert!(blocks[2]["cache_control"].get("ttl").is_none());
    }

    #[test]
    fn empty_system_parts_are_dropped() {
        let parts = vec![SystemPart::stable(""), SystemPart::volatile("x")];
        let blocks = system_to_api(&parts);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn incoming_ids_reverse_through_remap() {
        let messages = vec![Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "call_original".into(),
                name: "bash".into(),
                input: serde_json::json!({}),
            }],
        }];
        let remap = IdRemap::build(&messages, ToolIdFormat::Anthropic);
        let wire_id = remap.apply("call_original");
        assert!(wire_id.starts_with("toolu_"));

        let mut state = StreamState {
            tool_blocks: Default::default(),
            usage: RawTokenCounts::default(),
            saw_usage: false,
            done_emitted: false,
            remap,
        };
        let data = format!(
            r#"{{"type":"content_block_start","index":0,"content_block":{{"type":"tool_use","id":"{wire_id}","name":"bash"}}}}"#
        );
        let events = drive(&mut state, &data);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::ToolCallStart { call_id, .. } if call_id == "call_original"
        ));
    }
}

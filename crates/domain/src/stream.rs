use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::tokens::RawTokenCounts;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
        }
    }
}

/// Events emitted during LLM streaming (provider-agnostic).
///
/// Every adapter translates its native wire dialect into this sequence.
/// Consumers drive the stream with an explicit loop, checking cancellation
/// between items.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// The stream opened; the provider accepted the request.
    #[serde(rename = "start")]
    Start,

    /// A text content block began.
    #[serde(rename = "text_start")]
    TextStart,

    /// A text token chunk.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// A reasoning/thinking token chunk.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { text: String },

    /// A tool call has started streaming.
    #[serde(rename = "tool_call_start")]
    ToolCallStart { call_id: String, tool_name: String },

    /// Incremental tool call argument JSON.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A text content block finished.
    #[serde(rename = "text_end")]
    TextEnd,

    /// Stream finished.
    #[serde(rename = "done")]
    Done {
        stop_reason: StopReason,
        /// Raw usage as reported; `None` when the provider omitted it
        /// (the normalizer turns that into a turn failure).
        usage: Option<RawTokenCounts>,
    },

    /// An error occurred mid-stream.
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_strings() {
        assert_eq!(StopReason::EndTurn.as_str(), "end_turn");
        assert_eq!(StopReason::ToolUse.as_str(), "tool_use");
        assert_eq!(StopReason::MaxTokens.as_str(), "max_tokens");
        assert_eq!(StopReason::StopSequence.as_str(), "stop_sequence");
    }

    #[test]
    fn stop_reason_serde_is_snake_case() {
        let json = serde_json::to_value(StopReason::ToolUse).unwrap();
        assert_eq!(json, serde_json::Value::String("tool_use".into()));
    }

    #[test]
    fn stream_event_tagging() {
        let ev = StreamEvent::TextDelta {
            text: "hi".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "hi");
    }
}

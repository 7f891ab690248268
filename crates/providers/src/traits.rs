use tokio_util::sync::CancellationToken;

use sb_domain::error::Result;
use sb_domain::message::Message;
use sb_domain::stream::{BoxStream, StopReason, StreamEvent};
use sb_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cache affinity of a system part.
///
/// Stable parts (system prompt, project rules, long-lived memory) sit in
/// a long-TTL cache group; volatile parts (dynamic rules, skills, subagent
/// results, task list) in a short-TTL group. Only caching-capable
/// adapters act on the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheGroup {
    Stable,
    Volatile,
}

/// One ordered piece of the system context.
#[derive(Debug, Clone)]
pub struct SystemPart {
    pub text: String,
    pub group: CacheGroup,
}

impl SystemPart {
    pub fn stable(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            group: CacheGroup::Stable,
        }
    }

    pub fn volatile(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            group: CacheGroup::Volatile,
        }
    }
}

/// The provider-agnostic request. Each adapter projects this onto its
/// native wire format and caching semantics.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Ordered system context; empty parts are never included.
    pub system_parts: Vec<SystemPart>,
    pub max_output: Option<u32>,
    pub temperature: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub reasoning_level: Option<String>,
    pub thinking_budget: Option<u32>,
}

impl Default for CacheGroup {
    fn default() -> Self {
        CacheGroup::Volatile
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-shape metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the provider's raw `input_tokens` figure means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSemantics {
    /// Reports only NEW input tokens per turn (plus cache splits).
    PerTurnInput,
    /// Reports the FULL context sent each turn.
    FullContext,
    /// Reports full context and omits cache accounting entirely.
    NoCacheAccounting,
}

/// The surface shape of the provider's tool-call ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolIdFormat {
    /// `toolu_<alnum>` ids.
    Anthropic,
    /// `call_<alnum>` ids.
    OpenAi,
    /// Free-form; accepts anything.
    Gemini,
}

impl ToolIdFormat {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Anthropic => "toolu_",
            Self::OpenAi => "call_",
            Self::Gemini => "",
        }
    }

    /// Whether an id already fits this format.
    pub fn matches(self, id: &str) -> bool {
        match self {
            Self::Gemini => true,
            other => id.starts_with(other.prefix()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM backend adapter implements.
///
/// `stream` returns a lazy typed stream; consumers drive it with an
/// explicit loop and check `cancel` between items. Transient failures
/// (network, 5xx, rate limit) are retried inside the adapter before the
/// first event is yielded; once streaming has begun, errors surface as
/// stream items.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider instance id (matches the config entry).
    fn id(&self) -> &str;

    fn usage_semantics(&self) -> UsageSemantics;

    fn tool_id_format(&self) -> ToolIdFormat;

    /// Context window for a model served by this provider.
    fn context_window(&self, model: &str) -> u64;

    /// Open a streaming completion.
    async fn stream(
        &self,
        req: &ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Normalize a provider-specific stop string onto [`StopReason`].
pub fn normalize_stop_reason(raw: &str) -> StopReason {
    match raw {
        "end_turn" | "stop" | "STOP" | "FINISH_REASON_STOP" => StopReason::EndTurn,
        "tool_use" | "tool_calls" | "function_call" => StopReason::ToolUse,
        "max_tokens" | "length" | "MAX_TOKENS" => StopReason::MaxTokens,
        "stop_sequence" | "content_filter" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Yield stream events until `cancel` fires; used by adapters to make the
/// upstream connection close promptly on abort.
pub(crate) fn with_cancellation(
    inner: BoxStream<'static, Result<StreamEvent>>,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<StreamEvent>> {
    use futures_util::StreamExt;
    let stream = async_stream::stream! {
        let mut inner = inner;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Dropping `inner` closes the upstream connection.
                    break;
                }
                item = inner.next() => {
                    match item {
                        Some(ev) => yield ev,
                        None => break,
                    }
                }
            }
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_normalization() {
        assert_eq!(normalize_stop_reason("end_turn"), StopReason::EndTurn);
        assert_eq!(normalize_stop_reason("stop"), StopReason::EndTurn);
        assert_eq!(normalize_stop_reason("tool_calls"), StopReason::ToolUse);
        assert_eq!(normalize_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(normalize_stop_reason("length"), StopReason::MaxTokens);
        assert_eq!(normalize_stop_reason("max_tokens"), StopReason::MaxTokens);
        assert_eq!(
            normalize_stop_reason("stop_sequence"),
            StopReason::StopSequence
        );
        // Unknown reasons default to a clean end of turn.
        assert_eq!(normalize_stop_reason("banana"), StopReason::EndTurn);
    }

    #[test]
    fn tool_id_format_matching() {
        assert!(ToolIdFormat::Anthropic.matches("toolu_01abc"));
        assert!(!ToolIdFormat::Anthropic.matches("call_xyz"));
        assert!(ToolIdFormat::OpenAi.matches("call_xyz"));
        assert!(ToolIdFormat::Gemini.matches("anything-at-all"));
    }
}

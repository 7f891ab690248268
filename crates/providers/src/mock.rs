//! Scripted in-memory provider for exercising the turn loop in tests.
//!
//! Each call to [`Provider::stream`] pops the next scripted event
//! sequence. An optional per-event delay makes cancellation windows
//! reproducible.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use sb_domain::error::{Error, Result};
use sb_domain::stream::{BoxStream, StopReason, StreamEvent};
use sb_domain::tokens::RawTokenCounts;

use crate::traits::{
    with_cancellation, Provider, ProviderRequest, ToolIdFormat, UsageSemantics,
};

pub struct MockProvider {
    id: String,
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
    /// Requests captured for assertion.
    pub requests: Arc<Mutex<Vec<ProviderRequest>>>,
    per_event_delay: Option<Duration>,
    usage_semantics: UsageSemantics,
    tool_id_format: ToolIdFormat,
}

impl MockProvider {
    pub fn scripted(id: &str, turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            id: id.to_owned(),
            turns: Mutex::new(turns.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            per_event_delay: None,
            usage_semantics: UsageSemantics::PerTurnInput,
            tool_id_format: ToolIdFormat::Anthropic,
        }
    }

    /// Sleep this long before each event — gives tests a window to abort
    /// mid-stream.
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.per_event_delay = Some(delay);
        self
    }

    pub fn with_semantics(mut self, semantics: UsageSemantics) -> Self {
        self.usage_semantics = semantics;
        self
    }

    pub fn with_tool_id_format(mut self, format: ToolIdFormat) -> Self {
        self.tool_id_format = format;
        self
    }

    /// A plain text completion turn.
    pub fn text_turn(text: &str, input_tokens: u64, output_tokens: u64) -> Vec<StreamEvent> {
        vec![
            StreamEvent::TextStart,
            StreamEvent::TextDelta { text: text.into() },
            StreamEvent::TextEnd,
            StreamEvent::Done {
                stop_reason: StopReason::EndTurn,
                usage: Some(RawTokenCounts {
                    input_tokens,
                    output_tokens,
                    ..Default::default()
                }),
            },
        ]
    }

    /// A turn that calls one tool.
    pub fn tool_turn(
        call_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolCallStart {
                call_id: call_id.into(),
                tool_name: tool_name.into(),
            },
            StreamEvent::ToolCallDelta {
                call_id: call_id.into(),
                delta: arguments.to_string(),
            },
            StreamEvent::Done {
                stop_reason: StopReason::ToolUse,
                usage: Some(RawTokenCounts {
                    input_tokens: 100,
                    output_tokens: 20,
                    ..Default::default()
                }),
            },
        ]
    }

    /// A turn that omits usage entirely (token-extraction failure path).
    pub fn usageless_turn(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::TextDelta { text: text.into() },
            StreamEvent::Done {
                stop_reason: StopReason::EndTurn,
                usage: None,
            },
        ]
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn usage_semantics(&self) -> UsageSemantics {
        self.usage_semantics
    }

    fn tool_id_format(&self) -> ToolIdFormat {
        self.tool_id_format
    }

    fn context_window(&self, _model: &str) -> u64 {
        200_000
    }

    async fn stream(
        &self,
        req: &ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let script = self
            .turns
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "mock script exhausted".into(),
            })?;
        let delay = self.per_event_delay;

        let stream = async_stream::stream! {
            yield Ok(StreamEvent::Start);
            for event in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(event);
            }
        };
        Ok(with_cancellation(Box::pin(stream), cancel))
    }
}

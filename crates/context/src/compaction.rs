//! Compaction planning and summarization.
//!
//! Splits the reconstructed message list into a summarizable prefix and
//! the preserved recent turns, and drives a summarization provider over
//! the prefix. The gateway turns the outcome into `compact.boundary` +
//! `compact.summary` events; when summarization fails, nothing is
//! emitted and the context stays as it was.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentBlock, Message, Role};
use sb_domain::stream::StreamEvent;
use sb_providers::{Provider, ProviderRequest};

use crate::budget::estimate_tokens;

/// Dry-run numbers for a pending compaction.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionPreview {
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub compression_ratio: f64,
    pub summary: String,
    pub preserved_turns: usize,
    pub summarized_turns: usize,
}

/// Split messages at the preserved-turns boundary.
///
/// A "turn" is a user message with real text (tool-result-only user
/// messages ride along with their turn). Returns the index where the
/// preserved suffix begins.
pub fn split_for_compaction(messages: &[Message], preserve_recent_turns: usize) -> usize {
    if preserve_recent_turns == 0 {
        return messages.len();
    }
    let mut seen_turns = 0;
    for (i, message) in messages.iter().enumerate().rev() {
        if is_turn_start(message) {
            seen_turns += 1;
            if seen_turns >= preserve_recent_turns {
                return i;
            }
        }
    }
    0
}

fn is_turn_start(message: &Message) -> bool {
    message.role == Role::User
        && message
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::Text { .. }))
}

/// Count turn starts in a slice.
pub fn count_turns(messages: &[Message]) -> usize {
    messages.iter().filter(|m| is_turn_start(m)).count()
}

/// Drive the summarizer over the prefix and collect the prose summary.
pub async fn summarize(
    provider: &dyn Provider,
    model: &str,
    prefix: &[Message],
    max_summary_tokens: u32,
    cancel: CancellationToken,
) -> Result<String> {
    if prefix.is_empty() {
        return Ok(String::new());
    }

    let prompt = format!(
        "Summarize the following conversation history into a concise summary \
         that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Files created or modified, and tool state\n\n\
         Be concise but preserve all actionable context. Write in present \
         tense. Omit greetings and pleasantries.\n\n\
         CONVERSATION:\n{}",
        conversation_text(prefix)
    );

    let req = ProviderRequest {
        model: model.to_owned(),
        messages: vec![Message::user(prompt)],
        max_output: Some(max_summary_tokens),
        temperature: Some(0.1),
        ..Default::default()
    };

    let mut stream = provider.stream(&req, cancel.clone()).await?;
    let mut summary = String::new();
    while let Some(event) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match event? {
            StreamEvent::TextDelta { text } => summary.push_str(&text),
            StreamEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: provider.id().to_owned(),
                    message,
                })
            }
            _ => {}
        }
    }

    if summary.trim().is_empty() {
        return Err(Error::Provider {
            provider: provider.id().to_owned(),
            message: "summarizer returned empty output".into(),
        });
    }
    Ok(summary)
}

/// Build the dry-run preview for `context.previewCompaction`.
pub async fn preview(
    provider: &dyn Provider,
    model: &str,
    messages: &[Message],
    preserve_recent_turns: usize,
    max_summary_tokens: u32,
    current_tokens: u64,
    cancel: CancellationToken,
) -> Result<CompactionPreview> {
    let split = split_for_compaction(messages, preserve_recent_turns);
    let prefix = &messages[..split];
    let preserved = &messages[split..];

    let summary = summarize(provider, model, prefix, max_summary_tokens, cancel).await?;

    let tokens_before = if current_tokens > 0 {
        current_tokens
    } else {
        estimate_tokens(messages)
    };
    let summary_tokens = (summary.len() / 4) as u64;
    let tokens_after = summary_tokens + estimate_tokens(preserved);

    Ok(CompactionPreview {
        tokens_before,
        tokens_after,
        compression_ratio: if tokens_before > 0 {
            tokens_after as f64 / tokens_before as f64
        } else {
            1.0
        },
        summary,
        preserved_turns: count_turns(preserved),
        summarized_turns: count_turns(prefix),
    })
}

fn conversation_text(messages: &[Message]) -> String {
    let mut buf = String::new();
    for message in messages {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => {
                    buf.push_str(label);
                    buf.push_str(": ");
                    push_capped(&mut buf, text);
                    buf.push('\n');
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    buf.push_str(&format!("Assistant calls {name}: "));
                    push_capped(&mut buf, &input.to_string());
                    buf.push('\n');
                }
                ContentBlock::ToolResult { content, .. } => {
                    buf.push_str("Tool: ");
                    push_capped(&mut buf, content);
                    buf.push('\n');
                }
                _ => {}
            }
        }
    }
    buf
}

/// Very long entries (tool output) keep their head and tail only.
fn push_capped(buf: &mut String, text: &str) {
    const CAP: usize = 2_000;
    if text.len() <= CAP {
        buf.push_str(text);
    } else {
        let head_end = floor_boundary(text, 1_000);
        let tail_start = floor_boundary(text, text.len() - 500);
        buf.push_str(&text[..head_end]);
        buf.push_str(" [...] ");
        buf.push_str(&text[tail_start..]);
    }
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_providers::mock::MockProvider;

    fn turn(user_text: &str, assistant_text: &str) -> Vec<Message> {
        vec![Message::user(user_text), Message::assistant(assistant_text)]
    }

    #[test]
    fn split_preserves_recent_turns() {
        let mut messages = Vec::new();
        for i in 0..5 {
            messages.extend(turn(&format!("q{i}"), &format!("a{i}")));
        }
        let split = split_for_compaction(&messages, 2);
        // Last two turns = 4 messages.
        assert_eq!(split, 6);
        assert_eq!(count_turns(&messages[split..]), 2);
        assert_eq!(count_turns(&messages[..split]), 3);
    }

    #[test]
    fn split_with_fewer_turns_than_preserved_keeps_everything() {
        let messages = turn("only", "turn");
        assert_eq!(split_for_compaction(&messages, 6), 0);
    }

    #[test]
    fn tool_result_user_messages_are_not_turn_starts() {
        let messages = vec![
            Message::user("real turn"),
            Message::tool_result("c1", "output", false),
            Message::assistant("done"),
        ];
        assert_eq!(count_turns(&messages), 1);
    }

    #[tokio::test]
    async fn preview_reports_compression() {
        let provider = MockProvider::scripted(
            "mock",
            vec![MockProvider::text_turn("short summary", 50, 5)],
        );
        let mut messages = Vec::new();
        for i in 0..6 {
            messages.extend(turn(
                &format!("question {i} {}", "x".repeat(400)),
                &format!("answer {i} {}", "y".repeat(400)),
            ));
        }

        let preview = preview(
            &provider,
            "test-model",
            &messages,
            2,
            1_000,
            0,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(preview.tokens_after < preview.tokens_before);
        assert!(preview.compression_ratio < 1.0);
        assert_eq!(preview.preserved_turns, 2);
        assert_eq!(preview.summarized_turns, 4);
        assert_eq!(preview.summary, "short summary");
    }

    #[tokio::test]
    async fn failed_summarizer_propagates() {
        // Empty script → provider error; compaction caller must leave the
        // context untouched.
        let provider = MockProvider::scripted("mock", vec![]);
        let messages = turn("q", "a");
        let result = summarize(
            &provider,
            "m",
            &messages,
            100,
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }
}

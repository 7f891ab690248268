//! Deterministic reconstruction of message history from the event log.
//!
//! Reconstruction folds a session's chronological event chain into the
//! provider-facing message list. Two passes: the first collects soft-delete
//! targets (and the tool calls/results they suppress), the second folds the
//! surviving events. The fold restarts at the last `context.cleared` or
//! `compact.summary` cut — compaction re-appends the preserved turns after
//! the summary, so everything visible lives after the cut.

use std::collections::{HashMap, HashSet};

use sb_domain::message::{ContentBlock, Message, Role};
use sb_domain::todo::Todo;

use crate::event::Event;
use crate::payload::EventPayload;

/// In-memory session state rebuilt from the log on resume.
#[derive(Debug, Clone, Default)]
pub struct ReconstructedState {
    pub messages: Vec<Message>,
    pub model: String,
    pub working_directory: String,
    pub plan_mode: bool,
    pub todos: Vec<Todo>,
    /// Number of completed turns (`stream.turn_end` events seen).
    pub turn_count: u32,
    /// Context-window figure from the most recent turn end.
    pub last_context_tokens: u64,
}

/// Fold a chronological event chain into messages.
pub fn reconstruct_messages(events: &[Event]) -> Vec<Message> {
    let (deleted_events, suppressed_calls) = deletion_sets(events);
    let cut = fold_cut(events);

    let mut messages = Vec::new();

    // The cut is a compact.summary: it opens the list as a synthetic
    // system message.
    if let Some(idx) = cut {
        if let EventPayload::CompactSummary(p) = &events[idx].payload {
            let mut text = format!("[Conversation summary]\n{}", p.summary);
            if let Some(ref decisions) = p.key_decisions {
                if !decisions.is_empty() {
                    text.push_str("\n\nKey decisions:\n");
                    for d in decisions {
                        text.push_str(&format!("- {d}\n"));
                    }
                }
            }
            messages.push(Message::system(text.trim_end()));
        }
    }

    let start = cut.map(|i| i + 1).unwrap_or(0);
    for event in &events[start..] {
        if deleted_events.contains(&event.id) {
            continue;
        }
        match &event.payload {
            EventPayload::MessageUser(p) => {
                messages.push(Message {
                    role: Role::User,
                    content: p.content.clone(),
                });
            }
            EventPayload::MessageAssistant(p) => {
                let content: Vec<ContentBlock> = p
                    .content
                    .iter()
                    .filter(|b| match b {
                        ContentBlock::ToolUse { id, .. } => !suppressed_calls.contains(id),
                        _ => true,
                    })
                    .cloned()
                    .collect();
                if !content.is_empty() {
                    messages.push(Message {
                        role: Role::Assistant,
                        content,
                    });
                }
            }
            EventPayload::MessageSystem(p) => {
                messages.push(Message::system(p.content.clone()));
            }
            EventPayload::ToolResult(p) => {
                if suppressed_calls.contains(&p.tool_call_id) {
                    continue;
                }
                messages.push(Message::tool_result(
                    p.tool_call_id.clone(),
                    p.content.clone(),
                    p.is_error,
                ));
            }
            // tool.call events carry no message content of their own — the
            // tool_use block inside the assistant message is the source.
            _ => {}
        }
    }

    messages
}

/// Rebuild full in-memory state (messages + config + todos) for resume.
pub fn reconstruct_state(events: &[Event]) -> ReconstructedState {
    let mut state = ReconstructedState {
        messages: reconstruct_messages(events),
        ..Default::default()
    };

    for event in events {
        match &event.payload {
            EventPayload::SessionStart(p) => {
                state.model = p.model.clone();
                state.working_directory = p.working_directory.clone();
            }
            EventPayload::ConfigModelSwitch(p) => {
                state.model = p.to_model.clone();
            }
            EventPayload::PlanModeEntered(_) => state.plan_mode = true,
            EventPayload::PlanModeExited(_) => state.plan_mode = false,
            EventPayload::TodoWrite(p) => state.todos = p.todos.clone(),
            EventPayload::StreamTurnEnd(p) => {
                state.turn_count = p.turn;
                if let Some(ref record) = p.token_record {
                    state.last_context_tokens = record.computed.context_window_tokens;
                }
            }
            _ => {}
        }
    }

    state
}

// ── Pass 1: deletion sets ──────────────────────────────────────────

/// Collect (deleted event ids, suppressed tool-call ids).
///
/// Deleting an assistant message suppresses the tool calls it contained;
/// deleting a tool.call suppresses its matching tool.result.
fn deletion_sets(events: &[Event]) -> (HashSet<String>, HashSet<String>) {
    let by_id: HashMap<&str, &Event> =
        events.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut deleted_events = HashSet::new();
    let mut suppressed_calls = HashSet::new();

    for event in events {
        let EventPayload::MessageDeleted(del) = &event.payload else {
            continue;
        };
        deleted_events.insert(del.target_event_id.clone());

        match by_id.get(del.target_event_id.as_str()).map(|e| &e.payload) {
            Some(EventPayload::MessageAssistant(p)) => {
                for block in &p.content {
                    if let ContentBlock::ToolUse { id, .. } = block {
                        suppressed_calls.insert(id.clone());
                    }
                }
            }
            Some(EventPayload::ToolCall(p)) => {
                suppressed_calls.insert(p.tool_call_id.clone());
            }
            Some(EventPayload::ToolResult(p)) => {
                suppressed_calls.insert(p.tool_call_id.clone());
            }
            _ => {}
        }
    }

    (deleted_events, suppressed_calls)
}

/// Index of the last `context.cleared` or `compact.summary` event, the
/// point the visible fold restarts from.
fn fold_cut(events: &[Event]) -> Option<usize> {
    events.iter().rposition(|e| {
        matches!(
            e.payload,
            EventPayload::ContextCleared(_) | EventPayload::CompactSummary(_)
        )
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::new_event_id;
    use crate::payload::*;
    use sb_domain::stream::StopReason;

    fn mk(session: &str, seq: u64, payload: EventPayload) -> Event {
        Event {
            id: new_event_id(),
            session_id: session.into(),
            workspace_id: "w".into(),
            parent_id: None,
            sequence: seq,
            timestamp: chrono::Utc::now(),
            payload,
        }
    }

    fn user(session: &str, seq: u64, text: &str) -> Event {
        mk(
            session,
            seq,
            EventPayload::MessageUser(MessageUserPayload {
                content: vec![ContentBlock::Text { text: text.into() }],
            }),
        )
    }

    fn assistant(session: &str, seq: u64, blocks: Vec<ContentBlock>) -> Event {
        mk(
            session,
            seq,
            EventPayload::MessageAssistant(MessageAssistantPayload {
                content: blocks,
                stop_reason: StopReason::EndTurn,
                incomplete: false,
            }),
        )
    }

    #[test]
    fn simple_fold() {
        let events = vec![
            mk(
                "s",
                1,
                EventPayload::SessionStart(SessionStartPayload {
                    working_directory: "/tmp".into(),
                    model: "m".into(),
                    title: None,
                }),
            ),
            user("s", 2, "hello"),
            assistant(
                "s",
                3,
                vec![ContentBlock::Text {
                    text: "hi there".into(),
                }],
            ),
        ];
        let messages = reconstruct_messages(&events);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].text(), "hi there");
    }

    #[test]
    fn fold_is_deterministic() {
        let events = vec![user("s", 1, "a"), user("s", 2, "b")];
        assert_eq!(reconstruct_messages(&events), reconstruct_messages(&events));
    }

    #[test]
    fn deleted_message_is_invisible() {
        let msg = user("s", 2, "secret");
        let target_id = msg.id.clone();
        let events = vec![
            user("s", 1, "keep"),
            msg,
            mk(
                "s",
                3,
                EventPayload::MessageDeleted(MessageDeletedPayload {
                    target_event_id: target_id,
                    reason: None,
                }),
            ),
        ];
        let messages = reconstruct_messages(&events);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "keep");
    }

    #[test]
    fn deleting_assistant_suppresses_its_tool_results() {
        let asst = assistant(
            "s",
            2,
            vec![
                ContentBlock::Text {
                    text: "running".into(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "bash".into(),
                    input: serde_json::json!({}),
                },
            ],
        );
        let asst_id = asst.id.clone();
        let events = vec![
            user("s", 1, "go"),
            asst,
            mk(
                "s",
                3,
                EventPayload::ToolResult(ToolResultPayload {
                    tool_call_id: "call_1".into(),
                    tool_name: "bash".into(),
                    content: "output".into(),
                    is_error: false,
                    duration_ms: None,
                    details: None,
                    affected_files: None,
                }),
            ),
            mk(
                "s",
                4,
                EventPayload::MessageDeleted(MessageDeletedPayload {
                    target_event_id: asst_id,
                    reason: None,
                }),
            ),
        ];
        let messages = reconstruct_messages(&events);
        // Only the user message survives: the assistant is deleted and the
        // orphaned tool result goes with it.
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn deleting_tool_result_removes_result_only() {
        let result = mk(
            "s",
            3,
            EventPayload::ToolResult(ToolResultPayload {
                tool_call_id: "call_1".into(),
                tool_name: "bash".into(),
                content: "noise".into(),
                is_error: false,
                duration_ms: None,
                details: None,
                affected_files: None,
            }),
        );
        let result_id = result.id.clone();
        let asst = assistant(
            "s",
            2,
            vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "bash".into(),
                input: serde_json::json!({}),
            }],
        );
        let events = vec![
            user("s", 1, "go"),
            asst,
            result,
            mk(
                "s",
                4,
                EventPayload::MessageDeleted(MessageDeletedPayload {
                    target_event_id: result_id,
                    reason: None,
                }),
            ),
        ];
        let messages = reconstruct_messages(&events);
        // user survives; assistant loses its (now-suppressed) tool_use and
        // the result disappears.
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn context_cleared_hides_prior_messages() {
        let events = vec![
            user("s", 1, "old"),
            mk(
                "s",
                2,
                EventPayload::ContextCleared(ContextClearedPayload {
                    tokens_before: 1000,
                    tokens_after: 0,
                    reason: "user".into(),
                }),
            ),
            user("s", 3, "new"),
        ];
        let messages = reconstruct_messages(&events);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "new");
    }

    #[test]
    fn compact_summary_opens_with_synthetic_system_message() {
        let events = vec![
            user("s", 1, "ancient history"),
            mk(
                "s",
                2,
                EventPayload::CompactBoundary(CompactBoundaryPayload {
                    original_tokens: 100_000,
                    compacted_tokens: 20_000,
                    compression_ratio: 0.2,
                }),
            ),
            mk(
                "s",
                3,
                EventPayload::CompactSummary(CompactSummaryPayload {
                    summary: "We built a parser.".into(),
                    key_decisions: Some(vec!["Use recursive descent".into()]),
                    files_modified: None,
                }),
            ),
            user("s", 4, "preserved turn"),
        ];
        let messages = reconstruct_messages(&events);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].text().contains("We built a parser."));
        assert!(messages[0].text().contains("Use recursive descent"));
        assert_eq!(messages[1].text(), "preserved turn");
    }

    #[test]
    fn state_tracks_model_switch_and_todos() {
        let events = vec![
            mk(
                "s",
                1,
                EventPayload::SessionStart(SessionStartPayload {
                    working_directory: "/w".into(),
                    model: "first".into(),
                    title: None,
                }),
            ),
            mk(
                "s",
                2,
                EventPayload::ConfigModelSwitch(ConfigModelSwitchPayload {
                    from_model: "first".into(),
                    to_model: "second".into(),
                }),
            ),
            mk(
                "s",
                3,
                EventPayload::TodoWrite(TodoWritePayload {
                    todos: vec![Todo {
                        id: "t1".into(),
                        content: "Do things".into(),
                        active_form: "Doing things".into(),
                        status: sb_domain::todo::TodoStatus::Pending,
                        source: Default::default(),
                        metadata: None,
                    }],
                }),
            ),
        ];
        let state = reconstruct_state(&events);
        assert_eq!(state.model, "second");
        assert_eq!(state.working_directory, "/w");
        assert_eq!(state.todos.len(), 1);
    }
}

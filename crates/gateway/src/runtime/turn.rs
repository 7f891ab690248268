//! The agent turn loop: one prompt-to-response cycle.
//!
//! Idle → Prepare → Stream → (DispatchTools → Prepare)* → Complete, with
//! Interrupted and Failed reachable from anywhere. The loop owns the
//! in-memory buffer of partial assistant content so cancellation can
//! capture it, persists every transition as events, and feeds streaming
//! deltas to the session bus coalesced.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_context::{compose_system_parts, ContextInputs};
use sb_domain::error::Error;
use sb_domain::message::ContentBlock;
use sb_domain::stream::{StopReason, StreamEvent};
use sb_domain::tokens::TokenRecord;
use sb_domain::tool::ToolResult;
use sb_events::{
    ErrorProviderPayload, EventPayload, HookBackgroundCompletedPayload,
    HookBackgroundStartedPayload, HookCompletedPayload, HookTriggeredPayload,
    MessageAssistantPayload, MessageSystemPayload, MessageUserPayload, RulesLoadedPayload,
    StreamTextDeltaPayload, StreamThinkingDeltaPayload, StreamTurnEndPayload,
    StreamTurnStartPayload, ToolCallPayload, ToolResultPayload, TurnFailedPayload,
};
use sb_hooks::{HookType, TriggerResult};
use sb_providers::{usage, ProviderRequest};
use sb_tools::ToolContext;

use crate::runtime::compact;
use crate::runtime::orchestrator::{ActiveSession, TurnDeps};
use crate::runtime::subagent::{self, SubagentTracker};

const DEFAULT_MAX_OUTPUT: u32 = 8_192;

const SYSTEM_PROMPT: &str = "You are Switchboard, a coding agent. You work inside the user's \
project directory, read and modify files, run shell commands, and spawn \
subagents for parallelizable work. Keep responses concise; prefer acting \
through tools over describing what you would do.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one prompt to completion. Never returns an error — every failure
/// becomes a `turn.failed` event, the authoritative signal for clients.
pub(crate) async fn run_prompt(
    deps: &Arc<TurnDeps>,
    subagents: &Arc<SubagentTracker>,
    session: &Arc<ActiveSession>,
    text: String,
    attachments: Vec<ContentBlock>,
) {
    let session_id = session.session_id.clone();
    let cancel = session.arm_interrupt();

    // ── UserPromptSubmit hooks (forced blocking; may modify or block) ──
    let hook_result = run_hooks(
        deps,
        session,
        HookType::UserPromptSubmit,
        serde_json::json!({"prompt": text}),
        cancel.clone(),
    )
    .await;
    if let Some(reason) = hook_result.blocked {
        append(
            deps,
            &session_id,
            EventPayload::MessageSystem(MessageSystemPayload {
                content: format!("Prompt blocked by hook: {reason}"),
            }),
        );
        session.publish("prompt.blocked", serde_json::json!({"reason": reason}));
        return;
    }
    let mut prompt_text = text;
    for modification in &hook_result.modifications {
        if let Some(replacement) = modification.get("prompt").and_then(Value::as_str) {
            prompt_text = replacement.to_owned();
        }
        if let Some(context) = modification.get("additionalContext").and_then(Value::as_str) {
            append(
                deps,
                &session_id,
                EventPayload::MessageSystem(MessageSystemPayload {
                    content: context.to_owned(),
                }),
            );
        }
    }

    // ── Persist the user message ───────────────────────────────────
    let mut user_blocks = vec![ContentBlock::Text {
        text: prompt_text.clone(),
    }];
    user_blocks.extend(attachments);
    let Some(user_event) = append(
        deps,
        &session_id,
        EventPayload::MessageUser(MessageUserPayload {
            content: user_blocks,
        }),
    ) else {
        return;
    };
    session.publish(
        "message.user",
        serde_json::json!({"eventId": user_event.id, "text": prompt_text}),
    );

    // ── Turn loop ──────────────────────────────────────────────────
    let max_turns = deps.config.sessions.max_turns;
    for _ in 0..max_turns {
        match run_turn(deps, subagents, session, &cancel).await {
            TurnFlow::Continue => {}
            TurnFlow::Complete => {
                session.publish("agent.turn_complete", serde_json::json!({}));
                return;
            }
            TurnFlow::Stopped => return,
        }
    }

    // Turn budget exhausted.
    let turn = session.turn.load(Ordering::SeqCst);
    fail_turn(
        deps,
        session,
        TurnFailedPayload {
            turn,
            code: Some("MAX_TURNS".into()),
            message: format!("turn budget exhausted ({max_turns} turns)"),
            recoverable: true,
            interrupted: false,
            partial_content: None,
        },
    );
}

enum TurnFlow {
    /// Tool results are in; run another inference turn.
    Continue,
    /// Clean end of turn.
    Complete,
    /// Failed or interrupted; `turn.failed` has been emitted.
    Stopped,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One inference + tool-dispatch cycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn(
    deps: &Arc<TurnDeps>,
    subagents: &Arc<SubagentTracker>,
    session: &Arc<ActiveSession>,
    cancel: &CancellationToken,
) -> TurnFlow {
    let session_id = session.session_id.clone();
    let turn = session.turn.load(Ordering::SeqCst) + 1;

    if cancel.is_cancelled() {
        fail_turn(
            deps,
            session,
            TurnFailedPayload {
                turn,
                code: None,
                message: "interrupted before inference".into(),
                recoverable: true,
                interrupted: true,
                partial_content: None,
            },
        );
        return TurnFlow::Stopped;
    }

    // ── Prepare: compaction, reconstruction, composition ───────────
    if session.budget.lock().should_compact() && deps.config.compaction.auto {
        if let Err(e) = compact::execute_compaction(deps, session, cancel.clone()).await {
            tracing::warn!(session_id = %session_id, error = %e, "auto-compaction failed; continuing uncompacted");
        }
    }

    let messages = match reconstruct(deps, &session_id) {
        Ok(messages) => messages,
        Err(e) => {
            fail_turn(
                deps,
                session,
                TurnFailedPayload {
                    turn,
                    code: None,
                    message: format!("reconstruction failed: {e}"),
                    recoverable: false,
                    interrupted: false,
                    partial_content: None,
                },
            );
            return TurnFlow::Stopped;
        }
    };

    let admission = session
        .budget
        .lock()
        .can_accept_turn(DEFAULT_MAX_OUTPUT as u64);
    if admission.would_exceed_limit {
        fail_turn(
            deps,
            session,
            TurnFailedPayload {
                turn,
                code: Some("CTX".into()),
                message: "context window exhausted; compact and retry".into(),
                recoverable: true,
                interrupted: false,
                partial_content: None,
            },
        );
        return TurnFlow::Stopped;
    }

    let model = session.model.read().clone();
    let (provider, model_name) = match deps.providers.resolve(&model) {
        Ok(resolved) => resolved,
        Err(e) => {
            fail_turn(
                deps,
                session,
                TurnFailedPayload {
                    turn,
                    code: None,
                    message: e.to_string(),
                    recoverable: false,
                    interrupted: false,
                    partial_content: None,
                },
            );
            return TurnFlow::Stopped;
        }
    };

    let inputs = build_context_inputs(deps, session, turn).await;
    let mut tools = deps.tools.registry().definitions(&deps.denial);
    tools.extend(subagent::tool_definitions());
    tools.push(todo_tool_definition());

    let request = ProviderRequest {
        model: model_name.clone(),
        messages,
        tools,
        system_parts: compose_system_parts(&inputs),
        max_output: Some(DEFAULT_MAX_OUTPUT),
        temperature: None,
        stop_sequences: Vec::new(),
        reasoning_level: None,
        thinking_budget: None,
    };

    // ── Stream ─────────────────────────────────────────────────────
    append(
        deps,
        &session_id,
        EventPayload::StreamTurnStart(StreamTurnStartPayload { turn }),
    );
    session.publish("stream.turn_start", serde_json::json!({"turn": turn}));

    let mut stream = match provider.stream(&request, cancel.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            provider_failure(deps, session, provider.id(), turn, &e, None);
            return TurnFlow::Stopped;
        }
    };

    let coalesce = deps.config.sessions.delta_coalesce_chars;
    let mut text_buf = String::new();
    let mut thinking_buf = String::new();
    let mut delta_buf = String::new();
    let mut thinking_delta_buf = String::new();
    // (call_id, tool_name, args_json_buffer), in emission order.
    let mut pending_calls: Vec<(String, String, String)> = Vec::new();
    let mut outcome: Option<(StopReason, Option<sb_domain::tokens::RawTokenCounts>)> = None;
    let mut was_cancelled = false;

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            was_cancelled = true;
            break;
        }
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                flush_text(deps, session, turn, coalesce, &mut delta_buf, true);
                provider_failure(deps, session, provider.id(), turn, &e, Some(&text_buf));
                return TurnFlow::Stopped;
            }
        };
        match event {
            StreamEvent::TextDelta { text } => {
                text_buf.push_str(&text);
                delta_buf.push_str(&text);
                flush_text(deps, session, turn, coalesce, &mut delta_buf, false);
            }
            StreamEvent::ThinkingDelta { text } => {
                thinking_buf.push_str(&text);
                thinking_delta_buf.push_str(&text);
                flush_thinking(deps, session, turn, coalesce, &mut thinking_delta_buf, false);
            }
            StreamEvent::ToolCallStart { call_id, tool_name } => {
                pending_calls.push((call_id, tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some(call) = pending_calls.iter_mut().find(|c| c.0 == call_id) {
                    call.2.push_str(&delta);
                }
            }
            StreamEvent::Done { stop_reason, usage } => {
                outcome = Some((stop_reason, usage));
            }
            StreamEvent::Error { message } => {
                flush_text(deps, session, turn, coalesce, &mut delta_buf, true);
                let error = Error::Provider {
                    provider: provider.id().to_owned(),
                    message,
                };
                provider_failure(deps, session, provider.id(), turn, &error, Some(&text_buf));
                return TurnFlow::Stopped;
            }
            StreamEvent::Start | StreamEvent::TextStart | StreamEvent::TextEnd => {}
        }
    }

    flush_text(deps, session, turn, coalesce, &mut delta_buf, true);
    flush_thinking(deps, session, turn, coalesce, &mut thinking_delta_buf, true);

    // ── Cancelled mid-stream ───────────────────────────────────────
    if was_cancelled || (outcome.is_none() && cancel.is_cancelled()) {
        let content = assemble_blocks(&thinking_buf, &text_buf, &pending_calls);
        if !content.is_empty() {
            append(
                deps,
                &session_id,
                EventPayload::MessageAssistant(MessageAssistantPayload {
                    content,
                    stop_reason: StopReason::EndTurn,
                    incomplete: true,
                }),
            );
        }
        fail_turn(
            deps,
            session,
            TurnFailedPayload {
                turn,
                code: None,
                message: "turn interrupted".into(),
                recoverable: true,
                interrupted: true,
                partial_content: (!text_buf.is_empty()).then(|| text_buf.clone()),
            },
        );
        return TurnFlow::Stopped;
    }

    let Some((stop_reason, raw_usage)) = outcome else {
        // Stream ended without a Done event.
        let error = Error::Provider {
            provider: provider.id().to_owned(),
            message: "stream closed before completion".into(),
        };
        provider_failure(deps, session, provider.id(), turn, &error, Some(&text_buf));
        return TurnFlow::Stopped;
    };

    // ── Token normalization ────────────────────────────────────────
    let previous_context = session.prev_context_tokens.load(Ordering::SeqCst);
    let record = match usage::normalize(
        raw_usage,
        provider.usage_semantics(),
        previous_context,
        &session_id,
        turn,
        provider.id(),
    ) {
        Ok(record) => record,
        Err(e) => {
            fail_turn(
                deps,
                session,
                TurnFailedPayload {
                    turn,
                    code: Some("TOKEN_EXTRACTION".into()),
                    message: e.to_string(),
                    recoverable: false,
                    interrupted: false,
                    partial_content: None,
                },
            );
            return TurnFlow::Stopped;
        }
    };

    // ── Final assistant message + turn end ─────────────────────────
    let content = assemble_blocks(&thinking_buf, &text_buf, &pending_calls);
    let assistant_event = append(
        deps,
        &session_id,
        EventPayload::MessageAssistant(MessageAssistantPayload {
            content,
            stop_reason,
            incomplete: false,
        }),
    );
    if let Some(ref event) = assistant_event {
        session.publish(
            "message.assistant",
            serde_json::json!({
                "eventId": event.id,
                "stopReason": stop_reason.as_str(),
            }),
        );
    }

    finish_turn(deps, session, turn, &record);

    match stop_reason {
        StopReason::ToolUse => {
            dispatch_tools(deps, subagents, session, cancel, turn, &pending_calls).await
        }
        _ => TurnFlow::Complete,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_tools(
    deps: &Arc<TurnDeps>,
    subagents: &Arc<SubagentTracker>,
    session: &Arc<ActiveSession>,
    cancel: &CancellationToken,
    turn: u32,
    pending_calls: &[(String, String, String)],
) -> TurnFlow {
    let session_id = session.session_id.clone();
    let mut stop_requested = false;

    // Parse argument buffers; malformed JSON degrades to an empty object
    // so the model sees a tool error rather than the turn failing.
    let mut calls: Vec<(String, String, Value)> = Vec::new();
    for (call_id, tool_name, args_buf) in pending_calls {
        let arguments = if args_buf.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(args_buf).unwrap_or_else(|e| {
                tracing::warn!(
                    call_id = %call_id,
                    tool = %tool_name,
                    error = %e,
                    "tool call arguments are not valid JSON; defaulting to empty object"
                );
                Value::Object(Default::default())
            })
        };
        calls.push((call_id.clone(), tool_name.clone(), arguments));
    }

    // PreToolUse hooks gate every call; survivors keep their (possibly
    // modified) arguments.
    let mut approved: Vec<(String, String, Value)> = Vec::new();
    let mut synthetic: Vec<(String, String, ToolResult)> = Vec::new();
    for (call_id, tool_name, mut arguments) in calls {
        let hook_result = run_hooks(
            deps,
            session,
            HookType::PreToolUse,
            serde_json::json!({"toolName": tool_name, "arguments": arguments}),
            cancel.clone(),
        )
        .await;
        if let Some(reason) = hook_result.blocked {
            synthetic.push((
                call_id,
                tool_name,
                ToolResult::error(format!("blocked by hook: {reason}"))
                    .with_details(serde_json::json!({"denied": true})),
            ));
            continue;
        }
        for modification in &hook_result.modifications {
            if let Some(new_args) = modification.get("arguments") {
                arguments = new_args.clone();
            }
        }
        approved.push((call_id, tool_name, arguments));
    }

    // Emit every tool.call first, in emission order.
    let call_meta: Vec<(String, String, Value)> = approved
        .iter()
        .cloned()
        .chain(
            synthetic
                .iter()
                .map(|(id, name, _)| (id.clone(), name.clone(), Value::Null)),
        )
        .collect();
    for (call_id, tool_name, arguments) in &call_meta {
        append(
            deps,
            &session_id,
            EventPayload::ToolCall(ToolCallPayload {
                tool_call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                arguments: arguments.clone(),
            }),
        );
        session.publish(
            "tool.call",
            serde_json::json!({"callId": call_id, "toolName": tool_name}),
        );
    }

    // Synthetic (blocked) results short-circuit execution.
    for (call_id, tool_name, result) in &synthetic {
        record_tool_result(deps, session, call_id, tool_name, result, 0).await;
    }

    // Execute survivors: concurrently when every tool is parallel-safe,
    // otherwise strictly in order.
    let all_parallel_safe = approved.iter().all(|(_, name, _)| {
        subagent::is_subagent_tool(name)
            || deps
                .tools
                .registry()
                .get(name)
                .map(|t| t.parallel_safe())
                .unwrap_or(false)
    });

    if all_parallel_safe && approved.len() > 1 {
        let futures: Vec<_> = approved
            .iter()
            .map(|(call_id, tool_name, arguments)| {
                execute_one(deps, subagents, session, cancel, call_id, tool_name, arguments)
            })
            .collect();
        let executed = futures_util::future::join_all(futures).await;
        for ((call_id, tool_name, _), (result, duration_ms)) in
            approved.iter().zip(executed)
        {
            if result.stop_turn {
                stop_requested = true;
            }
            record_tool_result(deps, session, call_id, tool_name, &result, duration_ms).await;
        }
    } else {
        for (call_id, tool_name, arguments) in &approved {
            if cancel.is_cancelled() {
                let result = ToolResult::interrupted(None);
                record_tool_result(deps, session, call_id, tool_name, &result, 0).await;
                continue;
            }
            let (result, duration_ms) =
                execute_one(deps, subagents, session, cancel, call_id, tool_name, arguments)
                    .await;
            if result.stop_turn {
                stop_requested = true;
            }
            record_tool_result(deps, session, call_id, tool_name, &result, duration_ms).await;
        }
    }

    if cancel.is_cancelled() {
        fail_turn(
            deps,
            session,
            TurnFailedPayload {
                turn,
                code: None,
                message: "turn interrupted during tool dispatch".into(),
                recoverable: true,
                interrupted: true,
                partial_content: None,
            },
        );
        return TurnFlow::Stopped;
    }

    if stop_requested {
        tracing::debug!(session_id = %session_id, "tool requested turn stop");
        session.publish(
            "agent.turn_complete",
            serde_json::json!({"stopReason": "tool_stop_requested"}),
        );
        return TurnFlow::Stopped;
    }

    TurnFlow::Continue
}

async fn execute_one(
    deps: &Arc<TurnDeps>,
    subagents: &Arc<SubagentTracker>,
    session: &Arc<ActiveSession>,
    cancel: &CancellationToken,
    call_id: &str,
    tool_name: &str,
    arguments: &Value,
) -> (ToolResult, u64) {
    let started = std::time::Instant::now();

    // Subagent operations route to the coordinator, not the executor.
    if subagent::is_subagent_tool(tool_name) {
        let result =
            subagent::execute_tool(deps, subagents, session, cancel, tool_name, arguments)
                .await;
        return (result, started.elapsed().as_millis() as u64);
    }

    // The todo tool mutates session state, so it runs inline too.
    if tool_name == "todo_write" {
        let result = write_todos(deps, session, arguments);
        return (result, started.elapsed().as_millis() as u64);
    }

    let ctx = ToolContext {
        tool_call_id: call_id.to_owned(),
        session_id: session.session_id.clone(),
        working_directory: session.working_directory.clone(),
        cancellation: cancel.clone(),
    };
    let executed = deps
        .tools
        .execute(tool_name, arguments, &deps.denial, &ctx)
        .await;
    (executed.result, executed.duration_ms)
}

async fn record_tool_result(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    call_id: &str,
    tool_name: &str,
    result: &ToolResult,
    duration_ms: u64,
) {
    let affected_files = result
        .details
        .as_ref()
        .and_then(|d| d.get("affectedFiles"))
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect::<Vec<_>>()
        });

    append(
        deps,
        &session.session_id,
        EventPayload::ToolResult(ToolResultPayload {
            tool_call_id: call_id.to_owned(),
            tool_name: tool_name.to_owned(),
            content: result.content.clone(),
            is_error: result.is_error,
            duration_ms: Some(duration_ms),
            details: result.details.clone(),
            affected_files: affected_files.clone(),
        }),
    );
    session.publish(
        "tool.result",
        serde_json::json!({
            "callId": call_id,
            "toolName": tool_name,
            "isError": result.is_error,
        }),
    );

    // File tools leave a file.* trail next to their results.
    if !result.is_error {
        if let Some(path) = affected_files.as_ref().and_then(|f| f.first()) {
            let file_event = match tool_name {
                "read_file" => Some(EventPayload::FileRead(sb_events::FileReadPayload {
                    path: path.clone(),
                })),
                "write_file" => Some(EventPayload::FileWrite(sb_events::FileWritePayload {
                    path: path.clone(),
                    bytes: result
                        .details
                        .as_ref()
                        .and_then(|d| d.get("bytes"))
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                })),
                "edit_file" => Some(EventPayload::FileEdit(sb_events::FileEditPayload {
                    path: path.clone(),
                })),
                _ => None,
            };
            if let Some(payload) = file_event {
                append(deps, &session.session_id, payload);
            }
        }
    }

    // PostToolUse hooks observe the result; they cannot block it.
    let _ = run_hooks(
        deps,
        session,
        HookType::PostToolUse,
        serde_json::json!({
            "toolName": tool_name,
            "isError": result.is_error,
        }),
        CancellationToken::new(),
    )
    .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn reconstruct(
    deps: &Arc<TurnDeps>,
    session_id: &str,
) -> sb_domain::error::Result<Vec<sb_domain::message::Message>> {
    let record = deps
        .store
        .get_session(session_id)?
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
    let Some(head) = record.head_event_id else {
        return Ok(Vec::new());
    };
    let mut chain = deps.store.get_ancestors(&head)?;
    chain.reverse();
    Ok(sb_events::reconstruct_messages(&chain))
}

fn assemble_blocks(
    thinking: &str,
    text: &str,
    calls: &[(String, String, String)],
) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    if !thinking.is_empty() {
        blocks.push(ContentBlock::Thinking {
            thinking: thinking.to_owned(),
        });
    }
    if !text.is_empty() {
        blocks.push(ContentBlock::Text {
            text: text.to_owned(),
        });
    }
    for (call_id, tool_name, args_buf) in calls {
        let input = if args_buf.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(args_buf).unwrap_or(Value::Object(Default::default()))
        };
        blocks.push(ContentBlock::ToolUse {
            id: call_id.clone(),
            name: tool_name.clone(),
            input,
        });
    }
    blocks
}

fn flush_text(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    turn: u32,
    coalesce: usize,
    buffer: &mut String,
    force: bool,
) {
    if buffer.is_empty() || (!force && buffer.len() < coalesce) {
        return;
    }
    let text = std::mem::take(buffer);
    append(
        deps,
        &session.session_id,
        EventPayload::StreamTextDelta(StreamTextDeltaPayload {
            turn,
            text: text.clone(),
        }),
    );
    session.publish(
        "stream.text_delta",
        serde_json::json!({"turn": turn, "text": text}),
    );
}

fn flush_thinking(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    turn: u32,
    coalesce: usize,
    buffer: &mut String,
    force: bool,
) {
    if buffer.is_empty() || (!force && buffer.len() < coalesce) {
        return;
    }
    let text = std::mem::take(buffer);
    append(
        deps,
        &session.session_id,
        EventPayload::StreamThinkingDelta(StreamThinkingDeltaPayload {
            turn,
            text: text.clone(),
        }),
    );
    session.publish(
        "stream.thinking_delta",
        serde_json::json!({"turn": turn, "text": text}),
    );
}

fn finish_turn(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    turn: u32,
    record: &TokenRecord,
) {
    append(
        deps,
        &session.session_id,
        EventPayload::StreamTurnEnd(StreamTurnEndPayload {
            turn,
            token_usage: record.as_usage(),
            token_record: Some(record.clone()),
            cost: None,
        }),
    );
    session.publish(
        "stream.turn_end",
        serde_json::json!({
            "turn": turn,
            "tokenUsage": record.as_usage(),
            "tokenRecord": record,
        }),
    );

    let context_tokens = record.computed.context_window_tokens;
    session.budget.lock().observe(context_tokens);
    session
        .prev_context_tokens
        .store(context_tokens, Ordering::SeqCst);
    session.turn.store(turn, Ordering::SeqCst);
    let _ = deps.store.touch_session(&session.session_id);
}

fn fail_turn(deps: &Arc<TurnDeps>, session: &Arc<ActiveSession>, payload: TurnFailedPayload) {
    tracing::info!(
        session_id = %session.session_id,
        turn = payload.turn,
        interrupted = payload.interrupted,
        recoverable = payload.recoverable,
        message = %payload.message,
        "turn failed"
    );
    let data = serde_json::to_value(&payload).unwrap_or_default();
    append(deps, &session.session_id, EventPayload::TurnFailed(payload));
    session.publish("turn.failed", data);
}

fn provider_failure(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    provider_id: &str,
    turn: u32,
    error: &Error,
    partial: Option<&str>,
) {
    append(
        deps,
        &session.session_id,
        EventPayload::ErrorProvider(ErrorProviderPayload {
            provider: provider_id.to_owned(),
            message: error.to_string(),
        }),
    );
    fail_turn(
        deps,
        session,
        TurnFailedPayload {
            turn,
            code: matches!(error, Error::ContextOverflow { .. }).then(|| "CTX".into()),
            message: error.to_string(),
            recoverable: error.recoverable(),
            interrupted: false,
            partial_content: partial.filter(|p| !p.is_empty()).map(str::to_owned),
        },
    );
}

/// Append or log; a persistence failure mid-turn is fatal for the event
/// but must not panic the loop.
fn append(
    deps: &Arc<TurnDeps>,
    session_id: &str,
    payload: EventPayload,
) -> Option<sb_events::Event> {
    match deps.store.append(session_id, payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::error!(session_id, error = %e, "event append failed");
            None
        }
    }
}

/// Trigger hooks and persist the `hook.*` bookkeeping events.
pub(crate) async fn run_hooks(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    hook_type: HookType,
    payload: Value,
    cancel: CancellationToken,
) -> TriggerResult {
    let result = deps
        .hooks
        .trigger(hook_type, &session.session_id, payload, cancel)
        .await;

    for run in &result.runs {
        append(
            deps,
            &session.session_id,
            EventPayload::HookTriggered(HookTriggeredPayload {
                hook_name: run.hook_name.clone(),
                hook_type: run.hook_type.as_str().to_owned(),
            }),
        );
        match &run.background_execution_id {
            Some(execution_id) => {
                append(
                    deps,
                    &session.session_id,
                    EventPayload::HookBackgroundStarted(HookBackgroundStartedPayload {
                        hook_name: run.hook_name.clone(),
                        execution_id: execution_id.clone(),
                    }),
                );
            }
            None => {
                append(
                    deps,
                    &session.session_id,
                    EventPayload::HookCompleted(HookCompletedPayload {
                        hook_name: run.hook_name.clone(),
                        hook_type: run.hook_type.as_str().to_owned(),
                        outcome: run.outcome.clone(),
                        duration_ms: run.duration_ms,
                    }),
                );
            }
        }
    }

    // Finished background work from earlier triggers gets recorded too.
    for completion in deps.hooks.background().drain_completions() {
        append(
            deps,
            &session.session_id,
            EventPayload::HookBackgroundCompleted(HookBackgroundCompletedPayload {
                hook_name: completion.hook_name,
                execution_id: completion.execution_id,
                duration_ms: completion.duration_ms,
            }),
        );
    }

    result
}

// ── Context composition inputs ─────────────────────────────────────

async fn build_context_inputs(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    turn: u32,
) -> ContextInputs {
    let workdir = std::path::Path::new(&session.working_directory);

    let project_rules = read_optional(&workdir.join("RULES.md")).await;
    let workspace_memory = read_optional(&workdir.join("MEMORY.md")).await;

    // Path-scoped rules under .switchboard/rules/.
    let mut active_rules = String::new();
    let mut rule_paths = Vec::new();
    let rules_dir = workdir.join(".switchboard").join("rules");
    if let Ok(mut entries) = tokio::fs::read_dir(&rules_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                if let Ok(content) = tokio::fs::read_to_string(&path).await {
                    active_rules.push_str(&content);
                    active_rules.push('\n');
                    rule_paths.push(path.display().to_string());
                }
            }
        }
    }
    if turn == 1 && !rule_paths.is_empty() {
        rule_paths.sort();
        append(
            deps,
            &session.session_id,
            EventPayload::RulesLoaded(RulesLoadedPayload { paths: rule_paths }),
        );
    }

    // Subagent results are consumed by the next request.
    let subagent_results = {
        let mut pending = session.subagent_results.lock();
        if pending.is_empty() {
            String::new()
        } else {
            let joined = pending.join("\n\n");
            pending.clear();
            format!("# Subagent Results\n\n{joined}")
        }
    };

    let task_context = {
        let todos = session.todos.lock();
        if todos.is_empty() {
            String::new()
        } else {
            todos
                .iter()
                .map(|t| format!("- [{}] {}", status_mark(t), t.content))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    ContextInputs {
        system_prompt: SYSTEM_PROMPT.to_owned(),
        project_rules,
        workspace_memory,
        active_rules,
        skill_context: deps.skills.context_block(),
        subagent_results,
        task_context,
    }
}

fn todo_tool_definition() -> sb_domain::tool::ToolDefinition {
    sb_domain::tool::ToolDefinition {
        name: "todo_write".into(),
        description: "Replace the session's task list. Each todo needs an id, \
                      imperative content, an activeForm, and a status."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "content": {"type": "string"},
                            "activeForm": {"type": "string"},
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"],
                            },
                        },
                        "required": ["id", "content", "activeForm", "status"],
                    },
                },
            },
            "required": ["todos"],
        }),
    }
}

fn write_todos(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    arguments: &Value,
) -> sb_domain::tool::ToolResult {
    let todos: Vec<sb_domain::todo::Todo> =
        match serde_json::from_value(arguments.get("todos").cloned().unwrap_or_default()) {
            Ok(todos) => todos,
            Err(e) => {
                return sb_domain::tool::ToolResult::error(format!("invalid todos: {e}"))
            }
        };
    let count = todos.len();
    append(
        deps,
        &session.session_id,
        EventPayload::TodoWrite(sb_events::TodoWritePayload {
            todos: todos.clone(),
        }),
    );
    *session.todos.lock() = todos;
    session.publish("todo.write", serde_json::json!({"count": count}));
    sb_domain::tool::ToolResult::ok(format!("task list updated ({count} items)"))
}

fn status_mark(todo: &sb_domain::todo::Todo) -> &'static str {
    match todo.status {
        sb_domain::todo::TodoStatus::Pending => " ",
        sb_domain::todo::TodoStatus::InProgress => ">",
        sb_domain::todo::TodoStatus::Completed => "x",
    }
}

async fn read_optional(path: &std::path::Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

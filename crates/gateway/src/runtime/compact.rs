//! Compaction execution against the event log.
//!
//! Summarizes the older portion of the visible history and appends
//! `compact.boundary` + `compact.summary`, then re-appends the preserved
//! recent-turn events after the summary so reconstruction (which restarts
//! at the summary) yields {synthetic summary} + preserved turns. When
//! summarization fails nothing is appended and the context is unchanged.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sb_context::{compaction, estimate_tokens};
use sb_domain::error::{Error, Result};
use sb_domain::message::ContentBlock;
use sb_domain::todo::BacklogReason;
use sb_events::{
    CompactBoundaryPayload, CompactSummaryPayload, Event, EventPayload,
};

use crate::runtime::orchestrator::{ActiveSession, TurnDeps};
use crate::runtime::turn::reconstruct;

/// Run a full compaction for a session. Returns the boundary stats.
pub async fn execute_compaction(
    deps: &Arc<TurnDeps>,
    session: &Arc<ActiveSession>,
    cancel: CancellationToken,
) -> Result<CompactBoundaryPayload> {
    let session_id = &session.session_id;
    let preserve = deps.config.compaction.preserve_recent_turns;

    // Visible chain and the preserved-event split.
    let chain = visible_chain(deps, session_id)?;
    let messages = reconstruct(deps, session_id)?;
    let split = compaction::split_for_compaction(&messages, preserve);
    if split == 0 {
        return Err(Error::InvalidOperation(
            "nothing to compact: history fits in the preserved window".into(),
        ));
    }
    let preserved_events = preserved_event_suffix(&chain, preserve);

    // Summarize the older prefix; any failure aborts before any append.
    let summarizer_model = deps
        .providers
        .summarizer_model()
        .map(str::to_owned)
        .unwrap_or_else(|| session.model.read().clone());
    let (provider, model_name) = deps.providers.resolve(&summarizer_model)?;
    let summary = compaction::summarize(
        provider.as_ref(),
        &model_name,
        &messages[..split],
        deps.config.compaction.max_summary_tokens,
        cancel,
    )
    .await?;

    let tokens_before = {
        let current = session.budget.lock().current_tokens();
        if current > 0 {
            current
        } else {
            estimate_tokens(&messages)
        }
    };
    let tokens_after =
        (summary.len() / 4) as u64 + estimate_tokens(&messages[split..]);

    let boundary = CompactBoundaryPayload {
        original_tokens: tokens_before,
        compacted_tokens: tokens_after,
        compression_ratio: if tokens_before > 0 {
            tokens_after as f64 / tokens_before as f64
        } else {
            1.0
        },
    };

    // Boundary, then summary, then the preserved turns re-appended.
    deps.store
        .append(session_id, EventPayload::CompactBoundary(boundary.clone()))?;
    deps.store.append(
        session_id,
        EventPayload::CompactSummary(CompactSummaryPayload {
            summary: summary.clone(),
            key_decisions: None,
            files_modified: Some(files_modified(&chain)),
        }),
    )?;
    for event in &preserved_events {
        deps.store.append(session_id, event.payload.clone())?;
    }

    // Unfinished todos are snapshotted (and stay active in the session).
    let todos = session.todos.lock().clone();
    let _ = deps.store.backlog_todos(
        &todos,
        BacklogReason::ContextCompact,
        session_id,
        &session.workspace_id,
    );

    session.budget.lock().observe(tokens_after);
    session
        .prev_context_tokens
        .store(tokens_after, Ordering::SeqCst);
    session.publish(
        "compact.completed",
        serde_json::to_value(&boundary).unwrap_or_default(),
    );
    tracing::info!(
        session_id,
        tokens_before,
        tokens_after,
        preserved = preserved_events.len(),
        "context compacted"
    );

    Ok(boundary)
}

/// The session's chronological chain after the last summary/clear cut.
fn visible_chain(deps: &Arc<TurnDeps>, session_id: &str) -> Result<Vec<Event>> {
    let record = deps
        .store
        .get_session(session_id)?
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
    let Some(head) = record.head_event_id else {
        return Ok(Vec::new());
    };
    let mut chain = deps.store.get_ancestors(&head)?;
    chain.reverse();

    let cut = chain.iter().rposition(|e| {
        matches!(
            e.payload,
            EventPayload::CompactSummary(_) | EventPayload::ContextCleared(_)
        )
    });
    if let Some(cut) = cut {
        chain.drain(..=cut);
    }
    Ok(chain)
}

/// The suffix of visible events belonging to the last `preserve` turns:
/// everything from the nth-from-last real user message on, restricted to
/// the message/tool types that fold into reconstruction.
fn preserved_event_suffix(chain: &[Event], preserve: usize) -> Vec<Event> {
    if preserve == 0 {
        return Vec::new();
    }
    let mut seen_turns = 0;
    let mut start = None;
    for (i, event) in chain.iter().enumerate().rev() {
        if let EventPayload::MessageUser(p) = &event.payload {
            let has_text = p
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::Text { .. }));
            if has_text {
                seen_turns += 1;
                if seen_turns >= preserve {
                    start = Some(i);
                    break;
                }
            }
        }
    }
    let Some(start) = start else {
        return Vec::new();
    };
    chain[start..]
        .iter()
        .filter(|e| {
            matches!(
                e.payload,
                EventPayload::MessageUser(_)
                    | EventPayload::MessageAssistant(_)
                    | EventPayload::MessageSystem(_)
                    | EventPayload::ToolCall(_)
                    | EventPayload::ToolResult(_)
            )
        })
        .cloned()
        .collect()
}

/// Paths touched during the summarized region, for the summary payload.
fn files_modified(chain: &[Event]) -> Vec<String> {
    let mut files: Vec<String> = chain
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::FileWrite(p) => Some(p.path.clone()),
            EventPayload::FileEdit(p) => Some(p.path.clone()),
            EventPayload::ToolResult(p) => p.affected_files.clone().map(|f| f.join("\n")),
            _ => None,
        })
        .flat_map(|s| s.lines().map(str::to_owned).collect::<Vec<_>>())
        .collect();
    files.sort();
    files.dedup();
    files
}

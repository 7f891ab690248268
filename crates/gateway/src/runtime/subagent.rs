//! Subagent coordination: spawn child sessions, forward their streaming
//! events onto the parent's bus, wait on completion, aggregate results.
//!
//! A subagent is an ordinary session with recorded parent linkage; its
//! lifecycle is disjoint from the parent's. Forwarded events are
//! re-emitted as `agent.subagent_event` envelopes and never persisted
//! under the parent's log. The tracker holds a weak handle back to the
//! orchestrator so neither owns the other.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use sb_domain::tool::{ToolDefinition, ToolResult};
use sb_events::{
    EventPayload, HistoryOptions, SubagentCompletedPayload, SubagentFailedPayload,
    SubagentSpawnedPayload,
};

use crate::runtime::bus::Notification;
use crate::runtime::orchestrator::{ActiveSession, Orchestrator, TurnDeps};

/// Child stream kinds re-emitted on the parent bus.
const FORWARDED_KINDS: &[&str] = &[
    "stream.turn_start",
    "stream.turn_end",
    "stream.text_delta",
    "tool.call",
    "tool.result",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

struct SubagentEntry {
    parent_session_id: String,
    task: String,
    depth: u32,
    started_at: Instant,
    status: watch::Sender<SubagentStatus>,
    output: Mutex<Option<String>>,
}

#[derive(Default)]
pub struct SubagentTracker {
    orchestrator: RwLock<Weak<Orchestrator>>,
    entries: Mutex<HashMap<String, Arc<SubagentEntry>>>,
}

/// Result row for `wait_for_subagents`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitResult {
    pub sub_session_id: String,
    pub status: SubagentStatus,
    pub output: Option<String>,
    pub timed_out: bool,
}

impl SubagentTracker {
    /// Called once by the orchestrator after construction.
    pub fn bind(&self, orchestrator: Weak<Orchestrator>) {
        *self.orchestrator.write() = orchestrator;
    }

    fn orchestrator(&self) -> Option<Arc<Orchestrator>> {
        self.orchestrator.read().upgrade()
    }

    pub fn children_of(&self, parent_session_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.parent_session_id == parent_session_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn depth_of(&self, session_id: &str) -> u32 {
        self.entries
            .lock()
            .get(session_id)
            .map(|e| e.depth)
            .unwrap_or(0)
    }

    // ── Spawn ──────────────────────────────────────────────────────

    pub async fn spawn(
        self: Arc<Self>,
        deps: &Arc<TurnDeps>,
        parent: &Arc<ActiveSession>,
        task: &str,
        model: Option<&str>,
        working_directory: Option<&str>,
    ) -> sb_domain::error::Result<String> {
        let Some(orchestrator) = self.orchestrator() else {
            return Err(sb_domain::error::Error::Other(
                "orchestrator unavailable".into(),
            ));
        };

        let depth = self.depth_of(&parent.session_id) + 1;
        if depth > deps.config.subagents.max_depth {
            return Err(sb_domain::error::Error::InvalidOperation(format!(
                "subagent nesting depth {depth} exceeds the limit of {}",
                deps.config.subagents.max_depth
            )));
        }

        let model = model
            .map(str::to_owned)
            .unwrap_or_else(|| parent.model.read().clone());
        let workdir = working_directory.unwrap_or(&parent.working_directory);

        let child = orchestrator
            .create_session(workdir, Some(&model), Some("subagent"))
            .await?;
        deps.store
            .set_spawn_info(&child.id, &parent.session_id, task)?;

        let _ = deps.store.append(
            &parent.session_id,
            EventPayload::SubagentSpawned(SubagentSpawnedPayload {
                sub_session_id: child.id.clone(),
                task: task.to_owned(),
                model: model.clone(),
            }),
        );
        parent.publish(
            "subagent.spawned",
            serde_json::json!({"subSessionId": child.id, "task": task}),
        );

        let (status_tx, _) = watch::channel(SubagentStatus::Running);
        let entry = Arc::new(SubagentEntry {
            parent_session_id: parent.session_id.clone(),
            task: task.to_owned(),
            depth,
            started_at: Instant::now(),
            status: status_tx,
            output: Mutex::new(None),
        });
        self.entries.lock().insert(child.id.clone(), entry.clone());

        // Forward the child's stream onto the parent's bus, enveloped.
        if let Some(child_session) = orchestrator.get_active(&child.id) {
            let mut child_rx = child_session.bus.subscribe();
            let parent_bus = parent.bus.clone();
            let parent_id = parent.session_id.clone();
            let child_id = child.id.clone();
            tokio::spawn(async move {
                loop {
                    match child_rx.recv().await {
                        Ok(notification) => {
                            if !FORWARDED_KINDS.contains(&notification.kind.as_str()) {
                                continue;
                            }
                            parent_bus.publish(Notification::new(
                                "agent.subagent_event",
                                &parent_id,
                                serde_json::json!({
                                    "subSessionId": child_id,
                                    "event": notification,
                                }),
                            ));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        // Drive the child's turn loop and settle the entry.
        {
            let tracker = self.clone();
            let deps = deps.clone();
            let parent = parent.clone();
            let child_id = child.id.clone();
            let task = task.to_owned();
            tokio::spawn(async move {
                let run = orchestrator.prompt_and_wait(&child_id, task).await;
                tracker
                    .settle(&deps, &orchestrator, &parent, &child_id, run)
                    .await;
            });
        }

        Ok(child.id)
    }

    async fn settle(
        &self,
        deps: &Arc<TurnDeps>,
        orchestrator: &Arc<Orchestrator>,
        parent: &Arc<ActiveSession>,
        child_id: &str,
        run: sb_domain::error::Result<()>,
    ) {
        let entry = self.entries.lock().get(child_id).cloned();
        let Some(entry) = entry else { return };
        let duration_ms = entry.started_at.elapsed().as_millis() as u64;

        // The child's final assistant message is its output.
        let output = last_assistant_text(deps, child_id);
        let failed = run.is_err() || child_turn_failed(deps, child_id);

        if failed {
            let error = run
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "subagent turn failed".into());
            let _ = entry.status.send(SubagentStatus::Failed);
            let _ = deps.store.append(
                &parent.session_id,
                EventPayload::SubagentFailed(SubagentFailedPayload {
                    sub_session_id: child_id.to_owned(),
                    error: error.clone(),
                }),
            );
            parent.publish(
                "subagent.failed",
                serde_json::json!({"subSessionId": child_id, "error": error}),
            );
        } else {
            let output_text = output.clone().unwrap_or_default();
            *entry.output.lock() = output.clone();
            let _ = entry.status.send(SubagentStatus::Completed);
            let _ = deps.store.append(
                &parent.session_id,
                EventPayload::SubagentCompleted(SubagentCompletedPayload {
                    sub_session_id: child_id.to_owned(),
                    output: output_text.clone(),
                    duration_ms,
                }),
            );
            parent.subagent_results.lock().push(format!(
                "[{child_id}] task: {}\n{output_text}",
                entry.task
            ));
            parent.publish(
                "subagent.completed",
                serde_json::json!({"subSessionId": child_id, "durationMs": duration_ms}),
            );
        }

        let _ = orchestrator.delete_session(child_id, "subagent_finished").await;
    }

    // ── Wait / query ───────────────────────────────────────────────

    pub async fn wait_for(&self, ids: &[String], timeout: Duration) -> Vec<WaitResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut results = Vec::new();

        for id in ids {
            let entry = self.entries.lock().get(id).cloned();
            let Some(entry) = entry else {
                results.push(WaitResult {
                    sub_session_id: id.clone(),
                    status: SubagentStatus::Failed,
                    output: None,
                    timed_out: false,
                });
                continue;
            };

            let mut rx = entry.status.subscribe();
            let mut timed_out = false;
            loop {
                let status = *rx.borrow();
                if status != SubagentStatus::Running {
                    break;
                }
                match tokio::time::timeout_at(deadline, rx.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => break,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                }
            }

            results.push(WaitResult {
                sub_session_id: id.clone(),
                status: *entry.status.subscribe().borrow(),
                output: entry.output.lock().clone(),
                timed_out,
            });
        }

        results
    }

    pub fn query(
        &self,
        deps: &Arc<TurnDeps>,
        sub_session_id: &str,
        kind: &str,
        limit: usize,
    ) -> sb_domain::error::Result<Value> {
        let entry = self
            .entries
            .lock()
            .get(sub_session_id)
            .cloned()
            .ok_or_else(|| {
                sb_domain::error::Error::NotFound(format!("subagent {sub_session_id}"))
            })?;

        match kind {
            "status" => Ok(serde_json::json!({
                "subSessionId": sub_session_id,
                "status": *entry.status.subscribe().borrow(),
                "task": entry.task,
            })),
            "output" => Ok(serde_json::json!({
                "subSessionId": sub_session_id,
                "output": entry.output.lock().clone(),
            })),
            "events" | "logs" => {
                let page = deps.store.get_history(
                    sub_session_id,
                    &HistoryOptions {
                        limit: Some(limit),
                        ..Default::default()
                    },
                )?;
                let events: Vec<Value> = page.events.iter().map(|e| e.to_wire()).collect();
                Ok(serde_json::json!({
                    "subSessionId": sub_session_id,
                    "events": events,
                    "hasMore": page.has_more,
                }))
            }
            other => Err(sb_domain::error::Error::InvalidOperation(format!(
                "unknown query kind '{other}'"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The subagent tool surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn is_subagent_tool(name: &str) -> bool {
    matches!(
        name,
        "spawn_subagent" | "wait_for_subagents" | "query_subagent"
    )
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "spawn_subagent".into(),
            description: "Spawn a child agent session to work on a task independently. \
                          Returns the child session id immediately unless blocking is set."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "What the subagent should do"},
                    "model": {"type": "string"},
                    "working_directory": {"type": "string"},
                    "blocking": {"type": "boolean", "description": "Wait for completion"},
                },
                "required": ["task"],
            }),
        },
        ToolDefinition {
            name: "wait_for_subagents".into(),
            description: "Block until the given subagents complete or the timeout elapses."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "session_ids": {"type": "array", "items": {"type": "string"}},
                    "timeout_ms": {"type": "integer"},
                },
                "required": ["session_ids"],
            }),
        },
        ToolDefinition {
            name: "query_subagent".into(),
            description: "Inspect a subagent: status, output, or recent events.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "kind": {"type": "string", "enum": ["status", "output", "events", "logs"]},
                    "limit": {"type": "integer"},
                },
                "required": ["session_id", "kind"],
            }),
        },
    ]
}

pub(crate) async fn execute_tool(
    deps: &Arc<TurnDeps>,
    tracker: &Arc<SubagentTracker>,
    session: &Arc<ActiveSession>,
    cancel: &CancellationToken,
    tool_name: &str,
    args: &Value,
) -> ToolResult {
    match tool_name {
        "spawn_subagent" => {
            let Some(task) = args.get("task").and_then(Value::as_str) else {
                return ToolResult::error("missing required parameter 'task'");
            };
            let model = args.get("model").and_then(Value::as_str);
            let workdir = args.get("working_directory").and_then(Value::as_str);
            let blocking = args.get("blocking").and_then(Value::as_bool).unwrap_or(false);

            let child_id = match tracker.clone().spawn(deps, session, task, model, workdir).await
            {
                Ok(id) => id,
                Err(e) => return ToolResult::error(e.to_string()),
            };

            if blocking {
                let timeout =
                    Duration::from_millis(deps.config.subagents.default_wait_timeout_ms);
                let wait_ids = [child_id.clone()];
                let wait = tokio::select! {
                    results = tracker.wait_for(&wait_ids, timeout) => results,
                    _ = cancel.cancelled() => {
                        return ToolResult::interrupted(None);
                    }
                };
                let result = &wait[0];
                return ToolResult::ok(
                    result
                        .output
                        .clone()
                        .unwrap_or_else(|| format!("subagent {child_id} produced no output")),
                )
                .with_details(serde_json::json!({
                    "subSessionId": child_id,
                    "status": result.status,
                }));
            }

            ToolResult::ok(format!("spawned subagent {child_id}"))
                .with_details(serde_json::json!({"subSessionId": child_id}))
        }

        "wait_for_subagents" => {
            let ids: Vec<String> = args
                .get("session_ids")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default();
            if ids.is_empty() {
                return ToolResult::error("session_ids must be a non-empty array");
            }
            let timeout_ms = args
                .get("timeout_ms")
                .and_then(Value::as_u64)
                .unwrap_or(deps.config.subagents.default_wait_timeout_ms);

            let results = tokio::select! {
                results = tracker.wait_for(&ids, Duration::from_millis(timeout_ms)) => results,
                _ = cancel.cancelled() => return ToolResult::interrupted(None),
            };
            let summary = results
                .iter()
                .map(|r| {
                    format!(
                        "{}: {:?}{}",
                        r.sub_session_id,
                        r.status,
                        if r.timed_out { " (timed out)" } else { "" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            ToolResult::ok(summary).with_details(
                serde_json::to_value(&results)
                    .map(|v| serde_json::json!({"results": v}))
                    .unwrap_or_default(),
            )
        }

        "query_subagent" => {
            let Some(id) = args.get("session_id").and_then(Value::as_str) else {
                return ToolResult::error("missing required parameter 'session_id'");
            };
            let kind = args.get("kind").and_then(Value::as_str).unwrap_or("status");
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
            match tracker.query(deps, id, kind, limit) {
                Ok(info) => ToolResult::ok(info.to_string()),
                Err(e) => ToolResult::error(e.to_string()),
            }
        }

        other => ToolResult::error(format!("unknown subagent tool '{other}'")),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn last_assistant_text(deps: &Arc<TurnDeps>, session_id: &str) -> Option<String> {
    let page = deps
        .store
        .get_history(
            session_id,
            &HistoryOptions {
                types: Some(vec![sb_events::EventType::MessageAssistant]),
                limit: Some(1),
                ..Default::default()
            },
        )
        .ok()?;
    let event = page.events.first()?;
    match &event.payload {
        EventPayload::MessageAssistant(p) => {
            let text: String = p
                .content
                .iter()
                .filter_map(|b| match b {
                    sb_domain::message::ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn child_turn_failed(deps: &Arc<TurnDeps>, session_id: &str) -> bool {
    deps.store
        .get_history(
            session_id,
            &HistoryOptions {
                types: Some(vec![sb_events::EventType::TurnFailed]),
                limit: Some(1),
                ..Default::default()
            },
        )
        .map(|page| !page.events.is_empty())
        .unwrap_or(false)
}

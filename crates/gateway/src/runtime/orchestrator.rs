//! The session orchestrator: active session table, per-session
//! single-writer queues, and session lifecycle operations.
//!
//! Every mutating operation on a session flows through that session's
//! command queue, drained by one task — within a session all side
//! effects are sequenced; across sessions everything is parallel. The
//! table itself sits behind one lock for insert/lookup/remove only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use sb_context::ContextBudget;
use sb_domain::config::Config;
use sb_domain::error::{Error, Result};
use sb_domain::todo::{BacklogReason, Todo};
use sb_events::{
    ContextClearedPayload, EventPayload, EventStore, SessionEndPayload, SessionRecord,
};
use sb_hooks::{HookEngine, HookType};
use sb_providers::ProviderRegistry;
use sb_tools::{DenialPolicy, ToolExecutor};

use crate::runtime::bus::{Notification, SessionBus};
use crate::runtime::subagent::SubagentTracker;
use crate::runtime::turn;
use crate::skills::SkillRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the turn loop needs, bundled once at startup.
pub struct TurnDeps {
    pub store: Arc<EventStore>,
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolExecutor>,
    pub denial: Arc<DenialPolicy>,
    pub hooks: Arc<HookEngine>,
    pub skills: Arc<SkillRegistry>,
    pub config: Arc<Config>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active session record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) enum SessionCommand {
    Prompt {
        text: String,
        attachments: Vec<sb_domain::message::ContentBlock>,
        /// Fired when the prompt's turn loop finishes (subagent waits).
        notify: Option<oneshot::Sender<()>>,
    },
}

/// In-memory state for one active session.
pub struct ActiveSession {
    pub session_id: String,
    pub workspace_id: String,
    pub working_directory: String,
    pub model: RwLock<String>,
    pub bus: SessionBus,
    /// Interrupt token for the in-flight turn; replaced at each turn
    /// start so a late abort never cancels the next prompt.
    pub interrupt: Mutex<CancellationToken>,
    pub running: AtomicBool,
    pub plan_mode: AtomicBool,
    pub budget: Mutex<ContextBudget>,
    pub todos: Mutex<Vec<Todo>>,
    /// Completed-turn counter.
    pub turn: AtomicU32,
    /// Context-window tokens after the last completed turn.
    pub prev_context_tokens: AtomicU64,
    /// Pending subagent result summaries for the next composition.
    pub subagent_results: Mutex<Vec<String>>,
    /// Dropped at session end so the drainer task winds down.
    queue_tx: Mutex<Option<mpsc::Sender<SessionCommand>>>,
}

impl ActiveSession {
    /// Swap in a fresh interrupt token and return it.
    pub fn arm_interrupt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.interrupt.lock() = token.clone();
        token
    }

    pub fn fire_interrupt(&self) {
        self.interrupt.lock().cancel();
    }

    pub fn publish(&self, kind: &str, data: serde_json::Value) {
        self.bus
            .publish(Notification::new(kind, &self.session_id, data));
    }

    fn queue_sender(&self) -> Result<mpsc::Sender<SessionCommand>> {
        self.queue_tx
            .lock()
            .clone()
            .ok_or_else(|| Error::InvalidOperation("session has ended".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    deps: Arc<TurnDeps>,
    active: RwLock<HashMap<String, Arc<ActiveSession>>>,
    pub subagents: Arc<SubagentTracker>,
}

impl Orchestrator {
    pub fn new(deps: TurnDeps) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            deps: Arc::new(deps),
            active: RwLock::new(HashMap::new()),
            subagents: Arc::new(SubagentTracker::default()),
        });
        orchestrator
            .subagents
            .bind(Arc::downgrade(&orchestrator));
        orchestrator
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.deps.store
    }

    pub fn deps(&self) -> &Arc<TurnDeps> {
        &self.deps
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Create a session (and its workspace if this is the first session
    /// in the directory), activate it, and return the record.
    pub async fn create_session(
        &self,
        working_directory: &str,
        model: Option<&str>,
        title: Option<&str>,
    ) -> Result<SessionRecord> {
        let model = match model {
            Some(m) => m.to_owned(),
            None => self.deps.providers.default_model()?,
        };
        let (record, _root) = self.deps.store.create_session(
            working_directory,
            working_directory,
            &model,
            title,
        )?;

        let session = self.activate(&record, None);
        let hook_result = turn::run_hooks(
            &self.deps,
            &session,
            HookType::SessionStart,
            serde_json::json!({
                "workingDirectory": working_directory,
                "model": model,
            }),
            CancellationToken::new(),
        )
        .await;
        // SessionStart modifications inject system context.
        for modification in hook_result.modifications {
            if let Some(text) = modification.get("systemContext").and_then(|v| v.as_str()) {
                let _ = self.deps.store.append(
                    &record.id,
                    EventPayload::MessageSystem(sb_events::MessageSystemPayload {
                        content: text.to_owned(),
                    }),
                );
            }
        }
        session.publish("session.created", serde_json::json!({"model": session_model(&session)}));
        Ok(record)
    }

    /// Idempotent: an already-active session is returned as-is; an idle
    /// one is rematerialized by folding its event log.
    pub fn resume(&self, session_id: &str) -> Result<Arc<ActiveSession>> {
        if let Some(existing) = self.active.read().get(session_id) {
            return Ok(existing.clone());
        }

        let record = self
            .deps
            .store
            .get_session(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        let state = match record.head_event_id.as_deref() {
            Some(head) => {
                let mut chain = self.deps.store.get_ancestors(head)?;
                chain.reverse();
                Some(sb_events::reconstruct_state(&chain))
            }
            None => None,
        };

        Ok(self.activate(&record, state))
    }

    pub fn get_active(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.active.read().get(session_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    fn activate(
        &self,
        record: &SessionRecord,
        state: Option<sb_events::ReconstructedState>,
    ) -> Arc<ActiveSession> {
        let mut table = self.active.write();
        if let Some(existing) = table.get(&record.id) {
            return existing.clone();
        }

        let (queue_tx, queue_rx) =
            mpsc::channel::<SessionCommand>(self.deps.config.sessions.queue_depth);

        let model = state
            .as_ref()
            .filter(|s| !s.model.is_empty())
            .map(|s| s.model.clone())
            .unwrap_or_else(|| record.model.clone());

        let window = self
            .deps
            .providers
            .resolve(&model)
            .map(|(provider, model_name)| provider.context_window(&model_name))
            .unwrap_or(0);
        let mut budget = ContextBudget::new(&self.deps.config.context, window);
        if let Some(ref s) = state {
            budget.observe(s.last_context_tokens);
        }

        let session = Arc::new(ActiveSession {
            session_id: record.id.clone(),
            workspace_id: record.workspace_id.clone(),
            working_directory: record.working_directory.clone(),
            model: RwLock::new(model),
            bus: SessionBus::new(self.deps.config.server.subscriber_buffer),
            interrupt: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
            plan_mode: AtomicBool::new(
                state.as_ref().map(|s| s.plan_mode).unwrap_or(false),
            ),
            budget: Mutex::new(budget),
            todos: Mutex::new(state.as_ref().map(|s| s.todos.clone()).unwrap_or_default()),
            turn: AtomicU32::new(state.as_ref().map(|s| s.turn_count).unwrap_or(0)),
            prev_context_tokens: AtomicU64::new(
                state.as_ref().map(|s| s.last_context_tokens).unwrap_or(0),
            ),
            subagent_results: Mutex::new(Vec::new()),
            queue_tx: Mutex::new(Some(queue_tx)),
        });

        table.insert(record.id.clone(), session.clone());
        drop(table);

        self.spawn_drainer(session.clone(), queue_rx);
        tracing::debug!(session_id = %record.id, "session activated");
        session
    }

    /// The single-writer loop: one command at a time, in arrival order.
    fn spawn_drainer(
        &self,
        session: Arc<ActiveSession>,
        mut queue_rx: mpsc::Receiver<SessionCommand>,
    ) {
        let deps = self.deps.clone();
        let subagents = self.subagents.clone();
        tokio::spawn(async move {
            while let Some(command) = queue_rx.recv().await {
                match command {
                    SessionCommand::Prompt {
                        text,
                        attachments,
                        notify,
                    } => {
                        session.running.store(true, Ordering::SeqCst);
                        turn::run_prompt(&deps, &subagents, &session, text, attachments)
                            .await;
                        session.running.store(false, Ordering::SeqCst);
                        if let Some(notify) = notify {
                            let _ = notify.send(());
                        }
                    }
                }
            }
        });
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Enqueue a prompt; acknowledged immediately, executed in order.
    pub async fn prompt(
        &self,
        session_id: &str,
        text: String,
        attachments: Vec<sb_domain::message::ContentBlock>,
    ) -> Result<()> {
        let session = self.resume(session_id)?;
        session
            .queue_sender()?
            .send(SessionCommand::Prompt {
                text,
                attachments,
                notify: None,
            })
            .await
            .map_err(|_| Error::InvalidOperation("session queue closed".into()))
    }

    /// Enqueue a prompt and wait for its turn loop to finish (used by
    /// the subagent coordinator).
    pub async fn prompt_and_wait(&self, session_id: &str, text: String) -> Result<()> {
        let session = self.resume(session_id)?;
        let (notify, done) = oneshot::channel();
        session
            .queue_sender()?
            .send(SessionCommand::Prompt {
                text,
                attachments: Vec::new(),
                notify: Some(notify),
            })
            .await
            .map_err(|_| Error::InvalidOperation("session queue closed".into()))?;
        let _ = done.await;
        Ok(())
    }

    /// Fire the session's interrupt signal.
    pub fn abort(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.get_active(session_id) else {
            // Aborting an idle session is a no-op, not an error.
            return Ok(false);
        };
        session.fire_interrupt();
        // Children cancel with the parent.
        for child_id in self.subagents.children_of(session_id) {
            if let Some(child) = self.get_active(&child_id) {
                child.fire_interrupt();
            }
        }
        Ok(true)
    }

    /// Fork at an event (default: head); the child starts idle.
    pub fn fork(
        &self,
        session_id: &str,
        at_event_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<SessionRecord> {
        let (record, _root) = self
            .deps
            .store
            .fork(session_id, at_event_id, None, title)?;
        Ok(record)
    }

    /// Switch the model mid-session.
    pub fn switch_model(&self, session_id: &str, new_model: &str) -> Result<()> {
        // Reject unknown providers up front.
        let (provider, model_name) = self.deps.providers.resolve(new_model)?;

        let record = self
            .deps
            .store
            .get_session(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        if record.model == new_model {
            return Ok(());
        }

        self.deps.store.append(
            session_id,
            EventPayload::ConfigModelSwitch(sb_events::ConfigModelSwitchPayload {
                from_model: record.model.clone(),
                to_model: new_model.to_owned(),
            }),
        )?;
        self.deps.store.set_session_model(session_id, new_model)?;

        if let Some(session) = self.get_active(session_id) {
            *session.model.write() = new_model.to_owned();
            session
                .budget
                .lock()
                .set_window(provider.context_window(&model_name));
            session.publish(
                "config.model_switch",
                serde_json::json!({"toModel": new_model}),
            );
        }
        Ok(())
    }

    /// Emit `context.cleared`; earlier messages disappear from
    /// reconstruction while remaining in the log.
    pub fn clear_context(&self, session_id: &str, reason: &str) -> Result<ContextClearedPayload> {
        let session = self.resume(session_id)?;
        let tokens_before = session.budget.lock().current_tokens();

        // Unfinished todos survive onto the backlog.
        let todos = session.todos.lock().clone();
        let _ = self.deps.store.backlog_todos(
            &todos,
            BacklogReason::SessionClear,
            session_id,
            &session.workspace_id,
        );
        session.todos.lock().clear();

        let payload = ContextClearedPayload {
            tokens_before,
            tokens_after: 0,
            reason: reason.to_owned(),
        };
        self.deps
            .store
            .append(session_id, EventPayload::ContextCleared(payload.clone()))?;

        session.budget.lock().observe(0);
        session.prev_context_tokens.store(0, Ordering::SeqCst);
        session.publish(
            "context.cleared",
            serde_json::to_value(&payload).unwrap_or_default(),
        );
        Ok(payload)
    }

    /// End a session: hooks drain, todos backlog, `session.end` lands,
    /// the active record is torn down. Events persist.
    pub async fn delete_session(&self, session_id: &str, reason: &str) -> Result<()> {
        if let Some(session) = self.get_active(session_id) {
            session.fire_interrupt();
            session.queue_tx.lock().take();

            turn::run_hooks(
                &self.deps,
                &session,
                HookType::SessionEnd,
                serde_json::json!({"reason": reason}),
                CancellationToken::new(),
            )
            .await;
            self.deps
                .hooks
                .background()
                .wait_for_all(std::time::Duration::from_millis(
                    self.deps.config.sessions.hook_drain_timeout_ms,
                ))
                .await;

            let todos = session.todos.lock().clone();
            let _ = self.deps.store.backlog_todos(
                &todos,
                BacklogReason::SessionEnd,
                session_id,
                &session.workspace_id,
            );
        }

        self.deps.store.append(
            session_id,
            EventPayload::SessionEnd(SessionEndPayload {
                reason: reason.to_owned(),
            }),
        )?;
        self.deps.store.end_session(session_id)?;
        self.active.write().remove(session_id);
        tracing::debug!(session_id, "session ended");
        Ok(())
    }

    /// Flip the session's plan-mode flag; a no-op when already there.
    pub fn set_plan_mode(&self, session_id: &str, enabled: bool) -> Result<()> {
        let session = self.resume(session_id)?;
        let was = session.plan_mode.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            let (payload, kind) = if enabled {
                (
                    EventPayload::PlanModeEntered(Default::default()),
                    "plan.mode_entered",
                )
            } else {
                (
                    EventPayload::PlanModeExited(Default::default()),
                    "plan.mode_exited",
                )
            };
            self.deps.store.append(session_id, payload)?;
            session.publish(kind, serde_json::json!({}));
        }
        Ok(())
    }
}

fn session_model(session: &ActiveSession) -> String {
    session.model.read().clone()
}

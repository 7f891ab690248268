//! Typed lifecycle hooks with blocking and background modes.
//!
//! Hooks of a matching type run priority-descending when the gateway
//! triggers a lifecycle point. A blocking hook can halt the pipeline
//! (`Block`) or merge a modification record into the triggering context
//! (`Modify`); background hooks are detached work units tracked until
//! session end, where `wait_for_all` lingers up to a deadline and then
//! abandons the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HookType {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Stop,
    PreCompact,
    SessionStart,
    SessionEnd,
}

impl HookType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::PreCompact => "PreCompact",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
        }
    }

    /// Types that can modify or block the agent; these run blocking
    /// regardless of the declared mode.
    pub fn forced_blocking(self) -> bool {
        matches!(
            self,
            Self::PreToolUse | Self::UserPromptSubmit | Self::PreCompact
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookMode {
    #[default]
    Blocking,
    Background,
}

/// What a hook handler decided.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    Continue,
    /// Halt the pipeline with a reason.
    Block { reason: String },
    /// Merge a modification record into the triggering context.
    Modify { modification: Value },
}

impl HookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Block { .. } => "block",
            Self::Modify { .. } => "modify",
        }
    }
}

/// Input handed to a handler.
#[derive(Debug, Clone)]
pub struct HookInvocation {
    pub hook_type: HookType,
    pub session_id: String,
    /// Type-specific context (tool name + args, prompt text, …).
    pub payload: Value,
    pub cancellation: CancellationToken,
}

pub type HookHandler =
    Arc<dyn Fn(HookInvocation) -> BoxFuture<'static, HookOutcome> + Send + Sync>;

pub struct Hook {
    pub name: String,
    pub hook_type: HookType,
    /// Higher runs earlier.
    pub priority: i32,
    pub mode: HookMode,
    pub handler: HookHandler,
}

impl Hook {
    /// Declared mode, with the forced-blocking override applied.
    fn effective_mode(&self) -> HookMode {
        if self.hook_type.forced_blocking() {
            HookMode::Blocking
        } else {
            self.mode
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trigger results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One hook's run, for event emission by the caller.
#[derive(Debug, Clone)]
pub struct HookRun {
    pub hook_name: String,
    pub hook_type: HookType,
    pub outcome: String,
    pub duration_ms: u64,
    /// Set when the hook was detached to the background.
    pub background_execution_id: Option<String>,
}

/// The aggregate of one trigger.
#[derive(Debug, Clone)]
pub struct TriggerResult {
    /// `Some(reason)` when a hook blocked the pipeline.
    pub blocked: Option<String>,
    /// Modification records, in execution order.
    pub modifications: Vec<Value>,
    pub runs: Vec<HookRun>,
}

impl TriggerResult {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct HookEngine {
    hooks: RwLock<Vec<Arc<Hook>>>,
    background: BackgroundTracker,
}

impl HookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Hook) {
        self.hooks.write().push(Arc::new(hook));
    }

    pub fn background(&self) -> &BackgroundTracker {
        &self.background
    }

    /// Run all hooks of `hook_type`, priority descending.
    ///
    /// Blocking hooks run inline; `Block` halts the remainder of the
    /// pipeline. Background hooks detach and never delay the turn.
    pub async fn trigger(
        &self,
        hook_type: HookType,
        session_id: &str,
        payload: Value,
        cancellation: CancellationToken,
    ) -> TriggerResult {
        let mut matching: Vec<Arc<Hook>> = self
            .hooks
            .read()
            .iter()
            .filter(|h| h.hook_type == hook_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut result = TriggerResult {
            blocked: None,
            modifications: Vec::new(),
            runs: Vec::new(),
        };

        for hook in matching {
            let invocation = HookInvocation {
                hook_type,
                session_id: session_id.to_owned(),
                payload: payload.clone(),
                cancellation: cancellation.clone(),
            };

            match hook.effective_mode() {
                HookMode::Background => {
                    let execution_id = self.background.launch(&hook, invocation);
                    result.runs.push(HookRun {
                        hook_name: hook.name.clone(),
                        hook_type,
                        outcome: "background".into(),
                        duration_ms: 0,
                        background_execution_id: Some(execution_id),
                    });
                }
                HookMode::Blocking => {
                    let started = Instant::now();
                    let outcome = (hook.handler)(invocation).await;
                    let duration_ms = started.elapsed().as_millis() as u64;
                    result.runs.push(HookRun {
                        hook_name: hook.name.clone(),
                        hook_type,
                        outcome: outcome.label().into(),
                        duration_ms,
                        background_execution_id: None,
                    });
                    match outcome {
                        HookOutcome::Continue => {}
                        HookOutcome::Modify { modification } => {
                            result.modifications.push(modification);
                        }
                        HookOutcome::Block { reason } => {
                            tracing::info!(
                                hook = %hook.name,
                                hook_type = hook_type.as_str(),
                                reason,
                                "hook blocked pipeline"
                            );
                            result.blocked = Some(reason);
                            break;
                        }
                    }
                }
            }
        }

        result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A finished background execution, drained by the caller for event
/// emission.
#[derive(Debug, Clone)]
pub struct BackgroundCompletion {
    pub execution_id: String,
    pub hook_name: String,
    pub duration_ms: u64,
}

#[derive(Default)]
pub struct BackgroundTracker {
    tasks: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
    completions: Arc<Mutex<Vec<BackgroundCompletion>>>,
}

impl BackgroundTracker {
    fn launch(&self, hook: &Arc<Hook>, invocation: HookInvocation) -> String {
        let execution_id = format!("hx_{}", uuid::Uuid::new_v4());
        let hook = hook.clone();
        let completions = self.completions.clone();
        let id = execution_id.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let _ = (hook.handler)(invocation).await;
            completions.lock().push(BackgroundCompletion {
                execution_id: id,
                hook_name: hook.name.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        });

        self.tasks.lock().insert(execution_id.clone(), handle);
        execution_id
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Drain completion records accumulated since the last call.
    pub fn drain_completions(&self) -> Vec<BackgroundCompletion> {
        std::mem::take(&mut *self.completions.lock())
    }

    /// Wait for every tracked task up to `timeout`; whatever is still
    /// running afterwards is abandoned (left to finish unobserved).
    pub async fn wait_for_all(&self, timeout: Duration) -> bool {
        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock();
            tasks.drain().map(|(_, h)| h).collect()
        };
        if handles.is_empty() {
            return true;
        }

        let all = futures_util::future::join_all(handles);
        match tokio::time::timeout(timeout, all).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!("background hooks still running at deadline; abandoning");
                false
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hook(
        name: &str,
        hook_type: HookType,
        priority: i32,
        mode: HookMode,
        outcome: HookOutcome,
    ) -> Hook {
        let outcome = Arc::new(outcome);
        Hook {
            name: name.into(),
            hook_type,
            priority,
            mode,
            handler: Arc::new(move |_inv| {
                let outcome = outcome.as_ref().clone();
                Box::pin(async move { outcome })
            }),
        }
    }

    #[tokio::test]
    async fn priority_order_and_modify_collection() {
        let engine = HookEngine::new();
        engine.register(hook(
            "low",
            HookType::UserPromptSubmit,
            1,
            HookMode::Blocking,
            HookOutcome::Modify {
                modification: serde_json::json!({"order": "second"}),
            },
        ));
        engine.register(hook(
            "high",
            HookType::UserPromptSubmit,
            10,
            HookMode::Blocking,
            HookOutcome::Modify {
                modification: serde_json::json!({"order": "first"}),
            },
        ));

        let result = engine
            .trigger(
                HookType::UserPromptSubmit,
                "s1",
                serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;

        assert!(!result.is_blocked());
        assert_eq!(result.modifications.len(), 2);
        assert_eq!(result.modifications[0]["order"], "first");
        assert_eq!(result.runs[0].hook_name, "high");
    }

    #[tokio::test]
    async fn block_halts_pipeline() {
        let engine = HookEngine::new();
        engine.register(hook(
            "gate",
            HookType::PreToolUse,
            10,
            HookMode::Blocking,
            HookOutcome::Block {
                reason: "not allowed".into(),
            },
        ));
        let ran_after = Arc::new(AtomicUsize::new(0));
        let counter = ran_after.clone();
        engine.register(Hook {
            name: "after".into(),
            hook_type: HookType::PreToolUse,
            priority: 1,
            mode: HookMode::Blocking,
            handler: Arc::new(move |_inv| {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { HookOutcome::Continue })
            }),
        });

        let result = engine
            .trigger(
                HookType::PreToolUse,
                "s1",
                serde_json::json!({"tool": "bash"}),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.blocked.as_deref(), Some("not allowed"));
        assert_eq!(ran_after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn forced_blocking_ignores_declared_background() {
        let engine = HookEngine::new();
        // Declared background on a PreToolUse hook: still runs blocking.
        engine.register(hook(
            "must-block",
            HookType::PreToolUse,
            0,
            HookMode::Background,
            HookOutcome::Block {
                reason: "forced".into(),
            },
        ));
        let result = engine
            .trigger(
                HookType::PreToolUse,
                "s1",
                serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_blocked());
        assert!(result.runs[0].background_execution_id.is_none());
    }

    #[tokio::test]
    async fn background_hooks_do_not_delay_and_complete() {
        let engine = HookEngine::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        engine.register(Hook {
            name: "bg".into(),
            hook_type: HookType::SessionEnd,
            priority: 0,
            mode: HookMode::Background,
            handler: Arc::new(move |_inv| {
                let counter = counter.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    HookOutcome::Continue
                })
            }),
        });

        let result = engine
            .trigger(
                HookType::SessionEnd,
                "s1",
                serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;
        // Trigger returned before the hook finished.
        assert_eq!(result.runs[0].outcome, "background");
        assert!(result.runs[0].background_execution_id.is_some());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let drained = engine.background().wait_for_all(Duration::from_secs(1)).await;
        assert!(drained);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let completions = engine.background().drain_completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].hook_name, "bg");
    }

    #[tokio::test]
    async fn wait_for_all_abandons_at_deadline() {
        let engine = HookEngine::new();
        engine.register(Hook {
            name: "slowpoke".into(),
            hook_type: HookType::SessionEnd,
            priority: 0,
            mode: HookMode::Background,
            handler: Arc::new(|_inv| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    HookOutcome::Continue
                })
            }),
        });
        engine
            .trigger(
                HookType::SessionEnd,
                "s1",
                serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;

        let drained = engine
            .background()
            .wait_for_all(Duration::from_millis(20))
            .await;
        assert!(!drained);
    }

    #[tokio::test]
    async fn unrelated_types_do_not_fire() {
        let engine = HookEngine::new();
        engine.register(hook(
            "stop-only",
            HookType::Stop,
            0,
            HookMode::Blocking,
            HookOutcome::Block {
                reason: "nope".into(),
            },
        ));
        let result = engine
            .trigger(
                HookType::SessionStart,
                "s1",
                serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_blocked());
        assert!(result.runs.is_empty());
    }
}

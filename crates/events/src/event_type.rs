//! The [`EventType`] enum — every session event type discriminator.
//!
//! Each variant has an exact `#[serde(rename)]` matching the dot-separated
//! wire string (e.g. `"session.start"`), so the enum round-trips through
//! the RPC protocol and the database `type` column unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// All session event types (closed set).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // -- Session lifecycle --
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.end")]
    SessionEnd,
    /// Session forked from another session's event.
    #[serde(rename = "session.fork")]
    SessionFork,
    /// In-session branch marker (rewind within the same session).
    #[serde(rename = "session.branch")]
    SessionBranch,

    // -- Messages --
    #[serde(rename = "message.user")]
    MessageUser,
    #[serde(rename = "message.assistant")]
    MessageAssistant,
    #[serde(rename = "message.system")]
    MessageSystem,
    /// Soft delete pointing at an earlier message event.
    #[serde(rename = "message.deleted")]
    MessageDeleted,

    // -- Tools --
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,

    // -- Streaming --
    #[serde(rename = "stream.turn_start")]
    StreamTurnStart,
    #[serde(rename = "stream.turn_end")]
    StreamTurnEnd,
    #[serde(rename = "stream.text_delta")]
    StreamTextDelta,
    #[serde(rename = "stream.thinking_delta")]
    StreamThinkingDelta,

    // -- Config --
    #[serde(rename = "config.model_switch")]
    ConfigModelSwitch,
    #[serde(rename = "config.prompt_update")]
    ConfigPromptUpdate,
    #[serde(rename = "config.reasoning_level")]
    ConfigReasoningLevel,

    // -- Compaction / context --
    #[serde(rename = "compact.boundary")]
    CompactBoundary,
    #[serde(rename = "compact.summary")]
    CompactSummary,
    #[serde(rename = "context.cleared")]
    ContextCleared,

    // -- Files --
    #[serde(rename = "file.read")]
    FileRead,
    #[serde(rename = "file.write")]
    FileWrite,
    #[serde(rename = "file.edit")]
    FileEdit,

    // -- Worktree --
    #[serde(rename = "worktree.acquired")]
    WorktreeAcquired,
    #[serde(rename = "worktree.commit")]
    WorktreeCommit,
    #[serde(rename = "worktree.released")]
    WorktreeReleased,
    #[serde(rename = "worktree.merged")]
    WorktreeMerged,

    // -- Subagents --
    #[serde(rename = "subagent.spawned")]
    SubagentSpawned,
    #[serde(rename = "subagent.status_update")]
    SubagentStatusUpdate,
    #[serde(rename = "subagent.completed")]
    SubagentCompleted,
    #[serde(rename = "subagent.failed")]
    SubagentFailed,

    // -- Hooks --
    #[serde(rename = "hook.triggered")]
    HookTriggered,
    #[serde(rename = "hook.completed")]
    HookCompleted,
    #[serde(rename = "hook.background_started")]
    HookBackgroundStarted,
    #[serde(rename = "hook.background_completed")]
    HookBackgroundCompleted,

    // -- Rules / plan / todos --
    #[serde(rename = "rules.loaded")]
    RulesLoaded,
    #[serde(rename = "plan.mode_entered")]
    PlanModeEntered,
    #[serde(rename = "plan.mode_exited")]
    PlanModeExited,
    #[serde(rename = "plan.created")]
    PlanCreated,
    #[serde(rename = "todo.write")]
    TodoWrite,

    // -- Errors --
    #[serde(rename = "error.agent")]
    ErrorAgent,
    #[serde(rename = "error.tool")]
    ErrorTool,
    #[serde(rename = "error.provider")]
    ErrorProvider,
    #[serde(rename = "turn.failed")]
    TurnFailed,
}

/// All event type variants in definition order.
pub const ALL_EVENT_TYPES: [EventType; 44] = [
    EventType::SessionStart,
    EventType::SessionEnd,
    EventType::SessionFork,
    EventType::SessionBranch,
    EventType::MessageUser,
    EventType::MessageAssistant,
    EventType::MessageSystem,
    EventType::MessageDeleted,
    EventType::ToolCall,
    EventType::ToolResult,
    EventType::StreamTurnStart,
    EventType::StreamTurnEnd,
    EventType::StreamTextDelta,
    EventType::StreamThinkingDelta,
    EventType::ConfigModelSwitch,
    EventType::ConfigPromptUpdate,
    EventType::ConfigReasoningLevel,
    EventType::CompactBoundary,
    EventType::CompactSummary,
    EventType::ContextCleared,
    EventType::FileRead,
    EventType::FileWrite,
    EventType::FileEdit,
    EventType::WorktreeAcquired,
    EventType::WorktreeCommit,
    EventType::WorktreeReleased,
    EventType::WorktreeMerged,
    EventType::SubagentSpawned,
    EventType::SubagentStatusUpdate,
    EventType::SubagentCompleted,
    EventType::SubagentFailed,
    EventType::HookTriggered,
    EventType::HookCompleted,
    EventType::HookBackgroundStarted,
    EventType::HookBackgroundCompleted,
    EventType::RulesLoaded,
    EventType::PlanModeEntered,
    EventType::PlanModeExited,
    EventType::PlanCreated,
    EventType::TodoWrite,
    EventType::ErrorAgent,
    EventType::ErrorTool,
    EventType::ErrorProvider,
    EventType::TurnFailed,
];

impl EventType {
    /// Return the canonical string representation (e.g. `"session.start"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session.start",
            Self::SessionEnd => "session.end",
            Self::SessionFork => "session.fork",
            Self::SessionBranch => "session.branch",
            Self::MessageUser => "message.user",
            Self::MessageAssistant => "message.assistant",
            Self::MessageSystem => "message.system",
            Self::MessageDeleted => "message.deleted",
            Self::ToolCall => "tool.call",
            Self::ToolResult => "tool.result",
            Self::StreamTurnStart => "stream.turn_start",
            Self::StreamTurnEnd => "stream.turn_end",
            Self::StreamTextDelta => "stream.text_delta",
            Self::StreamThinkingDelta => "stream.thinking_delta",
            Self::ConfigModelSwitch => "config.model_switch",
            Self::ConfigPromptUpdate => "config.prompt_update",
            Self::ConfigReasoningLevel => "config.reasoning_level",
            Self::CompactBoundary => "compact.boundary",
            Self::CompactSummary => "compact.summary",
            Self::ContextCleared => "context.cleared",
            Self::FileRead => "file.read",
            Self::FileWrite => "file.write",
            Self::FileEdit => "file.edit",
            Self::WorktreeAcquired => "worktree.acquired",
            Self::WorktreeCommit => "worktree.commit",
            Self::WorktreeReleased => "worktree.released",
            Self::WorktreeMerged => "worktree.merged",
            Self::SubagentSpawned => "subagent.spawned",
            Self::SubagentStatusUpdate => "subagent.status_update",
            Self::SubagentCompleted => "subagent.completed",
            Self::SubagentFailed => "subagent.failed",
            Self::HookTriggered => "hook.triggered",
            Self::HookCompleted => "hook.completed",
            Self::HookBackgroundStarted => "hook.background_started",
            Self::HookBackgroundCompleted => "hook.background_completed",
            Self::RulesLoaded => "rules.loaded",
            Self::PlanModeEntered => "plan.mode_entered",
            Self::PlanModeExited => "plan.mode_exited",
            Self::PlanCreated => "plan.created",
            Self::TodoWrite => "todo.write",
            Self::ErrorAgent => "error.agent",
            Self::ErrorTool => "error.tool",
            Self::ErrorProvider => "error.provider",
            Self::TurnFailed => "turn.failed",
        }
    }

    /// Whether this is a reconstructable message event (`message.*` minus
    /// the soft-delete marker).
    #[must_use]
    pub fn is_message_type(self) -> bool {
        matches!(
            self,
            Self::MessageUser | Self::MessageAssistant | Self::MessageSystem
        )
    }

    /// Whether this is a streaming event (`stream.*`). Streaming events are
    /// persisted but never folded into reconstruction.
    #[must_use]
    pub fn is_streaming_type(self) -> bool {
        matches!(
            self,
            Self::StreamTurnStart
                | Self::StreamTurnEnd
                | Self::StreamTextDelta
                | Self::StreamThinkingDelta
        )
    }

    /// Whether a `message.deleted` event may target this type.
    #[must_use]
    pub fn is_deletable(self) -> bool {
        matches!(
            self,
            Self::MessageUser | Self::MessageAssistant | Self::ToolResult
        )
    }

    /// Whether the payload carries searchable text for the content index.
    #[must_use]
    pub fn is_indexed(self) -> bool {
        matches!(
            self,
            Self::MessageUser
                | Self::MessageAssistant
                | Self::MessageSystem
                | Self::ToolCall
                | Self::ToolResult
                | Self::CompactSummary
        )
    }

    /// The domain prefix (e.g. `"session"`, `"message"`, `"tool"`).
    #[must_use]
    pub fn domain(self) -> &'static str {
        let s = self.as_str();
        s.split('.').next().unwrap_or(s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // The `#[serde(rename)]` attributes are the source of truth.
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

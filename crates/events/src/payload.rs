//! Typed payload records, one per event variant.
//!
//! [`EventPayload`] is the closed union the rest of the system appends and
//! folds; the database stores the payload JSON next to the `type` column,
//! so the two halves are recombined with [`EventPayload::from_parts`] on
//! read and split with [`EventPayload::event_type`] + [`EventPayload::to_value`]
//! on write. Field names are the wire format — camelCase throughout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sb_domain::message::ContentBlock;
use sb_domain::stream::StopReason;
use sb_domain::todo::Todo;
use sb_domain::tokens::{TokenRecord, TokenUsage};

use crate::error::{StoreError, StoreResult};
use crate::event_type::EventType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-variant records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartPayload {
    pub working_directory: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionForkPayload {
    pub parent_session_id: String,
    pub parent_event_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBranchPayload {
    pub from_event_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUserPayload {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAssistantPayload {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    /// Set when the turn was cancelled mid-stream and the message carries
    /// only the content streamed before the signal.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSystemPayload {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub target_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTurnStartPayload {
    pub turn: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTurnEndPayload {
    pub turn: u32,
    /// Legacy triple kept for older clients.
    pub token_usage: TokenUsage,
    /// Canonical normalized record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_record: Option<TokenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTextDeltaPayload {
    pub turn: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamThinkingDeltaPayload {
    pub turn: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigModelSwitchPayload {
    pub from_model: String,
    pub to_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPromptUpdatePayload {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReasoningLevelPayload {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactBoundaryPayload {
    pub original_tokens: u64,
    pub compacted_tokens: u64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactSummaryPayload {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_decisions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextClearedPayload {
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReadPayload {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWritePayload {
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEditPayload {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeAcquiredPayload {
    pub path: String,
    pub branch: String,
    pub base_commit: String,
    pub isolated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeCommitPayload {
    pub path: String,
    pub commit: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeReleasedPayload {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeMergedPayload {
    pub path: String,
    pub into_branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentSpawnedPayload {
    pub sub_session_id: String,
    pub task: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentStatusUpdatePayload {
    pub sub_session_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentCompletedPayload {
    pub sub_session_id: String,
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentFailedPayload {
    pub sub_session_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookTriggeredPayload {
    pub hook_name: String,
    pub hook_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookCompletedPayload {
    pub hook_name: String,
    pub hook_type: String,
    pub outcome: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBackgroundStartedPayload {
    pub hook_name: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBackgroundCompletedPayload {
    pub hook_name: String,
    pub execution_id: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesLoadedPayload {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanModeEnteredPayload {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanModeExitedPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCreatedPayload {
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoWritePayload {
    pub todos: Vec<Todo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAgentPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorToolPayload {
    pub tool_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorProviderPayload {
    pub provider: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFailedPayload {
    pub turn: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_content: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The closed union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every appendable payload, keyed by [`EventType`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SessionStart(SessionStartPayload),
    SessionEnd(SessionEndPayload),
    SessionFork(SessionForkPayload),
    SessionBranch(SessionBranchPayload),
    MessageUser(MessageUserPayload),
    MessageAssistant(MessageAssistantPayload),
    MessageSystem(MessageSystemPayload),
    MessageDeleted(MessageDeletedPayload),
    ToolCall(ToolCallPayload),
    ToolResult(ToolResultPayload),
    StreamTurnStart(StreamTurnStartPayload),
    StreamTurnEnd(StreamTurnEndPayload),
    StreamTextDelta(StreamTextDeltaPayload),
    StreamThinkingDelta(StreamThinkingDeltaPayload),
    ConfigModelSwitch(ConfigModelSwitchPayload),
    ConfigPromptUpdate(ConfigPromptUpdatePayload),
    ConfigReasoningLevel(ConfigReasoningLevelPayload),
    CompactBoundary(CompactBoundaryPayload),
    CompactSummary(CompactSummaryPayload),
    ContextCleared(ContextClearedPayload),
    FileRead(FileReadPayload),
    FileWrite(FileWritePayload),
    FileEdit(FileEditPayload),
    WorktreeAcquired(WorktreeAcquiredPayload),
    WorktreeCommit(WorktreeCommitPayload),
    WorktreeReleased(WorktreeReleasedPayload),
    WorktreeMerged(WorktreeMergedPayload),
    SubagentSpawned(SubagentSpawnedPayload),
    SubagentStatusUpdate(SubagentStatusUpdatePayload),
    SubagentCompleted(SubagentCompletedPayload),
    SubagentFailed(SubagentFailedPayload),
    HookTriggered(HookTriggeredPayload),
    HookCompleted(HookCompletedPayload),
    HookBackgroundStarted(HookBackgroundStartedPayload),
    HookBackgroundCompleted(HookBackgroundCompletedPayload),
    RulesLoaded(RulesLoadedPayload),
    PlanModeEntered(PlanModeEnteredPayload),
    PlanModeExited(PlanModeExitedPayload),
    PlanCreated(PlanCreatedPayload),
    TodoWrite(TodoWritePayload),
    ErrorAgent(ErrorAgentPayload),
    ErrorTool(ErrorToolPayload),
    ErrorProvider(ErrorProviderPayload),
    TurnFailed(TurnFailedPayload),
}

impl EventPayload {
    /// The type tag this payload serializes under.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SessionStart(_) => EventType::SessionStart,
            Self::SessionEnd(_) => EventType::SessionEnd,
            Self::SessionFork(_) => EventType::SessionFork,
            Self::SessionBranch(_) => EventType::SessionBranch,
            Self::MessageUser(_) => EventType::MessageUser,
            Self::MessageAssistant(_) => EventType::MessageAssistant,
            Self::MessageSystem(_) => EventType::MessageSystem,
            Self::MessageDeleted(_) => EventType::MessageDeleted,
            Self::ToolCall(_) => EventType::ToolCall,
            Self::ToolResult(_) => EventType::ToolResult,
            Self::StreamTurnStart(_) => EventType::StreamTurnStart,
            Self::StreamTurnEnd(_) => EventType::StreamTurnEnd,
            Self::StreamTextDelta(_) => EventType::StreamTextDelta,
            Self::StreamThinkingDelta(_) => EventType::StreamThinkingDelta,
            Self::ConfigModelSwitch(_) => EventType::ConfigModelSwitch,
            Self::ConfigPromptUpdate(_) => EventType::ConfigPromptUpdate,
            Self::ConfigReasoningLevel(_) => EventType::ConfigReasoningLevel,
            Self::CompactBoundary(_) => EventType::CompactBoundary,
            Self::CompactSummary(_) => EventType::CompactSummary,
            Self::ContextCleared(_) => EventType::ContextCleared,
            Self::FileRead(_) => EventType::FileRead,
            Self::FileWrite(_) => EventType::FileWrite,
            Self::FileEdit(_) => EventType::FileEdit,
            Self::WorktreeAcquired(_) => EventType::WorktreeAcquired,
            Self::WorktreeCommit(_) => EventType::WorktreeCommit,
            Self::WorktreeReleased(_) => EventType::WorktreeReleased,
            Self::WorktreeMerged(_) => EventType::WorktreeMerged,
            Self::SubagentSpawned(_) => EventType::SubagentSpawned,
            Self::SubagentStatusUpdate(_) => EventType::SubagentStatusUpdate,
            Self::SubagentCompleted(_) => EventType::SubagentCompleted,
            Self::SubagentFailed(_) => EventType::SubagentFailed,
            Self::HookTriggered(_) => EventType::HookTriggered,
            Self::HookCompleted(_) => EventType::HookCompleted,
            Self::HookBackgroundStarted(_) => EventType::HookBackgroundStarted,
            Self::HookBackgroundCompleted(_) => EventType::HookBackgroundCompleted,
            Self::RulesLoaded(_) => EventType::RulesLoaded,
            Self::PlanModeEntered(_) => EventType::PlanModeEntered,
            Self::PlanModeExited(_) => EventType::PlanModeExited,
            Self::PlanCreated(_) => EventType::PlanCreated,
            Self::TodoWrite(_) => EventType::TodoWrite,
            Self::ErrorAgent(_) => EventType::ErrorAgent,
            Self::ErrorTool(_) => EventType::ErrorTool,
            Self::ErrorProvider(_) => EventType::ErrorProvider,
            Self::TurnFailed(_) => EventType::TurnFailed,
        }
    }

    /// Serialize the payload fields (no type tag — the tag lives in the
    /// event envelope / DB column).
    pub fn to_value(&self) -> StoreResult<Value> {
        let v = match self {
            Self::SessionStart(p) => serde_json::to_value(p),
            Self::SessionEnd(p) => serde_json::to_value(p),
            Self::SessionFork(p) => serde_json::to_value(p),
            Self::SessionBranch(p) => serde_json::to_value(p),
            Self::MessageUser(p) => serde_json::to_value(p),
            Self::MessageAssistant(p) => serde_json::to_value(p),
            Self::MessageSystem(p) => serde_json::to_value(p),
            Self::MessageDeleted(p) => serde_json::to_value(p),
            Self::ToolCall(p) => serde_json::to_value(p),
            Self::ToolResult(p) => serde_json::to_value(p),
            Self::StreamTurnStart(p) => serde_json::to_value(p),
            Self::StreamTurnEnd(p) => serde_json::to_value(p),
            Self::StreamTextDelta(p) => serde_json::to_value(p),
            Self::StreamThinkingDelta(p) => serde_json::to_value(p),
            Self::ConfigModelSwitch(p) => serde_json::to_value(p),
            Self::ConfigPromptUpdate(p) => serde_json::to_value(p),
            Self::ConfigReasoningLevel(p) => serde_json::to_value(p),
            Self::CompactBoundary(p) => serde_json::to_value(p),
            Self::CompactSummary(p) => serde_json::to_value(p),
            Self::ContextCleared(p) => serde_json::to_value(p),
            Self::FileRead(p) => serde_json::to_value(p),
            Self::FileWrite(p) => serde_json::to_value(p),
            Self::FileEdit(p) => serde_json::to_value(p),
            Self::WorktreeAcquired(p) => serde_json::to_value(p),
            Self::WorktreeCommit(p) => serde_json::to_value(p),
            Self::WorktreeReleased(p) => serde_json::to_value(p),
            Self::WorktreeMerged(p) => serde_json::to_value(p),
            Self::SubagentSpawned(p) => serde_json::to_value(p),
            Self::SubagentStatusUpdate(p) => serde_json::to_value(p),
            Self::SubagentCompleted(p) => serde_json::to_value(p),
            Self::SubagentFailed(p) => serde_json::to_value(p),
            Self::HookTriggered(p) => serde_json::to_value(p),
            Self::HookCompleted(p) => serde_json::to_value(p),
            Self::HookBackgroundStarted(p) => serde_json::to_value(p),
            Self::HookBackgroundCompleted(p) => serde_json::to_value(p),
            Self::RulesLoaded(p) => serde_json::to_value(p),
            Self::PlanModeEntered(p) => serde_json::to_value(p),
            Self::PlanModeExited(p) => serde_json::to_value(p),
            Self::PlanCreated(p) => serde_json::to_value(p),
            Self::TodoWrite(p) => serde_json::to_value(p),
            Self::ErrorAgent(p) => serde_json::to_value(p),
            Self::ErrorTool(p) => serde_json::to_value(p),
            Self::ErrorProvider(p) => serde_json::to_value(p),
            Self::TurnFailed(p) => serde_json::to_value(p),
        };
        v.map_err(StoreError::from)
    }

    /// Recombine a type tag and payload JSON read back from storage.
    pub fn from_parts(event_type: EventType, value: Value) -> StoreResult<Self> {
        fn de<T: serde::de::DeserializeOwned>(v: Value) -> StoreResult<T> {
            serde_json::from_value(v).map_err(StoreError::from)
        }
        Ok(match event_type {
            EventType::SessionStart => Self::SessionStart(de(value)?),
            EventType::SessionEnd => Self::SessionEnd(de(value)?),
            EventType::SessionFork => Self::SessionFork(de(value)?),
            EventType::SessionBranch => Self::SessionBranch(de(value)?),
            EventType::MessageUser => Self::MessageUser(de(value)?),
            EventType::MessageAssistant => Self::MessageAssistant(de(value)?),
            EventType::MessageSystem => Self::MessageSystem(de(value)?),
            EventType::MessageDeleted => Self::MessageDeleted(de(value)?),
            EventType::ToolCall => Self::ToolCall(de(value)?),
            EventType::ToolResult => Self::ToolResult(de(value)?),
            EventType::StreamTurnStart => Self::StreamTurnStart(de(value)?),
            EventType::StreamTurnEnd => Self::StreamTurnEnd(de(value)?),
            EventType::StreamTextDelta => Self::StreamTextDelta(de(value)?),
            EventType::StreamThinkingDelta => Self::StreamThinkingDelta(de(value)?),
            EventType::ConfigModelSwitch => Self::ConfigModelSwitch(de(value)?),
            EventType::ConfigPromptUpdate => Self::ConfigPromptUpdate(de(value)?),
            EventType::ConfigReasoningLevel => Self::ConfigReasoningLevel(de(value)?),
            EventType::CompactBoundary => Self::CompactBoundary(de(value)?),
            EventType::CompactSummary => Self::CompactSummary(de(value)?),
            EventType::ContextCleared => Self::ContextCleared(de(value)?),
            EventType::FileRead => Self::FileRead(de(value)?),
            EventType::FileWrite => Self::FileWrite(de(value)?),
            EventType::FileEdit => Self::FileEdit(de(value)?),
            EventType::WorktreeAcquired => Self::WorktreeAcquired(de(value)?),
            EventType::WorktreeCommit => Self::WorktreeCommit(de(value)?),
            EventType::WorktreeReleased => Self::WorktreeReleased(de(value)?),
            EventType::WorktreeMerged => Self::WorktreeMerged(de(value)?),
            EventType::SubagentSpawned => Self::SubagentSpawned(de(value)?),
            EventType::SubagentStatusUpdate => Self::SubagentStatusUpdate(de(value)?),
            EventType::SubagentCompleted => Self::SubagentCompleted(de(value)?),
            EventType::SubagentFailed => Self::SubagentFailed(de(value)?),
            EventType::HookTriggered => Self::HookTriggered(de(value)?),
            EventType::HookCompleted => Self::HookCompleted(de(value)?),
            EventType::HookBackgroundStarted => Self::HookBackgroundStarted(de(value)?),
            EventType::HookBackgroundCompleted => Self::HookBackgroundCompleted(de(value)?),
            EventType::RulesLoaded => Self::RulesLoaded(de(value)?),
            EventType::PlanModeEntered => Self::PlanModeEntered(de(value)?),
            EventType::PlanModeExited => Self::PlanModeExited(de(value)?),
            EventType::PlanCreated => Self::PlanCreated(de(value)?),
            EventType::TodoWrite => Self::TodoWrite(de(value)?),
            EventType::ErrorAgent => Self::ErrorAgent(de(value)?),
            EventType::ErrorTool => Self::ErrorTool(de(value)?),
            EventType::ErrorProvider => Self::ErrorProvider(de(value)?),
            EventType::TurnFailed => Self::TurnFailed(de(value)?),
        })
    }

    /// Text fed to the content index, for indexed types only.
    #[must_use]
    pub fn search_text(&self) -> Option<String> {
        fn blocks_text(blocks: &[ContentBlock]) -> String {
            let mut out = String::new();
            for b in blocks {
                match b {
                    ContentBlock::Text { text } => {
                        out.push_str(text);
                        out.push('\n');
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        out.push_str(id);
                        out.push(' ');
                        out.push_str(name);
                        out.push(' ');
                        out.push_str(&input.to_string());
                        out.push('\n');
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        out.push_str(tool_use_id);
                        out.push(' ');
                        out.push_str(content);
                        out.push('\n');
                    }
                    _ => {}
                }
            }
            out
        }

        match self {
            Self::MessageUser(p) => Some(blocks_text(&p.content)),
            Self::MessageAssistant(p) => Some(blocks_text(&p.content)),
            Self::MessageSystem(p) => Some(p.content.clone()),
            Self::ToolCall(p) => Some(format!(
                "{} {} {}",
                p.tool_call_id,
                p.tool_name,
                p.arguments
            )),
            Self::ToolResult(p) => {
                Some(format!("{} {}", p.tool_call_id, p.content))
            }
            Self::CompactSummary(p) => Some(p.summary.clone()),
            _ => None,
        }
    }

    /// A one-line summary for tree visualization, capped at 100 chars.
    #[must_use]
    pub fn summary(&self) -> String {
        fn cap(s: &str) -> String {
            let trimmed = s.trim().replace('\n', " ");
            if trimmed.chars().count() <= 100 {
                trimmed
            } else {
                let mut out: String = trimmed.chars().take(97).collect();
                out.push_str("...");
                out
            }
        }
        match self {
            Self::SessionStart(p) => cap(&format!("session started ({})", p.model)),
            Self::SessionEnd(p) => cap(&format!("session ended: {}", p.reason)),
            Self::SessionFork(p) => cap(&format!("forked from {}", p.parent_event_id)),
            Self::MessageUser(p) => {
                let text: String = p
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                cap(&text)
            }
            Self::MessageAssistant(p) => {
                let text: String = p
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                cap(&text)
            }
            Self::MessageSystem(p) => cap(&p.content),
            Self::ToolCall(p) => cap(&format!("→ {}", p.tool_name)),
            Self::ToolResult(p) => cap(&format!("← {}: {}", p.tool_name, p.content)),
            Self::CompactSummary(p) => cap(&p.summary),
            Self::TurnFailed(p) => cap(&format!("turn failed: {}", p.message)),
            other => cap(other.event_type().as_str()),
        }
    }
}

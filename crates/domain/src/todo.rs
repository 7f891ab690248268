use serde::{Deserialize, Serialize};

/// One todo/task item tracked within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    /// Imperative form ("Fix the parser").
    pub content: String,
    /// Present continuous form shown while in progress ("Fixing the parser").
    pub active_form: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub source: TodoSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoSource {
    #[default]
    Agent,
    User,
    Skill,
}

/// Why a todo landed on the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogReason {
    SessionClear,
    ContextCompact,
    SessionEnd,
}

impl BacklogReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionClear => "session_clear",
            Self::ContextCompact => "context_compact",
            Self::SessionEnd => "session_end",
        }
    }
}

/// A todo that survived its session's teardown and is waiting to be
/// restored elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackloggedTodo {
    #[serde(flatten)]
    pub todo: Todo,
    pub backlogged_at: chrono::DateTime<chrono::Utc>,
    pub reason: BacklogReason,
    pub source_session_id: String,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_to_session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serde_snake_case() {
        let json = serde_json::to_value(TodoStatus::InProgress).unwrap();
        assert_eq!(json, serde_json::Value::String("in_progress".into()));
    }

    #[test]
    fn backlogged_flattens_todo_fields() {
        let item = BackloggedTodo {
            todo: Todo {
                id: "t1".into(),
                content: "Write tests".into(),
                active_form: "Writing tests".into(),
                status: TodoStatus::Pending,
                source: TodoSource::Agent,
                metadata: None,
            },
            backlogged_at: chrono::Utc::now(),
            reason: BacklogReason::ContextCompact,
            source_session_id: "s1".into(),
            workspace_id: "w1".into(),
            restored_to_session_id: None,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["reason"], "context_compact");
    }
}

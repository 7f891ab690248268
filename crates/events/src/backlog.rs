//! Task backlog: todos that outlive their session's context.
//!
//! Unfinished todos are snapshotted here when a session clears, compacts,
//! or ends, and can be restored into a later session.

use chrono::Utc;
use rusqlite::params;

use sb_domain::todo::{BackloggedTodo, BacklogReason, Todo, TodoStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::EventStore;

impl EventStore {
    /// Snapshot unfinished todos onto the backlog. Completed items are
    /// dropped. Returns how many were backlogged.
    pub fn backlog_todos(
        &self,
        todos: &[Todo],
        reason: BacklogReason,
        source_session_id: &str,
        workspace_id: &str,
    ) -> StoreResult<usize> {
        let open: Vec<&Todo> = todos
            .iter()
            .filter(|t| t.status != TodoStatus::Completed)
            .collect();
        if open.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            for todo in &open {
                let id = format!("bl_{}", uuid::Uuid::new_v4());
                let json = serde_json::to_string(todo)?;
                conn.execute(
                    "INSERT INTO task_backlog
                       (id, todo, backlogged_at, reason, source_session_id, workspace_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        json,
                        now,
                        reason.as_str(),
                        source_session_id,
                        workspace_id
                    ],
                )?;
            }
            Ok(())
        })?;

        tracing::debug!(
            count = open.len(),
            reason = reason.as_str(),
            session_id = source_session_id,
            "todos backlogged"
        );
        Ok(open.len())
    }

    /// Unrestored backlog entries, optionally scoped to a workspace.
    pub fn get_backlog(&self, workspace_id: Option<&str>) -> StoreResult<Vec<(String, BackloggedTodo)>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, todo, backlogged_at, reason, source_session_id, workspace_id
                 FROM task_backlog WHERE restored_to_session_id IS NULL",
            );
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(ws) = workspace_id {
                sql.push_str(" AND workspace_id = ?");
                args.push(Box::new(ws.to_owned()));
            }
            sql.push_str(" ORDER BY backlogged_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                |row| {
                    let id: String = row.get(0)?;
                    let todo_json: String = row.get(1)?;
                    let backlogged_at: String = row.get(2)?;
                    let reason: String = row.get(3)?;
                    let source_session_id: String = row.get(4)?;
                    let workspace_id: String = row.get(5)?;
                    Ok((id, todo_json, backlogged_at, reason, source_session_id, workspace_id))
                },
            )?;

            let mut out = Vec::new();
            for row in rows {
                let (id, todo_json, backlogged_at, reason, source_session_id, workspace_id) =
                    row?;
                let todo: Todo = serde_json::from_str(&todo_json)?;
                let reason: BacklogReason =
                    serde_json::from_value(serde_json::Value::String(reason))
                        .map_err(|e| StoreError::Internal(format!("backlog reason: {e}")))?;
                let backlogged_at = chrono::DateTime::parse_from_rfc3339(&backlogged_at)
                    .map_err(|e| StoreError::Internal(format!("backlog timestamp: {e}")))?
                    .with_timezone(&Utc);
                out.push((
                    id,
                    BackloggedTodo {
                        todo,
                        backlogged_at,
                        reason,
                        source_session_id,
                        workspace_id,
                        restored_to_session_id: None,
                    },
                ));
            }
            Ok(out)
        })
    }

    pub fn backlog_count(&self, workspace_id: Option<&str>) -> StoreResult<usize> {
        Ok(self.get_backlog(workspace_id)?.len())
    }

    /// Mark backlog entries restored into a session and return their todos.
    pub fn restore_backlog(
        &self,
        ids: &[String],
        target_session_id: &str,
    ) -> StoreResult<Vec<Todo>> {
        let entries = self.get_backlog(None)?;
        let mut restored = Vec::new();
        self.with_conn(|conn| {
            for id in ids {
                let Some((_, entry)) = entries.iter().find(|(eid, _)| eid == id) else {
                    return Err(StoreError::NotFound(format!("backlog entry {id}")));
                };
                conn.execute(
                    "UPDATE task_backlog SET restored_to_session_id = ?1
                     WHERE id = ?2 AND restored_to_session_id IS NULL",
                    params![target_session_id, id],
                )?;
                restored.push(entry.todo.clone());
            }
            Ok(())
        })?;
        Ok(restored)
    }
}

//! The event store: SQLite-backed, append-only, per-session linearized.
//!
//! One connection guarded by a mutex serializes writes; the per-session
//! head CAS is still enforced in SQL so callers that race on an expected
//! head observe `Conflict` rather than silent reordering. Payloads larger
//! than [`BLOB_SPILL_BYTES`] spill into the `blobs` table and are read
//! back transparently.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;

use crate::error::{StoreError, StoreResult};
use crate::event::{new_event_id, Event};
use crate::event_type::EventType;
use crate::payload::{EventPayload, MessageDeletedPayload, SessionForkPayload, SessionStartPayload};
use crate::schema;

/// Serialized payloads above this size are stored in the blobs table.
pub const BLOB_SPILL_BYTES: usize = 256 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRecord {
    pub id: String,
    pub path: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub workspace_id: String,
    pub working_directory: String,
    pub model: String,
    pub title: Option<String>,
    pub head_event_id: Option<String>,
    pub next_sequence: u64,
    pub fork_parent_session_id: Option<String>,
    pub fork_parent_event_id: Option<String>,
    pub spawned_by_session_id: Option<String>,
    pub spawn_task: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub types: Option<Vec<EventType>>,
    pub limit: Option<usize>,
    pub before_event_id: Option<String>,
    /// When true, oldest-first; default is newest-first.
    pub chronological: bool,
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub events: Vec<Event>,
    pub has_more: bool,
    pub oldest_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SincePage {
    pub events: Vec<Event>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub session_id: Option<String>,
    pub workspace_id: Option<String>,
    pub types: Option<Vec<EventType>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub event_id: String,
    pub session_id: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub workspace_id: Option<String>,
    pub include_ended: bool,
    pub exclude_subagents: bool,
    pub limit: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Internal(format!("create data dir: {e}")))?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Internal(format!("open {}: {e}", db_path.display())))?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Workspaces ─────────────────────────────────────────────────

    /// Find or create the workspace for a directory. Created on the first
    /// session in that directory; never deleted implicitly.
    pub fn ensure_workspace(&self, path: &str, name: &str) -> StoreResult<WorkspaceRecord> {
        let conn = self.conn.lock();
        if let Some(ws) = Self::workspace_by_path(&conn, path)? {
            return Ok(ws);
        }
        let now = Utc::now();
        let id = format!("ws_{}", uuid::Uuid::new_v4());
        conn.execute(
            "INSERT INTO workspaces (id, path, name, created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, path, name, now.to_rfc3339(), now.to_rfc3339()],
        )?;
        tracing::debug!(workspace_id = %id, path, "workspace created");
        Ok(WorkspaceRecord {
            id,
            path: path.to_owned(),
            name: name.to_owned(),
            created_at: now,
            last_activity_at: now,
        })
    }

    pub fn get_workspace(&self, id: &str) -> StoreResult<Option<WorkspaceRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, path, name, created_at, last_activity_at FROM workspaces WHERE id = ?1",
            params![id],
            row_to_workspace,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_workspaces(&self) -> StoreResult<Vec<WorkspaceRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, path, name, created_at, last_activity_at FROM workspaces
             ORDER BY last_activity_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_workspace)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn workspace_by_path(conn: &Connection, path: &str) -> StoreResult<Option<WorkspaceRecord>> {
        conn.query_row(
            "SELECT id, path, name, created_at, last_activity_at FROM workspaces WHERE path = ?1",
            params![path],
            row_to_workspace,
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Create a session and append its `session.start` root event in one
    /// transaction.
    pub fn create_session(
        &self,
        workspace_path: &str,
        working_directory: &str,
        model: &str,
        title: Option<&str>,
    ) -> StoreResult<(SessionRecord, Event)> {
        let workspace = self.ensure_workspace(
            workspace_path,
            workspace_display_name(workspace_path),
        )?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let now = Utc::now();
        let session_id = format!("sess_{}", uuid::Uuid::new_v4());
        tx.execute(
            "INSERT INTO sessions (id, workspace_id, working_directory, model, title,
                                   head_event_id, next_sequence, created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 1, ?6, ?6)",
            params![
                session_id,
                workspace.id,
                working_directory,
                model,
                title,
                now.to_rfc3339()
            ],
        )?;

        let payload = EventPayload::SessionStart(SessionStartPayload {
            working_directory: working_directory.to_owned(),
            model: model.to_owned(),
            title: title.map(str::to_owned),
        });
        let event = append_in_tx(&tx, &session_id, &workspace.id, None, payload)?;
        tx.commit()?;

        tracing::debug!(session_id = %session_id, model, "session created");

        drop(conn);
        let record = self
            .get_session(&session_id)?
            .ok_or_else(|| StoreError::Internal("session vanished after create".into()))?;
        Ok((record, event))
    }

    pub fn get_session(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let conn = self.conn.lock();
        Self::session_row(&conn, id)
    }

    fn session_row(conn: &Connection, id: &str) -> StoreResult<Option<SessionRecord>> {
        conn.query_row(
            &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
            params![id],
            row_to_session,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_sessions(&self, filter: &SessionFilter) -> StoreResult<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let mut sql = format!("SELECT {SESSION_COLS} FROM sessions WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(ref ws) = filter.workspace_id {
            sql.push_str(" AND workspace_id = ?");
            args.push(Box::new(ws.clone()));
        }
        if !filter.include_ended {
            sql.push_str(" AND ended_at IS NULL");
        }
        if filter.exclude_subagents {
            sql.push_str(" AND spawned_by_session_id IS NULL");
        }
        sql.push_str(" ORDER BY last_activity_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_session,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Mark a session ended. Its events persist.
    pub fn end_session(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 && Self::session_row(&conn, id)?.is_none() {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    pub fn touch_session(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn set_session_model(&self, id: &str, model: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET model = ?1 WHERE id = ?2",
            params![model, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    /// Record the parent linkage for a subagent session.
    pub fn set_spawn_info(
        &self,
        session_id: &str,
        spawned_by: &str,
        task: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET spawned_by_session_id = ?1, spawn_task = ?2 WHERE id = ?3",
            params![spawned_by, task, session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    // ── Append ─────────────────────────────────────────────────────

    /// Append an event: parent = current head, sequence = head's + 1.
    ///
    /// The whole operation runs in one transaction under the connection
    /// lock, so the observed head is always the latest.
    pub fn append(&self, session_id: &str, payload: EventPayload) -> StoreResult<Event> {
        self.append_inner(session_id, None, payload)
    }

    /// Append only if the session head still equals `expected_head`.
    ///
    /// Fails with [`StoreError::Conflict`] when a concurrent writer moved
    /// the head — the caller re-reads and retries.
    pub fn append_after(
        &self,
        session_id: &str,
        expected_head: Option<&str>,
        payload: EventPayload,
    ) -> StoreResult<Event> {
        self.append_inner(session_id, Some(expected_head), payload)
    }

    fn append_inner(
        &self,
        session_id: &str,
        expected_head: Option<Option<&str>>,
        payload: EventPayload,
    ) -> StoreResult<Event> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let session = tx
            .query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
                params![session_id],
                row_to_session,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        if let Some(expected) = expected_head {
            if session.head_event_id.as_deref() != expected {
                return Err(StoreError::Conflict(format!(
                    "head of {session_id} is {:?}, expected {:?}",
                    session.head_event_id, expected
                )));
            }
        }

        let event = append_in_tx(
            &tx,
            session_id,
            &session.workspace_id,
            session.head_event_id.as_deref(),
            payload,
        )?;
        tx.commit()?;
        Ok(event)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get_event(&self, id: &str) -> StoreResult<Option<Event>> {
        let conn = self.conn.lock();
        Self::event_row(&conn, id)
    }

    fn event_row(conn: &Connection, id: &str) -> StoreResult<Option<Event>> {
        let row = conn
            .query_row(
                "SELECT id, session_id, workspace_id, parent_id, sequence, type, payload, created_at
                 FROM events WHERE id = ?1",
                params![id],
                row_to_raw_event,
            )
            .optional()?;
        row.map(|raw| hydrate_event(conn, raw)).transpose()
    }

    /// Events along a session's head-to-root chain, filtered and paginated.
    pub fn get_history(
        &self,
        session_id: &str,
        opts: &HistoryOptions,
    ) -> StoreResult<HistoryPage> {
        let conn = self.conn.lock();
        if Self::session_row(&conn, session_id)?.is_none() {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }

        let mut sql = String::from(
            "SELECT id, session_id, workspace_id, parent_id, sequence, type, payload, created_at
             FROM events WHERE session_id = ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(session_id.to_owned())];

        if let Some(ref before) = opts.before_event_id {
            let before_seq: Option<u64> = conn
                .query_row(
                    "SELECT sequence FROM events WHERE id = ?1 AND session_id = ?2",
                    params![before, session_id],
                    |r| r.get(0),
                )
                .optional()?;
            let seq = before_seq
                .ok_or_else(|| StoreError::NotFound(format!("event {before}")))?;
            sql.push_str(" AND sequence < ?");
            args.push(Box::new(seq as i64));
        }

        if let Some(ref types) = opts.types {
            let placeholders = vec!["?"; types.len()].join(", ");
            sql.push_str(&format!(" AND type IN ({placeholders})"));
            for t in types {
                args.push(Box::new(t.as_str().to_owned()));
            }
        }

        // Fetch newest-first so `limit` trims from the old end; flip later
        // for chronological callers.
        sql.push_str(" ORDER BY sequence DESC");
        let limit = opts.limit.unwrap_or(200);
        sql.push_str(&format!(" LIMIT {}", limit + 1));

        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<RawEvent> = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_raw_event,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = raw.len() > limit;
        let mut events: Vec<Event> = raw
            .into_iter()
            .take(limit)
            .map(|r| hydrate_event(&conn, r))
            .collect::<StoreResult<Vec<_>>>()?;

        let oldest_id = events.last().map(|e| e.id.clone());
        if opts.chronological {
            events.reverse();
        }

        Ok(HistoryPage {
            events,
            has_more,
            oldest_id,
        })
    }

    /// Streaming sync primitive: events with ids after `cursor`.
    pub fn get_since(
        &self,
        cursor: Option<&str>,
        session_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<SincePage> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, session_id, workspace_id, parent_id, sequence, type, payload, created_at
             FROM events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(cursor) = cursor {
            sql.push_str(" AND id > ?");
            args.push(Box::new(cursor.to_owned()));
        }
        if let Some(sid) = session_id {
            sql.push_str(" AND session_id = ?");
            args.push(Box::new(sid.to_owned()));
        }
        sql.push_str(&format!(" ORDER BY id ASC LIMIT {}", limit + 1));

        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<RawEvent> = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_raw_event,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = raw.len() > limit;
        let events: Vec<Event> = raw
            .into_iter()
            .take(limit)
            .map(|r| hydrate_event(&conn, r))
            .collect::<StoreResult<Vec<_>>>()?;
        let next_cursor = events.last().map(|e| e.id.clone());

        Ok(SincePage {
            events,
            next_cursor,
            has_more,
        })
    }

    /// Walk the parent chain to the root, crossing fork boundaries into
    /// donor sessions. Returned oldest-last (i.e. `[head, ..., root]`).
    pub fn get_ancestors(&self, event_id: &str) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        let mut cursor = Some(event_id.to_owned());
        while let Some(id) = cursor {
            let event = Self::event_row(&conn, &id)?
                .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;
            cursor = event.parent_id.clone();
            out.push(event);
        }
        Ok(out)
    }

    /// Direct children of an event (more than one where forks exist).
    pub fn get_children(&self, event_id: &str) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, workspace_id, parent_id, sequence, type, payload, created_at
             FROM events WHERE parent_id = ?1 ORDER BY id ASC",
        )?;
        let raw: Vec<RawEvent> = stmt
            .query_map(params![event_id], row_to_raw_event)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|r| hydrate_event(&conn, r))
            .collect()
    }

    // ── Search ─────────────────────────────────────────────────────

    /// Full-text search over text-bearing payloads.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> StoreResult<Vec<SearchResult>> {
        let conn = self.conn.lock();
        let fts_query = fts_escape(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT event_id, session_id, snippet(events_fts, 0, '[', ']', '…', 12),
                    bm25(events_fts)
             FROM events_fts WHERE events_fts MATCH ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(fts_query)];
        if let Some(ref sid) = opts.session_id {
            sql.push_str(" AND session_id = ?");
            args.push(Box::new(sid.clone()));
        }
        if let Some(ref ws) = opts.workspace_id {
            sql.push_str(" AND workspace_id = ?");
            args.push(Box::new(ws.clone()));
        }
        if let Some(ref types) = opts.types {
            let placeholders = vec!["?"; types.len()].join(", ");
            sql.push_str(&format!(" AND type IN ({placeholders})"));
            for t in types {
                args.push(Box::new(t.as_str().to_owned()));
            }
        }
        sql.push_str(&format!(
            " ORDER BY bm25(events_fts) LIMIT {}",
            opts.limit.unwrap_or(50)
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| {
                Ok(SearchResult {
                    event_id: row.get(0)?,
                    session_id: row.get(1)?,
                    snippet: row.get(2)?,
                    // bm25 is lower-is-better; negate so bigger = better.
                    score: -row.get::<_, f64>(3)?,
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    // ── Soft delete ────────────────────────────────────────────────

    /// Append a `message.deleted` event targeting an earlier message.
    pub fn delete_message(
        &self,
        session_id: &str,
        target_event_id: &str,
        reason: Option<&str>,
    ) -> StoreResult<Event> {
        let target = self
            .get_event(target_event_id)?
            .ok_or_else(|| StoreError::NotFound(format!("event {target_event_id}")))?;
        if target.session_id != session_id {
            return Err(StoreError::InvalidOperation(format!(
                "event {target_event_id} belongs to a different session"
            )));
        }
        if !target.event_type().is_deletable() {
            return Err(StoreError::InvalidOperation(format!(
                "{} events cannot be deleted",
                target.event_type()
            )));
        }
        self.append(
            session_id,
            EventPayload::MessageDeleted(MessageDeletedPayload {
                target_event_id: target_event_id.to_owned(),
                reason: reason.map(str::to_owned),
            }),
        )
    }

    // ── Fork ───────────────────────────────────────────────────────

    /// Create a new session rooted at `at_event_id` (default: the donor's
    /// head). The new session's root event is a `session.fork` whose
    /// parent points into the donor chain; appends never cross back.
    pub fn fork(
        &self,
        session_id: &str,
        at_event_id: Option<&str>,
        model_override: Option<&str>,
        title: Option<&str>,
    ) -> StoreResult<(SessionRecord, Event)> {
        let donor = self
            .get_session(session_id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        let fork_point = match at_event_id {
            Some(id) => id.to_owned(),
            None => donor.head_event_id.clone().ok_or_else(|| {
                StoreError::InvalidOperation("session has no events to fork from".into())
            })?,
        };
        let fork_event = self
            .get_event(&fork_point)?
            .ok_or_else(|| StoreError::NotFound(format!("event {fork_point}")))?;
        if fork_event.session_id != session_id {
            return Err(StoreError::InvalidOperation(format!(
                "event {fork_point} is not in session {session_id}"
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let new_id = format!("sess_{}", uuid::Uuid::new_v4());
        let model = model_override.unwrap_or(&donor.model);
        tx.execute(
            "INSERT INTO sessions (id, workspace_id, working_directory, model, title,
                                   head_event_id, next_sequence,
                                   fork_parent_session_id, fork_parent_event_id,
                                   created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 1, ?6, ?7, ?8, ?8)",
            params![
                new_id,
                donor.workspace_id,
                donor.working_directory,
                model,
                title,
                session_id,
                fork_point,
                now.to_rfc3339()
            ],
        )?;

        let payload = EventPayload::SessionFork(SessionForkPayload {
            parent_session_id: session_id.to_owned(),
            parent_event_id: fork_point.clone(),
        });
        // The fork root's parent id points at the donor event.
        let event = append_root_in_tx(&tx, &new_id, &donor.workspace_id, &fork_point, payload)?;
        tx.commit()?;

        tracing::debug!(
            donor = %session_id,
            child = %new_id,
            at = %fork_point,
            "session forked"
        );

        drop(conn);
        let record = self
            .get_session(&new_id)?
            .ok_or_else(|| StoreError::Internal("session vanished after fork".into()))?;
        Ok((record, event))
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SESSION_COLS: &str = "id, workspace_id, working_directory, model, title, head_event_id, \
     next_sequence, fork_parent_session_id, fork_parent_event_id, spawned_by_session_id, \
     spawn_task, created_at, last_activity_at, ended_at";

struct RawEvent {
    id: String,
    session_id: String,
    workspace_id: String,
    parent_id: Option<String>,
    sequence: u64,
    event_type: EventType,
    payload_json: String,
    created_at: DateTime<Utc>,
}

fn append_in_tx(
    tx: &Connection,
    session_id: &str,
    workspace_id: &str,
    head: Option<&str>,
    payload: EventPayload,
) -> StoreResult<Event> {
    let next_sequence: u64 = tx.query_row(
        "SELECT next_sequence FROM sessions WHERE id = ?1",
        params![session_id],
        |r| r.get::<_, i64>(0).map(|v| v as u64),
    )?;

    let event = insert_event(
        tx,
        session_id,
        workspace_id,
        head,
        next_sequence,
        payload,
    )?;

    // CAS on head: the UPDATE only lands when the head is still what we
    // observed at the top of this transaction.
    let changed = match head {
        Some(h) => tx.execute(
            "UPDATE sessions SET head_event_id = ?1, next_sequence = ?2, last_activity_at = ?3
             WHERE id = ?4 AND head_event_id = ?5",
            params![
                event.id,
                (next_sequence + 1) as i64,
                event.timestamp.to_rfc3339(),
                session_id,
                h
            ],
        )?,
        None => tx.execute(
            "UPDATE sessions SET head_event_id = ?1, next_sequence = ?2, last_activity_at = ?3
             WHERE id = ?4 AND head_event_id IS NULL",
            params![
                event.id,
                (next_sequence + 1) as i64,
                event.timestamp.to_rfc3339(),
                session_id
            ],
        )?,
    };
    if changed != 1 {
        return Err(StoreError::Conflict(format!(
            "head of {session_id} moved during append"
        )));
    }
    Ok(event)
}

/// Insert a fork root: sequence 1, parent pointing into the donor chain.
fn append_root_in_tx(
    tx: &Connection,
    session_id: &str,
    workspace_id: &str,
    donor_event_id: &str,
    payload: EventPayload,
) -> StoreResult<Event> {
    let event = insert_event(
        tx,
        session_id,
        workspace_id,
        Some(donor_event_id),
        1,
        payload,
    )?;
    let changed = tx.execute(
        "UPDATE sessions SET head_event_id = ?1, next_sequence = 2, last_activity_at = ?2
         WHERE id = ?3 AND head_event_id IS NULL",
        params![event.id, event.timestamp.to_rfc3339(), session_id],
    )?;
    if changed != 1 {
        return Err(StoreError::Conflict(format!(
            "session {session_id} already has a root"
        )));
    }
    Ok(event)
}

fn insert_event(
    tx: &Connection,
    session_id: &str,
    workspace_id: &str,
    parent_id: Option<&str>,
    sequence: u64,
    payload: EventPayload,
) -> StoreResult<Event> {
    let id = new_event_id();
    let now = Utc::now();
    let event_type = payload.event_type();
    let payload_value = payload.to_value()?;
    let mut payload_json = serde_json::to_string(&payload_value)?;

    // Oversized payloads spill into the blobs table.
    if payload_json.len() > BLOB_SPILL_BYTES {
        let blob_id = format!("blob_{}", uuid::Uuid::new_v4());
        tx.execute(
            "INSERT INTO blobs (id, content, created_at) VALUES (?1, ?2, ?3)",
            params![blob_id, payload_json, now.to_rfc3339()],
        )?;
        payload_json = serde_json::to_string(&serde_json::json!({ "blobRef": blob_id }))?;
    }

    tx.execute(
        "INSERT INTO events (id, session_id, workspace_id, parent_id, sequence, type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            session_id,
            workspace_id,
            parent_id,
            sequence as i64,
            event_type.as_str(),
            payload_json,
            now.to_rfc3339()
        ],
    )?;

    // Index update is part of the append transaction; a failure here
    // fails the append.
    if let Some(text) = payload.search_text() {
        tx.execute(
            "INSERT INTO events_fts (content, event_id, session_id, workspace_id, type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![text, id, session_id, workspace_id, event_type.as_str()],
        )?;
    }

    Ok(Event {
        id,
        session_id: session_id.to_owned(),
        workspace_id: workspace_id.to_owned(),
        parent_id: parent_id.map(str::to_owned),
        sequence,
        timestamp: now,
        payload,
    })
}

fn hydrate_event(conn: &Connection, raw: RawEvent) -> StoreResult<Event> {
    let mut value: Value = serde_json::from_str(&raw.payload_json)?;
    if let Some(blob_ref) = value.get("blobRef").and_then(|v| v.as_str()) {
        let content: String = conn.query_row(
            "SELECT content FROM blobs WHERE id = ?1",
            params![blob_ref],
            |r| r.get(0),
        )?;
        value = serde_json::from_str(&content)?;
    }
    let payload = EventPayload::from_parts(raw.event_type, value)?;
    Ok(Event {
        id: raw.id,
        session_id: raw.session_id,
        workspace_id: raw.workspace_id,
        parent_id: raw.parent_id,
        sequence: raw.sequence,
        timestamp: raw.created_at,
        payload,
    })
}

fn row_to_raw_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    let type_str: String = row.get(5)?;
    let event_type = type_str.parse::<EventType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(RawEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        workspace_id: row.get(2)?,
        parent_id: row.get(3)?,
        sequence: row.get::<_, i64>(4)? as u64,
        event_type,
        payload_json: row.get(6)?,
        created_at: parse_ts(row, 7)?,
    })
}

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<WorkspaceRecord> {
    Ok(WorkspaceRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_ts(row, 3)?,
        last_activity_at: parse_ts(row, 4)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        working_directory: row.get(2)?,
        model: row.get(3)?,
        title: row.get(4)?,
        head_event_id: row.get(5)?,
        next_sequence: row.get::<_, i64>(6)? as u64,
        fork_parent_session_id: row.get(7)?,
        fork_parent_event_id: row.get(8)?,
        spawned_by_session_id: row.get(9)?,
        spawn_task: row.get(10)?,
        created_at: parse_ts(row, 11)?,
        last_activity_at: parse_ts(row, 12)?,
        ended_at: {
            let v: Option<String> = row.get(13)?;
            v.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc))
        },
    })
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Quote each term so user input can't inject FTS5 operators.
fn fts_escape(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn workspace_display_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use rusqlite::Connection;

use crate::error::StoreResult;

/// Schema version (increment when changing table definitions).
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            working_directory TEXT NOT NULL,
            model TEXT NOT NULL,
            title TEXT,
            head_event_id TEXT,
            next_sequence INTEGER NOT NULL DEFAULT 1,
            fork_parent_session_id TEXT,
            fork_parent_event_id TEXT,
            spawned_by_session_id TEXT,
            spawn_task TEXT,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL,
            ended_at TEXT,
            FOREIGN KEY (workspace_id) REFERENCES workspaces(id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            parent_id TEXT,
            sequence INTEGER NOT NULL,
            type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (session_id, sequence),
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, sequence);
        CREATE INDEX IF NOT EXISTS idx_events_parent ON events(parent_id);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events(session_id, type);

        CREATE TABLE IF NOT EXISTS blobs (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
            content,
            event_id UNINDEXED,
            session_id UNINDEXED,
            workspace_id UNINDEXED,
            type UNINDEXED
        );

        CREATE TABLE IF NOT EXISTS task_backlog (
            id TEXT PRIMARY KEY,
            todo TEXT NOT NULL,
            backlogged_at TEXT NOT NULL,
            reason TEXT NOT NULL,
            source_session_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            restored_to_session_id TEXT
        );
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        // Re-running is a no-op.
        init_schema(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn fts_table_accepts_rows() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO events_fts (content, event_id, session_id, workspace_id, type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params!["hello world", "e1", "s1", "w1", "message.user"],
        )
        .unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM events_fts WHERE events_fts MATCH 'hello'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}

//! Session repository.
//!
//! A session brackets one tool-use conversation: opened at `SessionStart`, closed (with an
//! optional summary) at `SessionEnd`. Most reads in the rest of the system key off `session_id`
//! rather than this table directly.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::Session;

pub struct SessionRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> SessionRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        let started_at: String = row.get("started_at")?;
        let ended_at: Option<String> = row.get("ended_at")?;
        Ok(Session {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            started_at: started_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            ended_at: ended_at.and_then(|s| s.parse().ok()),
            summary: row.get("summary")?,
        })
    }

    /// Open a session with the given id, idempotently — a second `SessionStart` for the same id
    /// (a hook retry) leaves the original `started_at` untouched.
    pub fn start(&self, session_id: &str) -> Result<Session> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO sessions (id, project_hash, started_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO NOTHING",
                params![session_id, self.project_hash, now],
            )?;
            Ok(())
        })?;
        self.find(session_id)?.ok_or(StorageError::NotFound)
    }

    pub fn find(&self, session_id: &str) -> Result<Option<Session>> {
        self.conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1 AND project_hash = ?2",
                params![session_id, self.project_hash],
                Self::row_to_session,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Close a session, recording an optional summary. Safe to call on an already-ended session
    /// (overwrites `ended_at`/`summary` rather than erroring) since `SessionEnd` hooks can fire
    /// more than once in edge cases (abrupt client disconnects followed by a clean shutdown).
    pub fn end(&self, session_id: &str, summary: Option<String>) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE sessions SET ended_at = ?1, summary = COALESCE(?2, summary) WHERE id = ?3 AND project_hash = ?4",
                params![now, summary, session_id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// The most recently started session for this project, ended or not — used to recover a
    /// `session_id` when a hook event arrives without one.
    pub fn most_recent(&self) -> Result<Option<Session>> {
        self.conn
            .query_row(
                "SELECT * FROM sessions WHERE project_hash = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
                params![self.project_hash],
                Self::row_to_session,
            )
            .optional()
            .map_err(StorageError::from)
    }
}

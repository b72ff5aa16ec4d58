//! Debug-path repository.
//!
//! A debug path tracks one debugging episode from first error to resolution. At most one path
//! may be `active` per project at a time — starting a new one while another is active is an
//! error the path-tracking state machine (in `enrichment`) is expected to check for before
//! calling [`DebugPathRepository::start`]. Waypoints are capped at
//! [`crate::model::MAX_WAYPOINTS_PER_PATH`] per path; once the cap is hit, resolution tracking
//! keeps working but new waypoints are silently dropped.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, new_id, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::{DebugPath, DebugPathStatus, PathWaypoint, WaypointType, MAX_WAYPOINTS_PER_PATH};

pub struct DebugPathRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> DebugPathRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_path(row: &Row) -> rusqlite::Result<DebugPath> {
        let status: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let resolved_at: Option<String> = row.get("resolved_at")?;
        let kiss_summary: Option<String> = row.get("kiss_summary")?;
        Ok(DebugPath {
            id: row.get("id")?,
            status: status.parse().unwrap_or(DebugPathStatus::Active),
            trigger_summary: row.get("trigger_summary")?,
            resolution_summary: row.get("resolution_summary")?,
            kiss_summary: kiss_summary.and_then(|s| serde_json::from_str(&s).ok()),
            started_at: started_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            resolved_at: resolved_at.and_then(|s| s.parse().ok()),
            project_hash: row.get("project_hash")?,
        })
    }

    fn row_to_waypoint(row: &Row) -> rusqlite::Result<PathWaypoint> {
        let waypoint_type: String = row.get("waypoint_type")?;
        let created_at: String = row.get("created_at")?;
        Ok(PathWaypoint {
            id: row.get("id")?,
            path_id: row.get("path_id")?,
            observation_id: row.get("observation_id")?,
            waypoint_type: waypoint_type.parse().unwrap_or(WaypointType::Attempt),
            sequence_order: row.get("sequence_order")?,
            summary: row.get("summary")?,
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    /// The single active path for this project, if any. The path-tracking state machine checks
    /// this before starting a new one — at most one active path per project is an invariant
    /// enforced by the caller, not a database constraint, since "active" is a value inside a
    /// shared `status` column rather than a dedicated flag.
    pub fn active(&self) -> Result<Option<DebugPath>> {
        self.conn
            .query_row(
                "SELECT * FROM debug_paths WHERE project_hash = ?1 AND status = 'active' ORDER BY started_at DESC LIMIT 1",
                params![self.project_hash],
                Self::row_to_path,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn start(&self, trigger_summary: &str) -> Result<DebugPath> {
        let id = new_id();
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO debug_paths (id, status, trigger_summary, started_at, project_hash)
                 VALUES (?1, 'active', ?2, ?3, ?4)",
                params![id, trigger_summary, now, self.project_hash],
            )?;
            Ok(())
        })?;
        self.find(&id)?.ok_or(StorageError::NotFound)
    }

    pub fn find(&self, id: &str) -> Result<Option<DebugPath>> {
        self.conn
            .query_row(
                "SELECT * FROM debug_paths WHERE id = ?1 AND project_hash = ?2",
                params![id, self.project_hash],
                Self::row_to_path,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn resolve(&self, id: &str, resolution_summary: &str, kiss_summary: Option<serde_json::Value>) -> Result<()> {
        let now = now_rfc3339();
        let kiss = kiss_summary.map(|v| v.to_string());
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE debug_paths SET status = 'resolved', resolution_summary = ?1, kiss_summary = ?2, resolved_at = ?3
                 WHERE id = ?4 AND project_hash = ?5",
                params![resolution_summary, kiss, now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    pub fn abandon(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE debug_paths SET status = 'abandoned', resolved_at = ?1 WHERE id = ?2 AND project_hash = ?3",
                params![now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// Append a waypoint at the next sequence position. No-ops (returns `Ok(None)`) once the
    /// path already holds [`MAX_WAYPOINTS_PER_PATH`] waypoints.
    pub fn add_waypoint(
        &self,
        path_id: &str,
        waypoint_type: WaypointType,
        summary: &str,
        observation_id: Option<&str>,
    ) -> Result<Option<PathWaypoint>> {
        let now = now_rfc3339();
        let id = new_id();

        let inserted = immediate_transaction(self.conn, || {
            let count: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM path_waypoints WHERE path_id = ?1",
                params![path_id],
                |row| row.get(0),
            )?;
            if count >= MAX_WAYPOINTS_PER_PATH {
                return Ok(false);
            }
            self.conn.execute(
                "INSERT INTO path_waypoints (id, path_id, observation_id, waypoint_type, sequence_order, summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, path_id, observation_id, waypoint_type.to_string(), count, summary, now],
            )?;
            Ok(true)
        })?;

        if !inserted {
            return Ok(None);
        }

        self.conn
            .query_row(
                "SELECT * FROM path_waypoints WHERE id = ?1",
                params![id],
                Self::row_to_waypoint,
            )
            .map(Some)
            .map_err(StorageError::from)
    }

    /// All waypoints for a path, in sequence order — what renders as the path's timeline.
    pub fn waypoints(&self, path_id: &str) -> Result<Vec<PathWaypoint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM path_waypoints WHERE path_id = ?1 ORDER BY sequence_order ASC")?;
        let rows = stmt.query_map(params![path_id], Self::row_to_waypoint)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    pub fn list(&self, status: Option<DebugPathStatus>, limit: i64) -> Result<Vec<DebugPath>> {
        let limit = limit.clamp(1, super::MAX_LIST_LIMIT);
        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM debug_paths WHERE project_hash = ?1 AND status = ?2 ORDER BY started_at DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![self.project_hash, s.to_string(), limit], Self::row_to_path)?;
                rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM debug_paths WHERE project_hash = ?1 ORDER BY started_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![self.project_hash, limit], Self::row_to_path)?;
                rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
            }
        }
    }
}

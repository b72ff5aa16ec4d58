//! Threshold-store repository.
//!
//! Persists the topic-shift detector's per-`(project_hash, session_id)` EWMA mean/variance state
//! across process restarts — a short-lived hook invocation that triggers a shift decision must
//! see the same adaptive threshold the long-lived server session would have computed. Also logs
//! every decision (shifted or not) to `shift_decisions` for audit, independent of the state
//! table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, new_id, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::{ShiftDecision, ThresholdState};

pub struct ThresholdRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> ThresholdRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_state(row: &Row) -> rusqlite::Result<ThresholdState> {
        let updated_at: String = row.get("updated_at")?;
        Ok(ThresholdState {
            project_hash: row.get("project_hash")?,
            session_id: row.get("session_id")?,
            ewma_mean: row.get("ewma_mean")?,
            ewma_variance: row.get("ewma_variance")?,
            sample_count: row.get("sample_count")?,
            updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    fn row_to_decision(row: &Row) -> rusqlite::Result<ShiftDecision> {
        let created_at: String = row.get("created_at")?;
        Ok(ShiftDecision {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            session_id: row.get("session_id")?,
            distance: row.get("distance")?,
            threshold: row.get("threshold")?,
            shifted: row.get::<_, i64>("shifted")? != 0,
            ewma_mean: row.get("ewma_mean")?,
            ewma_variance: row.get("ewma_variance")?,
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    pub fn get(&self, session_id: &str) -> Result<Option<ThresholdState>> {
        self.conn
            .query_row(
                "SELECT * FROM threshold_store WHERE project_hash = ?1 AND session_id = ?2",
                params![self.project_hash, session_id],
                Self::row_to_state,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Upsert the EWMA state for `session_id`. Called after every topic-shift evaluation,
    /// whether or not it decided a shift occurred.
    pub fn upsert(&self, session_id: &str, ewma_mean: f64, ewma_variance: f64, sample_count: i64) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO threshold_store (project_hash, session_id, ewma_mean, ewma_variance, sample_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(project_hash, session_id) DO UPDATE SET
                    ewma_mean = excluded.ewma_mean,
                    ewma_variance = excluded.ewma_variance,
                    sample_count = excluded.sample_count,
                    updated_at = excluded.updated_at",
                params![self.project_hash, session_id, ewma_mean, ewma_variance, sample_count, now],
            )?;
            Ok(())
        })
    }

    /// Append one shift decision to the audit log.
    pub fn record_decision(
        &self,
        session_id: &str,
        distance: f64,
        threshold: f64,
        shifted: bool,
        ewma_mean: f64,
        ewma_variance: f64,
    ) -> Result<ShiftDecision> {
        let id = new_id();
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO shift_decisions
                    (id, project_hash, session_id, distance, threshold, shifted, ewma_mean, ewma_variance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![id, self.project_hash, session_id, distance, threshold, shifted as i64, ewma_mean, ewma_variance, now],
            )?;
            Ok(())
        })?;
        self.conn
            .query_row(
                "SELECT * FROM shift_decisions WHERE id = ?1",
                params![id],
                Self::row_to_decision,
            )
            .map_err(StorageError::from)
    }

    pub fn recent_decisions(&self, session_id: &str, limit: i64) -> Result<Vec<ShiftDecision>> {
        let limit = limit.clamp(1, super::MAX_LIST_LIMIT);
        let mut stmt = self.conn.prepare(
            "SELECT * FROM shift_decisions WHERE project_hash = ?1 AND session_id = ?2 ORDER BY created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![self.project_hash, session_id, limit], Self::row_to_decision)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        migrations::apply_migrations(&c, false).unwrap();
        c
    }

    #[test]
    fn upsert_then_get_round_trips_state() {
        let c = conn();
        let repo = ThresholdRepository::new(&c, "proj-a");
        repo.upsert("sess-1", 0.25, 0.01, 5).unwrap();
        let state = repo.get("sess-1").unwrap().unwrap();
        assert_eq!(state.sample_count, 5);
        assert!((state.ewma_mean - 0.25).abs() < 1e-9);
    }

    #[test]
    fn upsert_twice_overwrites_rather_than_duplicating() {
        let c = conn();
        let repo = ThresholdRepository::new(&c, "proj-a");
        repo.upsert("sess-1", 0.25, 0.01, 5).unwrap();
        repo.upsert("sess-1", 0.30, 0.02, 6).unwrap();
        let state = repo.get("sess-1").unwrap().unwrap();
        assert_eq!(state.sample_count, 6);
    }

    #[test]
    fn record_decision_then_recent_decisions_returns_it() {
        let c = conn();
        let repo = ThresholdRepository::new(&c, "proj-a");
        repo.record_decision("sess-1", 0.5, 0.3, true, 0.2, 0.01).unwrap();
        let decisions = repo.recent_decisions("sess-1", 10).unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].shifted);
    }
}

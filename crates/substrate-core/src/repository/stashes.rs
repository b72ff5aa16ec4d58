//! Stash repository.
//!
//! A stash snapshots a set of observations under a topic label when the topic-shift detector
//! fires, so the prior thread of work can be resumed later without losing the embeddings it had
//! accumulated at the time it was set aside.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, new_id, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::{Stash, StashStatus};

pub struct StashRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> StashRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_stash(row: &Row) -> rusqlite::Result<Stash> {
        let observation_ids: String = row.get("observation_ids")?;
        let snapshots: String = row.get("snapshots")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Stash {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            session_id: row.get("session_id")?,
            topic_label: row.get("topic_label")?,
            summary: row.get("summary")?,
            observation_ids: serde_json::from_str(&observation_ids).unwrap_or_default(),
            snapshots: serde_json::from_str(&snapshots).unwrap_or_default(),
            status: status.parse().unwrap_or(StashStatus::Stashed),
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    pub fn create(
        &self,
        session_id: Option<&str>,
        topic_label: &str,
        summary: &str,
        observation_ids: &[String],
        snapshots: &[crate::model::ObservationSnapshot],
    ) -> Result<Stash> {
        let id = new_id();
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO stashes
                    (id, project_hash, session_id, topic_label, summary, observation_ids, snapshots, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'stashed', ?8, ?8)",
                params![
                    id,
                    self.project_hash,
                    session_id,
                    topic_label,
                    summary,
                    serde_json::to_string(observation_ids).unwrap_or_default(),
                    serde_json::to_string(snapshots).unwrap_or_default(),
                    now,
                ],
            )?;
            Ok(())
        })?;
        self.find(&id)?.ok_or(StorageError::NotFound)
    }

    pub fn find(&self, id: &str) -> Result<Option<Stash>> {
        self.conn
            .query_row(
                "SELECT * FROM stashes WHERE id = ?1 AND project_hash = ?2",
                params![id, self.project_hash],
                Self::row_to_stash,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn list(&self, status: Option<StashStatus>, limit: i64) -> Result<Vec<Stash>> {
        let limit = limit.clamp(1, super::MAX_LIST_LIMIT);
        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM stashes WHERE project_hash = ?1 AND status = ?2 ORDER BY updated_at DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![self.project_hash, s.to_string(), limit], Self::row_to_stash)?;
                rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM stashes WHERE project_hash = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![self.project_hash, limit], Self::row_to_stash)?;
                rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
            }
        }
    }

    pub fn resume(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE stashes SET status = 'resumed', updated_at = ?1 WHERE id = ?2 AND project_hash = ?3",
                params![now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// Mark every stash older than `cutoff_rfc3339` and still `stashed` as `expired` — curation's
    /// staleness sweep over stashes.
    pub fn expire_older_than(&self, cutoff_rfc3339: &str) -> Result<u32> {
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE stashes SET status = 'expired', updated_at = ?1
                 WHERE project_hash = ?2 AND status = 'stashed' AND created_at < ?3",
                params![now_rfc3339(), self.project_hash, cutoff_rfc3339],
            )?;
            Ok(updated as u32)
        })
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
    fn create_then_find_round_trips_observation_ids() {
        let c = conn();
        let repo = StashRepository::new(&c, "proj-a");
        let stash = repo
            .create(Some("sess-1"), "auth refactor", "paused to fix a build error", &["obs-1".into(), "obs-2".into()], &[])
            .unwrap();
        let found = repo.find(&stash.id).unwrap().unwrap();
        assert_eq!(found.observation_ids, vec!["obs-1", "obs-2"]);
        assert_eq!(found.status, StashStatus::Stashed);
    }

    #[test]
    fn resume_transitions_status() {
        let c = conn();
        let repo = StashRepository::new(&c, "proj-a");
        let stash = repo.create(None, "topic", "summary", &[], &[]).unwrap();
        repo.resume(&stash.id).unwrap();
        assert_eq!(repo.find(&stash.id).unwrap().unwrap().status, StashStatus::Resumed);
    }

    #[test]
    fn expire_older_than_only_affects_still_stashed_entries() {
        let c = conn();
        let repo = StashRepository::new(&c, "proj-a");
        let stash = repo.create(None, "topic", "summary", &[], &[]).unwrap();
        let future_cutoff = "2999-01-01T00:00:00Z";
        let expired = repo.expire_older_than(future_cutoff).unwrap();
        assert_eq!(expired, 1);
        assert_eq!(repo.find(&stash.id).unwrap().unwrap().status, StashStatus::Expired);
    }
}

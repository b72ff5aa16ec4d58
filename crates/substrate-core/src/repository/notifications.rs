//! Notification repository.
//!
//! A small append-only inbox the enrichment agents write to (a path resolved, a stash expired, a
//! curation pass that pruned a lot of observations) and `status` surfaces unread.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, new_id, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::Notification;

pub struct NotificationRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> NotificationRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_notification(row: &Row) -> rusqlite::Result<Notification> {
        let metadata: String = row.get("metadata")?;
        let created_at: String = row.get("created_at")?;
        let read_at: Option<String> = row.get("read_at")?;
        Ok(Notification {
            id: row.get("id")?,
            project_hash: row.get("project_hash")?,
            kind: row.get("kind")?,
            message: row.get("message")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            read_at: read_at.and_then(|s| s.parse().ok()),
        })
    }

    pub fn create(&self, kind: &str, message: &str, metadata: serde_json::Value) -> Result<Notification> {
        let id = new_id();
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO notifications (id, project_hash, kind, message, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, self.project_hash, kind, message, metadata.to_string(), now],
            )?;
            Ok(())
        })?;
        self.find(&id)?.ok_or(StorageError::NotFound)
    }

    pub fn find(&self, id: &str) -> Result<Option<Notification>> {
        self.conn
            .query_row(
                "SELECT * FROM notifications WHERE id = ?1 AND project_hash = ?2",
                params![id, self.project_hash],
                Self::row_to_notification,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn list_unread(&self, limit: i64) -> Result<Vec<Notification>> {
        let limit = limit.clamp(1, super::MAX_LIST_LIMIT);
        let mut stmt = self.conn.prepare(
            "SELECT * FROM notifications WHERE project_hash = ?1 AND read_at IS NULL ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![self.project_hash, limit], Self::row_to_notification)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    pub fn mark_read(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE notifications SET read_at = ?1 WHERE id = ?2 AND project_hash = ?3",
                params![now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
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
    fn create_then_list_unread_returns_it() {
        let c = conn();
        let repo = NotificationRepository::new(&c, "proj-a");
        repo.create("path_resolved", "debug path resolved", serde_json::json!({"path_id": "p1"})).unwrap();
        let unread = repo.list_unread(10).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, "path_resolved");
    }

    #[test]
    fn mark_read_removes_it_from_the_unread_list() {
        let c = conn();
        let repo = NotificationRepository::new(&c, "proj-a");
        let note = repo.create("curation", "pruned 3 observations", serde_json::json!({})).unwrap();
        repo.mark_read(&note.id).unwrap();
        assert!(repo.list_unread(10).unwrap().is_empty());
    }
}

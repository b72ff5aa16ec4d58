//! Tool-registry repository.
//!
//! Tracks every tool surface `discover_tools` has seen (MCP servers, slash commands, skills,
//! plugins, builtins) and a rolling usage-event log `report_tools` appends to. `status` drifts
//! from `active` toward `stale`/`demoted` through the curation agent, not here — this repository
//! only records facts.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::{ToolRegistryEntry, ToolScope, ToolStatus, ToolType};

pub struct ToolRegistryRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> ToolRegistryRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<ToolRegistryEntry> {
        let tool_type: String = row.get("tool_type")?;
        let scope: String = row.get("scope")?;
        let status: String = row.get("status")?;
        let last_used_at: Option<String> = row.get("last_used_at")?;
        let discovered_at: String = row.get("discovered_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(ToolRegistryEntry {
            name: row.get("name")?,
            tool_type: tool_type.parse().unwrap_or(ToolType::Builtin),
            scope: scope.parse().unwrap_or(ToolScope::Project),
            project_hash: row.get("project_hash")?,
            source: row.get("source")?,
            description: row.get("description")?,
            usage_count: row.get("usage_count")?,
            last_used_at: last_used_at.and_then(|s| s.parse().ok()),
            discovered_at: discovered_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            status: status.parse().unwrap_or(ToolStatus::Active),
        })
    }

    /// Record a tool discovered by `discover_tools`. Upserts on `(name, scope, type)` per the
    /// schema's composite primary key — a global tool has a `NULL` project_hash and is visible
    /// across projects; a project-scoped tool upserts independently per project.
    pub fn upsert(
        &self,
        name: &str,
        tool_type: ToolType,
        scope: ToolScope,
        source: &str,
        description: Option<&str>,
    ) -> Result<ToolRegistryEntry> {
        let now = now_rfc3339();
        let project_hash = match scope {
            ToolScope::Global => None,
            _ => Some(self.project_hash),
        };

        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO tool_registry
                    (name, tool_type, scope, project_hash, source, description, usage_count, discovered_at, updated_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7, 'active')
                 ON CONFLICT(name, scope, project_hash) DO UPDATE SET
                    tool_type = excluded.tool_type,
                    source = excluded.source,
                    description = excluded.description,
                    updated_at = excluded.updated_at",
                params![name, tool_type.to_string(), scope.to_string(), project_hash, source, description, now],
            )?;
            Ok(())
        })?;

        self.find(name, scope)?.ok_or(StorageError::NotFound)
    }

    pub fn find(&self, name: &str, scope: ToolScope) -> Result<Option<ToolRegistryEntry>> {
        let project_hash = match scope {
            ToolScope::Global => None,
            _ => Some(self.project_hash),
        };
        self.conn
            .query_row(
                "SELECT * FROM tool_registry WHERE name = ?1 AND scope = ?2 AND project_hash IS ?3",
                params![name, scope.to_string(), project_hash],
                Self::row_to_entry,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Every tool visible to this project: globally scoped entries plus this project's own.
    pub fn list_visible(&self) -> Result<Vec<ToolRegistryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM tool_registry WHERE project_hash IS NULL OR project_hash = ?1 ORDER BY usage_count DESC",
        )?;
        let rows = stmt.query_map(params![self.project_hash], Self::row_to_entry)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    /// Record one usage event and bump the registry entry's running count, all inside one
    /// transaction — `report_tools` never leaves the two out of sync.
    pub fn record_usage(&self, tool_name: &str, success: bool) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO tool_usage_events (tool_name, project_hash, success, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![tool_name, self.project_hash, success as i64, now],
            )?;
            self.conn.execute(
                "UPDATE tool_registry SET usage_count = usage_count + 1, last_used_at = ?1, updated_at = ?1
                 WHERE name = ?2 AND (project_hash IS NULL OR project_hash = ?3)",
                params![now, tool_name, self.project_hash],
            )?;
            Ok(())
        })
    }

    pub fn set_status(&self, name: &str, scope: ToolScope, status: ToolStatus) -> Result<()> {
        let now = now_rfc3339();
        let project_hash = match scope {
            ToolScope::Global => None,
            _ => Some(self.project_hash),
        };
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE tool_registry SET status = ?1, updated_at = ?2 WHERE name = ?3 AND scope = ?4 AND project_hash IS ?5",
                params![status.to_string(), now, name, scope.to_string(), project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// Entries untouched since before `cutoff_rfc3339` — candidates for curation's staleness
    /// sweep to demote.
    pub fn stale_since(&self, cutoff_rfc3339: &str) -> Result<Vec<ToolRegistryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM tool_registry
             WHERE (project_hash IS NULL OR project_hash = ?1)
               AND status = 'active'
               AND (last_used_at IS NULL OR last_used_at < ?2)
               AND updated_at < ?2",
        )?;
        let rows = stmt.query_map(params![self.project_hash, cutoff_rfc3339], Self::row_to_entry)?;
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
    fn upsert_then_find_round_trips() {
        let c = conn();
        let repo = ToolRegistryRepository::new(&c, "proj-a");
        repo.upsert("substrate-mcp", ToolType::McpServer, ToolScope::Project, "registered", None).unwrap();
        let entry = repo.find("substrate-mcp", ToolScope::Project).unwrap().unwrap();
        assert_eq!(entry.usage_count, 0);
        assert_eq!(entry.status, ToolStatus::Active);
    }

    #[test]
    fn record_usage_increments_count_and_logs_an_event() {
        let c = conn();
        let repo = ToolRegistryRepository::new(&c, "proj-a");
        repo.upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", None).unwrap();
        repo.record_usage("grep", true).unwrap();
        repo.record_usage("grep", false).unwrap();

        let entry = repo.find("grep", ToolScope::Global).unwrap().unwrap();
        assert_eq!(entry.usage_count, 2);

        let events: i64 = c.query_row("SELECT COUNT(*) FROM tool_usage_events", [], |r| r.get(0)).unwrap();
        assert_eq!(events, 2);
    }

    #[test]
    fn global_tools_are_visible_across_projects() {
        let c = conn();
        ToolRegistryRepository::new(&c, "proj-a")
            .upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", None)
            .unwrap();
        let visible = ToolRegistryRepository::new(&c, "proj-b").list_visible().unwrap();
        assert_eq!(visible.len(), 1);
    }
}

//! Schema migrations.
//!
//! Migrations are numbered, named, idempotent in effect, and append-only: an already-released
//! migration body is never edited, only superseded by a later one. A tracking table
//! (`_migrations`) records the version numbers that have been applied. Migrations flagged
//! `requires_vector` are skipped — and, crucially, NOT recorded as applied — when the vector
//! index failed to come up for this process; they retry on every future open until it does
//! (scenario F in the testable-properties list).

use rusqlite::Connection;

use crate::error::{Result, StorageError};

/// A single schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
    /// If true, this migration is skipped (and left unrecorded) when the vector index is
    /// unavailable for this process.
    pub requires_vector: bool,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: observations, sessions, tool registry, notifications",
        up: MIGRATION_V1_UP,
        requires_vector: false,
    },
    Migration {
        version: 2,
        description: "knowledge graph: nodes, edges, debug paths, waypoints",
        up: MIGRATION_V2_UP,
        requires_vector: false,
    },
    Migration {
        version: 3,
        description: "topic-shift detector state: stashes, threshold store, shift decisions",
        up: MIGRATION_V3_UP,
        requires_vector: false,
    },
    Migration {
        version: 4,
        description: "full-text index over observations (title, content), porter+unicode61",
        up: MIGRATION_V4_UP,
        requires_vector: false,
    },
    Migration {
        version: 5,
        description: "vector store backing the in-process HNSW index (float[384])",
        up: MIGRATION_V5_UP,
        requires_vector: true,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE observations (
    rowid INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    project_hash TEXT NOT NULL,
    session_id TEXT,
    source TEXT NOT NULL,
    title TEXT,
    content TEXT NOT NULL,
    embedding BLOB,
    embedding_model TEXT,
    embedding_version INTEGER,
    classification TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    UNIQUE(project_hash, id)
);

CREATE INDEX idx_observations_project ON observations(project_hash);
CREATE INDEX idx_observations_session ON observations(session_id);
CREATE INDEX idx_observations_unclassified ON observations(classification) WHERE classification IS NULL;
CREATE INDEX idx_observations_embedding_pending ON observations(embedding) WHERE embedding IS NULL;
CREATE INDEX idx_observations_deleted ON observations(deleted_at);

CREATE TABLE sessions (
    id TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    summary TEXT
);

CREATE INDEX idx_sessions_project ON sessions(project_hash);

CREATE TABLE tool_registry (
    name TEXT NOT NULL,
    tool_type TEXT NOT NULL,
    scope TEXT NOT NULL,
    project_hash TEXT,
    source TEXT NOT NULL,
    description TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT,
    discovered_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    PRIMARY KEY (name, scope, project_hash)
);

CREATE TABLE tool_usage_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tool_name TEXT NOT NULL,
    project_hash TEXT NOT NULL,
    success INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_tool_usage_events_tool ON tool_usage_events(tool_name);

CREATE TABLE notifications (
    id TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    read_at TEXT
);

CREATE INDEX idx_notifications_project ON notifications(project_hash);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE knowledge_graph_nodes (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    project_hash TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    observation_ids TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(project_hash, type, name)
);

CREATE INDEX idx_kg_nodes_project ON knowledge_graph_nodes(project_hash);

CREATE TABLE knowledge_graph_edges (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES knowledge_graph_nodes(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES knowledge_graph_nodes(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    weight REAL NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX idx_kg_edges_source ON knowledge_graph_edges(source_id);
CREATE INDEX idx_kg_edges_target ON knowledge_graph_edges(target_id);

CREATE TABLE debug_paths (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    trigger_summary TEXT NOT NULL,
    resolution_summary TEXT,
    kiss_summary TEXT,
    started_at TEXT NOT NULL,
    resolved_at TEXT,
    project_hash TEXT NOT NULL
);

CREATE INDEX idx_debug_paths_project_status ON debug_paths(project_hash, status);

CREATE TABLE path_waypoints (
    id TEXT PRIMARY KEY,
    path_id TEXT NOT NULL REFERENCES debug_paths(id) ON DELETE CASCADE,
    observation_id TEXT,
    waypoint_type TEXT NOT NULL,
    sequence_order INTEGER NOT NULL,
    summary TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(path_id, sequence_order)
);

CREATE INDEX idx_path_waypoints_path ON path_waypoints(path_id);
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE stashes (
    id TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    session_id TEXT,
    topic_label TEXT NOT NULL,
    summary TEXT NOT NULL,
    observation_ids TEXT NOT NULL DEFAULT '[]',
    snapshots TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'stashed',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_stashes_project ON stashes(project_hash);

CREATE TABLE threshold_store (
    project_hash TEXT NOT NULL,
    session_id TEXT NOT NULL,
    ewma_mean REAL NOT NULL,
    ewma_variance REAL NOT NULL,
    sample_count INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project_hash, session_id)
);

CREATE TABLE shift_decisions (
    id TEXT PRIMARY KEY,
    project_hash TEXT NOT NULL,
    session_id TEXT NOT NULL,
    distance REAL NOT NULL,
    threshold REAL NOT NULL,
    shifted INTEGER NOT NULL,
    ewma_mean REAL NOT NULL,
    ewma_variance REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_shift_decisions_session ON shift_decisions(project_hash, session_id);
"#;

const MIGRATION_V4_UP: &str = r#"
CREATE VIRTUAL TABLE observations_fts USING fts5(
    title,
    content,
    content='observations',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

INSERT INTO observations_fts(rowid, title, content)
    SELECT rowid, title, content FROM observations;

CREATE TRIGGER observations_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, content) VALUES (new.rowid, new.title, new.content);
END;

CREATE TRIGGER observations_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, content)
        VALUES('delete', old.rowid, old.title, old.content);
END;

CREATE TRIGGER observations_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, content)
        VALUES('delete', old.rowid, old.title, old.content);
    INSERT INTO observations_fts(rowid, title, content) VALUES (new.rowid, new.title, new.content);
END;
"#;

const MIGRATION_V5_UP: &str = r#"
CREATE TABLE observations_vec (
    observation_id TEXT PRIMARY KEY REFERENCES observations(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL DEFAULT 384
);
"#;

fn ensure_tracking_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Highest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    ensure_tracking_table(conn)?;
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
        row.get(0)
    })?;
    Ok(version)
}

/// Apply every migration not yet recorded in `_migrations`.
///
/// Vector-dependent migrations are skipped (not recorded) when `vector_available` is false;
/// they will be attempted again on the next call with `vector_available = true`. Every other
/// migration runs inside its own write transaction: the whole body applies, or none of it does.
pub fn apply_migrations(conn: &Connection, vector_available: bool) -> Result<u32> {
    ensure_tracking_table(conn)?;

    let applied_versions: std::collections::HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM _migrations")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut applied = 0u32;
    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            continue;
        }
        if migration.requires_vector && !vector_available {
            tracing::info!(
                version = migration.version,
                "skipping vector-dependent migration, extension unavailable"
            );
            continue;
        }

        tracing::info!(version = migration.version, description = migration.description, "applying migration");

        conn.execute_batch("BEGIN IMMEDIATE;")
            .map_err(rusqlite::Error::from)?;
        let result = (|| -> rusqlite::Result<()> {
            conn.execute_batch(migration.up)?;
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, datetime('now'))",
                rusqlite::params![migration.version, migration.description],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT;")?;
                applied += 1;
            }
            Err(source) => {
                conn.execute_batch("ROLLBACK;").ok();
                return Err(StorageError::Migration {
                    version: migration.version,
                    description: migration.description,
                    source,
                });
            }
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_starts_at_version_zero() {
        let conn = memory_conn();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn applying_twice_is_a_no_op_the_second_time() {
        let conn = memory_conn();
        let first = apply_migrations(&conn, true).unwrap();
        assert!(first > 0);
        let second = apply_migrations(&conn, true).unwrap();
        assert_eq!(second, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[test]
    fn vector_migration_is_skipped_and_retried_without_the_extension() {
        let conn = memory_conn();
        apply_migrations(&conn, false).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len() - 1);

        // Retrying with the extension available picks up exactly the skipped migration.
        let applied = apply_migrations(&conn, true).unwrap();
        assert_eq!(applied, 1);

        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'observations_vec'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[test]
    fn fts_triggers_keep_the_index_in_sync() {
        let conn = memory_conn();
        apply_migrations(&conn, true).unwrap();

        conn.execute(
            "INSERT INTO observations (id, project_hash, source, content, created_at, updated_at)
             VALUES ('abc123', 'proj', 'hook:Edit', 'fixed the null check', datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();

        let matches: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM observations_fts WHERE observations_fts MATCH 'null'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(matches, 1);
    }
}

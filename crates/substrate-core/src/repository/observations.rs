//! Observation repository.
//!
//! The busiest repository in the system: every hook invocation writes through it synchronously,
//! and every enrichment agent reads unclassified/unembedded rows through it on every tick.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{clamp_limit, immediate_transaction, new_id, now_rfc3339, parse_timestamp};
use crate::embeddings::{embedding_from_bytes, embedding_to_bytes};
use crate::error::{Result, StorageError};
use crate::model::{Classification, Observation, MAX_CONTENT_LEN};

/// Input to [`ObservationRepository::create`].
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub session_id: Option<String>,
    pub source: String,
    pub title: Option<String>,
    pub content: String,
}

/// Cursor-paginated listing filter. `before_rowid` lets callers page backwards through history
/// (newest page first, following rowid order) without an offset, which would otherwise re-scan
/// skipped rows on every page.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub session_id: Option<String>,
    pub source_prefix: Option<String>,
    pub before_rowid: Option<i64>,
    pub limit: Option<i64>,
    pub include_deleted: bool,
}

pub struct ObservationRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> ObservationRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn validate_content(content: &str) -> Result<()> {
        if content.is_empty() {
            return Err(StorageError::EmptyContent);
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(StorageError::ContentTooLong(content.chars().count()));
        }
        Ok(())
    }

    fn row_to_observation(row: &Row) -> rusqlite::Result<Observation> {
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding")?;
        let classification_text: Option<String> = row.get("classification")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let deleted_at: Option<String> = row.get("deleted_at")?;

        Ok(Observation {
            id: row.get("id")?,
            rowid: row.get("rowid")?,
            project_hash: row.get("project_hash")?,
            session_id: row.get("session_id")?,
            source: row.get("source")?,
            title: row.get("title")?,
            content: row.get("content")?,
            embedding: embedding_bytes.as_deref().and_then(embedding_from_bytes),
            embedding_model: row.get("embedding_model")?,
            embedding_version: row.get("embedding_version")?,
            classification: classification_text.and_then(|t| t.parse().ok()),
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            deleted_at: deleted_at.and_then(|s| s.parse().ok()),
        })
    }

    /// Insert a new observation synchronously inside an immediate write transaction, then read
    /// it back by its freshly assigned rowid. Content is validated before the database is
    /// touched, per the repository-boundary invariant that input is checked before any query
    /// executes.
    pub fn create(&self, input: NewObservation) -> Result<Observation> {
        Self::validate_content(&input.content)?;

        let id = new_id();
        let now = now_rfc3339();

        immediate_transaction(self.conn, || {
            self.conn.execute(
                "INSERT INTO observations
                    (id, project_hash, session_id, source, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![id, self.project_hash, input.session_id, input.source, input.title, input.content, now],
            )?;
            Ok(())
        })?;

        self.find_by_id(&id, false)?.ok_or(StorageError::NotFound)
    }

    /// Save an observation directly (the "direct save" lifecycle path distinct from hook
    /// ingestion, e.g. the `save-memory` tool). Same validation and transaction discipline as
    /// [`Self::create`].
    pub fn save(&self, title: Option<String>, content: String, source: &str) -> Result<Observation> {
        self.create(NewObservation { session_id: None, source: source.to_string(), title, content })
    }

    fn find_by_id_row(&self, id: &str, include_deleted: bool) -> Result<Option<Observation>> {
        let sql = format!(
            "SELECT rowid, * FROM observations WHERE id = ?1 AND project_hash = ?2 {}",
            if include_deleted { "" } else { "AND deleted_at IS NULL" }
        );
        self.conn
            .query_row(&sql, params![id, self.project_hash], Self::row_to_observation)
            .optional()
            .map_err(StorageError::from)
    }

    /// Find by text identifier. `include_deleted` lets the `restore` recall action locate a
    /// soft-deleted row that a plain lookup would otherwise hide.
    pub fn find_by_id(&self, id: &str, include_deleted: bool) -> Result<Option<Observation>> {
        self.find_by_id_row(id, include_deleted)
    }

    /// Paginated listing, newest first (descending rowid), honoring the default/maximum limit
    /// and an optional `before_rowid` cursor.
    pub fn list(&self, filter: ListFilter) -> Result<Vec<Observation>> {
        let limit = clamp_limit(filter.limit);
        let mut sql = String::from("SELECT rowid, * FROM observations WHERE project_hash = ?1");
        let mut idx = 2;
        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(self.project_hash.to_string())];

        if !filter.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if let Some(session_id) = &filter.session_id {
            sql.push_str(&format!(" AND session_id = ?{idx}"));
            query_params.push(Box::new(session_id.clone()));
            idx += 1;
        }
        if let Some(prefix) = &filter.source_prefix {
            sql.push_str(&format!(" AND source LIKE ?{idx}"));
            query_params.push(Box::new(format!("{prefix}%")));
            idx += 1;
        }
        if let Some(before) = filter.before_rowid {
            sql.push_str(&format!(" AND rowid < ?{idx}"));
            query_params.push(Box::new(before));
            idx += 1;
        }
        sql.push_str(&format!(" ORDER BY rowid DESC LIMIT ?{idx}"));
        query_params.push(Box::new(limit));

        let mut stmt = self.conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = query_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), Self::row_to_observation)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    /// Observations missing an embedding, oldest first (ascending rowid — the ordering guarantee
    /// enrichment agents rely on to make steady progress through a backlog).
    ///
    /// Scoped to this repository's project except when `all_projects` is set, which the LLM and
    /// embedding enrichment processors use to tolerate a project-hash mismatch between the
    /// long-lived server process and short-lived hook invocations (spec open question #3,
    /// resolved in DESIGN.md to preserve this cross-project listing for reads only).
    pub fn list_unembedded(&self, limit: i64, all_projects: bool) -> Result<Vec<Observation>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let sql = if all_projects {
            "SELECT rowid, * FROM observations WHERE embedding IS NULL AND deleted_at IS NULL ORDER BY rowid ASC LIMIT ?1".to_string()
        } else {
            "SELECT rowid, * FROM observations WHERE embedding IS NULL AND deleted_at IS NULL AND project_hash = ?2 ORDER BY rowid ASC LIMIT ?1".to_string()
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if all_projects {
            stmt.query_map(params![limit], Self::row_to_observation)?
                .collect::<rusqlite::Result<Vec<_>>>()
        } else {
            stmt.query_map(params![limit, self.project_hash], Self::row_to_observation)?
                .collect::<rusqlite::Result<Vec<_>>>()
        };
        rows.map_err(StorageError::from)
    }

    /// Unclassified observations, oldest first, across all projects when `all_projects` is set
    /// (the LLM enrichment processor's usual mode — see spec §4.5 and §9.3).
    pub fn list_unclassified(&self, limit: i64, all_projects: bool) -> Result<Vec<Observation>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let sql = if all_projects {
            "SELECT rowid, * FROM observations WHERE classification IS NULL AND deleted_at IS NULL ORDER BY rowid ASC LIMIT ?1".to_string()
        } else {
            "SELECT rowid, * FROM observations WHERE classification IS NULL AND deleted_at IS NULL AND project_hash = ?2 ORDER BY rowid ASC LIMIT ?1".to_string()
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if all_projects {
            stmt.query_map(params![limit], Self::row_to_observation)?
                .collect::<rusqlite::Result<Vec<_>>>()
        } else {
            stmt.query_map(params![limit, self.project_hash], Self::row_to_observation)?
                .collect::<rusqlite::Result<Vec<_>>>()
        };
        rows.map_err(StorageError::from)
    }

    pub fn soft_delete(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE observations SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND project_hash = ?3",
                params![now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    pub fn restore(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE observations SET deleted_at = NULL, updated_at = ?1 WHERE id = ?2 AND project_hash = ?3",
                params![now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    pub fn update_classification(&self, id: &str, classification: Classification) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE observations SET classification = ?1, updated_at = ?2 WHERE id = ?3 AND project_hash = ?4",
                params![classification.to_string(), now, id, self.project_hash],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// Update classification without project scoping — used by the LLM enrichment processor
    /// when it picked the row up via `list_unclassified(.., all_projects = true)` and may not
    /// share this repository's project hash.
    pub fn update_classification_unscoped(&self, id: &str, classification: Classification) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE observations SET classification = ?1, updated_at = ?2 WHERE id = ?3",
                params![classification.to_string(), now, id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// Soft-delete without project scoping, for the same cross-project reason as
    /// [`Self::update_classification_unscoped`] (noise classification soft-deletes in one step).
    pub fn soft_delete_unscoped(&self, id: &str) -> Result<()> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE observations SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// Attach an embedding (and its model/version labels) to an observation, without project
    /// scoping for the same cross-project reason as classification updates.
    pub fn update_embedding_unscoped(
        &self,
        id: &str,
        embedding: &[f32],
        model: &str,
        version: i64,
    ) -> Result<()> {
        let now = now_rfc3339();
        let bytes = embedding_to_bytes(embedding);
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE observations SET embedding = ?1, embedding_model = ?2, embedding_version = ?3, updated_at = ?4 WHERE id = ?5",
                params![bytes, model, version, now, id],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound);
            }
            Ok(())
        })
    }

    /// The embedding of the most recently stored observation in `session_id` that already has
    /// one, used by the topic-shift detector to compute a cosine distance against the new
    /// embedding just assigned.
    pub fn last_embedded_in_session(
        &self,
        session_id: &str,
        before_rowid: i64,
    ) -> Result<Option<Vec<f32>>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM observations
                 WHERE project_hash = ?1 AND session_id = ?2 AND rowid < ?3 AND embedding IS NOT NULL
                 ORDER BY rowid DESC LIMIT 1",
                params![self.project_hash, session_id, before_rowid],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(bytes.as_deref().and_then(embedding_from_bytes))
    }

    /// Recent observations in `session_id`, used by duplicate suppression's bounded window.
    pub fn recent_in_session(&self, session_id: &str, window: i64) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            "SELECT rowid, * FROM observations
             WHERE project_hash = ?1 AND session_id = ?2 AND deleted_at IS NULL
             ORDER BY rowid DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![self.project_hash, session_id, window], Self::row_to_observation)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    /// All observations belonging to any of `ids` for this project, in no particular order —
    /// used by `recall`'s explicit-identifier view/purge/restore paths.
    pub fn find_many(&self, ids: &[String], include_deleted: bool) -> Result<Vec<Observation>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(obs) = self.find_by_id(id, include_deleted)? {
                out.push(obs);
            }
        }
        Ok(out)
    }

    /// Substring match over content, newest first — `recall`'s search fallback when the
    /// `vector-search` feature (and with it FTS5 keyword search) is compiled out.
    pub fn search_content_like(&self, needle: &str, limit: i64) -> Result<Vec<Observation>> {
        let pattern = format!("%{needle}%");
        let mut stmt = self.conn.prepare(
            "SELECT rowid, * FROM observations
             WHERE project_hash = ?1 AND deleted_at IS NULL AND content LIKE ?2
             ORDER BY rowid DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![self.project_hash, pattern, limit], Self::row_to_observation)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    /// Observations with an exact title match, newest first — `recall`'s title-match selector.
    pub fn find_by_title(&self, title: &str, include_deleted: bool) -> Result<Vec<Observation>> {
        let sql = format!(
            "SELECT rowid, * FROM observations WHERE project_hash = ?1 AND title = ?2 {} ORDER BY rowid DESC",
            if include_deleted { "" } else { "AND deleted_at IS NULL" }
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![self.project_hash, title], Self::row_to_observation)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    #[allow(dead_code)]
    fn parse_ts_or_now(s: &str) -> chrono::DateTime<chrono::Utc> {
        parse_timestamp(s).unwrap_or_else(|_| chrono::Utc::now())
    }
}

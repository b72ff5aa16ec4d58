//! Keyword search over the `observations_fts` external-content index.
//!
//! Ranking is column-weighted (title 2.0, content 1.0) via FTS5's `bm25()` auxiliary function.
//! `bm25` is lower-is-better; every public function here converts to best-first before returning,
//! matching the teacher's `keyword_search` convention of never leaking the raw ranking-primitive
//! sign to callers.

use rusqlite::{params, Connection};

use crate::error::Result;

/// One keyword hit: the observation's text identifier, its query-normalized score, and a short
/// snippet with highlight markers.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub observation_id: String,
    pub rowid: i64,
    pub score: f32,
    pub snippet: String,
}

/// Characters with special meaning to FTS5's query syntax. Stripped by default so a user's
/// free-text query (which may contain quotes, parens, or a leading `-`) is never misinterpreted
/// as an operator expression — the spec's "queries are sanitized to strip operator syntax by
/// default".
const FTS5_OPERATOR_CHARS: &[char] = &['"', '*', ':', '(', ')', '^', '-'];

/// Strip FTS5 operator syntax from a free-text query. Each whitespace-separated term is
/// stripped of operator characters and, if still non-empty, wrapped in double quotes so that
/// punctuation inside the term (which might otherwise still be parsed) is always treated
/// literally.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace(FTS5_OPERATOR_CHARS, ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct KeywordSearcher;

impl KeywordSearcher {
    /// Search `observations_fts` for `query` within `project_hash`, returning up to `limit` hits
    /// best-first. `include_deleted` controls whether soft-deleted observations are eligible —
    /// `recall`'s `view`/`restore` paths need to find them, `search` never does.
    pub fn search(
        conn: &Connection,
        project_hash: &str,
        query: &str,
        limit: usize,
        include_deleted: bool,
    ) -> Result<Vec<KeywordHit>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            "SELECT o.id, o.rowid,
                    bm25(observations_fts, 2.0, 1.0) AS rank,
                    snippet(observations_fts, 1, '[', ']', '...', 10) AS snip
             FROM observations_fts
             JOIN observations o ON o.rowid = observations_fts.rowid
             WHERE observations_fts MATCH ?1
               AND o.project_hash = ?2
               {deleted_clause}
             ORDER BY rank
             LIMIT ?3",
            deleted_clause = if include_deleted { "" } else { "AND o.deleted_at IS NULL" }
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![sanitized, project_hash, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut hits: Vec<(String, i64, f32, String)> = Vec::new();
        for row in rows {
            let (id, rowid, rank, snip) = row?;
            // bm25 is negative-is-better in SQLite's FTS5 (more negative = more relevant);
            // flip the sign so larger scores mean more relevant, like every other search path.
            hits.push((id, rowid, (-rank) as f32, snip));
        }

        if hits.is_empty() {
            return Ok(vec![]);
        }
        let max_score = hits.iter().map(|(_, _, s, _)| *s).fold(0.0_f32, f32::max).max(0.001);

        Ok(hits
            .into_iter()
            .map(|(observation_id, rowid, score, snippet)| KeywordHit {
                observation_id,
                rowid,
                score: score / max_score,
                snippet,
            })
            .collect())
    }

    /// `(observation_id, normalized_score)` pairs only, for feeding into [`super::hybrid`]
    /// fusion without the snippet payload.
    pub fn search_scores(
        conn: &Connection,
        project_hash: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        Ok(Self::search(conn, project_hash, query, limit, false)?
            .into_iter()
            .map(|hit| (hit.observation_id, hit.score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::apply_migrations(&conn, false).unwrap();
        conn.execute(
            "INSERT INTO observations (id, project_hash, source, title, content, created_at, updated_at)
             VALUES ('obs-1', 'proj-a', 'hook:Edit', 'Auth fix', 'fixed the null check in src/auth.ts', datetime('now'), datetime('now'))",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO observations (id, project_hash, source, title, content, created_at, updated_at)
             VALUES ('obs-2', 'proj-a', 'hook:Edit', 'unrelated', 'refactored the logging module', datetime('now'), datetime('now'))",
            [],
        ).unwrap();
        conn
    }

    #[test]
    fn sanitize_strips_operator_syntax() {
        let sanitized = sanitize_fts5_query("auth* OR (null):check");
        assert!(!sanitized.contains('*'));
        assert!(!sanitized.contains('('));
        assert!(!sanitized.contains(':'));
    }

    #[test]
    fn empty_query_after_sanitizing_returns_no_hits() {
        let conn = seeded_conn();
        let hits = KeywordSearcher::search(&conn, "proj-a", "***", 10, false).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn finds_matching_observation_and_returns_best_first() {
        let conn = seeded_conn();
        let hits = KeywordSearcher::search(&conn, "proj-a", "null check", 10, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation_id, "obs-1");
        assert!(hits[0].snippet.contains('['));
    }

    #[test]
    fn scoped_to_project() {
        let conn = seeded_conn();
        conn.execute(
            "INSERT INTO observations (id, project_hash, source, content, created_at, updated_at)
             VALUES ('obs-3', 'proj-b', 'hook:Edit', 'fixed the null check elsewhere', datetime('now'), datetime('now'))",
            [],
        ).unwrap();
        let hits = KeywordSearcher::search(&conn, "proj-b", "null check", 10, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation_id, "obs-3");
    }
}

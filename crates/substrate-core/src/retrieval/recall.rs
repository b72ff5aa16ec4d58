//! Unified recall: search, view, purge, restore behind one entry point (spec.md §4.6).
//!
//! Search and view share a response shape (`RecallItem`) but fill it differently: search scores
//! and snippets come from the search layer, view's come straight off the stored row. Purge and
//! restore never accept an implicit "all search matches" set — both require the caller to name
//! identifiers explicitly, per the spec's refusal to act on an implicit match set.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use super::budget::{truncate_to_budget, COMPACT_TOKEN_BUDGET, FULL_TOKEN_BUDGET};
use crate::model::Observation;
use crate::repository::ObservationRepository;
use crate::StorageError;

#[cfg(feature = "vector-search")]
use crate::search::{HybridSearchConfig, HybridSearcher, KeywordSearcher, VectorIndex};

/// The four recall actions spec.md §4.6 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallAction {
    Search,
    View,
    Purge,
    Restore,
}

/// Response detail level. `Compact` and `Timeline` share a 2,000-token budget; `Full` gets 4,000.
/// Timeline differs from compact only in how the caller is expected to render it (grouped by
/// time) — both carry the same fields, so this crate does not distinguish their payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    Compact,
    Timeline,
    Full,
}

/// Request to [`recall`]. Exactly one of `query`, `ids`, or `title` is expected to be meaningful
/// per action — `search` reads `query`, `view`/`purge`/`restore` read `ids` (and `view` also
/// accepts `title` as an alternate selector).
#[derive(Debug, Clone, Default)]
pub struct RecallRequest {
    pub action: Option<RecallAction>,
    pub query: Option<String>,
    pub ids: Vec<String>,
    pub title: Option<String>,
    pub detail: DetailLevel,
    pub limit: i64,
    pub include_soft_deleted: bool,
}

impl Default for RecallAction {
    fn default() -> Self {
        Self::Search
    }
}

impl Default for DetailLevel {
    fn default() -> Self {
        Self::Compact
    }
}

/// One recalled observation, shaped for the detail level the caller requested. `content` and
/// `classification` are only populated at `Full` detail; compact/timeline carry a snippet
/// instead.
#[derive(Debug, Clone, Serialize)]
pub struct RecallItem {
    pub id: String,
    pub title: Option<String>,
    pub score: f32,
    pub snippet: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub content: Option<String>,
    pub classification: Option<String>,
    pub deleted: bool,
}

impl RecallItem {
    fn from_observation(obs: &Observation, score: f32, detail: DetailLevel) -> Self {
        let snippet = snippet_of(&obs.content, 200);
        Self {
            id: obs.id.clone(),
            title: obs.title.clone(),
            score,
            snippet,
            source: obs.source.clone(),
            timestamp: obs.updated_at,
            content: matches!(detail, DetailLevel::Full).then(|| obs.content.clone()),
            classification: obs.classification.map(|c| c.to_string()),
            deleted: obs.is_deleted(),
        }
    }

    fn render_cost(&self) -> String {
        // Only the fields actually shown at this item's detail level count toward the budget.
        let mut s = format!("{}{}{}{}", self.id, self.snippet, self.source, self.timestamp);
        if let Some(content) = &self.content {
            s.push_str(content);
        }
        s
    }
}

fn snippet_of(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub items: Vec<RecallItem>,
    pub truncated: bool,
    pub total_matches: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("search requires a query")]
    MissingQuery,

    #[error("purge and restore require explicit identifiers")]
    MissingIdentifiers,
}

/// Run one recall operation. `query_embedding`, when the caller already computed one for
/// `request.query` (via the embedding worker), enables hybrid fusion on top of keyword search;
/// without it, search degrades to keyword-only with no error, matching the hybrid searcher's own
/// empty-vector-list behavior.
pub fn recall(
    conn: &Connection,
    project_hash: &str,
    request: RecallRequest,
    query_embedding: Option<&[f32]>,
    #[cfg(feature = "vector-search")] vector_index: Option<&VectorIndex>,
) -> Result<RecallResponse, RecallError> {
    let limit = request.limit.clamp(1, 20) as usize;
    let action = request.action.unwrap_or_default();

    match action {
        RecallAction::Search => search(
            conn,
            project_hash,
            &request,
            limit,
            query_embedding,
            #[cfg(feature = "vector-search")]
            vector_index,
        ),
        RecallAction::View => view(conn, project_hash, &request, limit),
        RecallAction::Purge => purge(conn, project_hash, &request),
        RecallAction::Restore => restore(conn, project_hash, &request),
    }
}

fn budget_for(detail: DetailLevel) -> usize {
    match detail {
        DetailLevel::Full => FULL_TOKEN_BUDGET,
        DetailLevel::Compact | DetailLevel::Timeline => COMPACT_TOKEN_BUDGET,
    }
}

fn finish(items: Vec<RecallItem>, detail: DetailLevel) -> RecallResponse {
    let budgeted = truncate_to_budget(items, budget_for(detail), RecallItem::render_cost);
    RecallResponse { items: budgeted.items, truncated: budgeted.truncated, total_matches: budgeted.total_matches }
}

#[cfg(feature = "vector-search")]
fn search(
    conn: &Connection,
    project_hash: &str,
    request: &RecallRequest,
    limit: usize,
    query_embedding: Option<&[f32]>,
    vector_index: Option<&VectorIndex>,
) -> Result<RecallResponse, RecallError> {
    let query = request.query.as_deref().ok_or(RecallError::MissingQuery)?;
    let searcher = HybridSearcher::with_config(HybridSearchConfig::default());
    let source_limit = searcher.effective_source_limit(limit);

    let keyword_scores = KeywordSearcher::search_scores(conn, project_hash, query, source_limit)?;
    let vector_scores = match (query_embedding, vector_index) {
        (Some(embedding), Some(index)) => index
            .search(embedding, source_limit)
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let fused = searcher.fuse(&keyword_scores, &vector_scores);
    let obs_repo = ObservationRepository::new(conn, project_hash);
    let ids: Vec<String> = fused.iter().take(limit).map(|(id, _)| id.clone()).collect();
    let observations = obs_repo.find_many(&ids, request.include_soft_deleted)?;
    let by_id: std::collections::HashMap<&str, &Observation> =
        observations.iter().map(|o| (o.id.as_str(), o)).collect();

    let items: Vec<RecallItem> = fused
        .into_iter()
        .take(limit)
        .filter_map(|(id, score)| by_id.get(id.as_str()).map(|obs| RecallItem::from_observation(obs, score, request.detail)))
        .collect();

    Ok(finish(items, request.detail))
}

/// Keyword/vector search requires the `vector-search` feature (which also gates this crate's
/// full-text search layer); without it, `search` degrades to a recency-ordered substring match
/// directly over the observations table rather than erroring outright.
#[cfg(not(feature = "vector-search"))]
fn search(
    conn: &Connection,
    project_hash: &str,
    request: &RecallRequest,
    limit: usize,
    _query_embedding: Option<&[f32]>,
) -> Result<RecallResponse, RecallError> {
    let query = request.query.as_deref().ok_or(RecallError::MissingQuery)?;
    let obs_repo = ObservationRepository::new(conn, project_hash);
    let observations = obs_repo.search_content_like(query, limit as i64)?;
    let items: Vec<RecallItem> =
        observations.iter().map(|obs| RecallItem::from_observation(obs, 1.0, request.detail)).collect();

    Ok(finish(items, request.detail))
}

fn view(
    conn: &Connection,
    project_hash: &str,
    request: &RecallRequest,
    limit: usize,
) -> Result<RecallResponse, RecallError> {
    let obs_repo = ObservationRepository::new(conn, project_hash);
    let mut observations = if !request.ids.is_empty() {
        obs_repo.find_many(&request.ids, request.include_soft_deleted)?
    } else if let Some(title) = &request.title {
        obs_repo.find_by_title(title, request.include_soft_deleted)?
    } else {
        return Err(RecallError::MissingIdentifiers);
    };
    let total_matches = observations.len();
    let limit_truncated = total_matches > limit;
    observations.truncate(limit);

    let items: Vec<RecallItem> =
        observations.iter().map(|obs| RecallItem::from_observation(obs, 1.0, request.detail)).collect();
    let mut response = finish(items, request.detail);
    response.total_matches = total_matches;
    response.truncated = response.truncated || limit_truncated;
    Ok(response)
}

fn purge(conn: &Connection, project_hash: &str, request: &RecallRequest) -> Result<RecallResponse, RecallError> {
    if request.ids.is_empty() {
        return Err(RecallError::MissingIdentifiers);
    }
    let obs_repo = ObservationRepository::new(conn, project_hash);
    let mut items = Vec::with_capacity(request.ids.len());
    for id in &request.ids {
        obs_repo.soft_delete(id)?;
        if let Some(obs) = obs_repo.find_by_id(id, true)? {
            items.push(RecallItem::from_observation(&obs, 1.0, request.detail));
        }
    }
    Ok(finish(items, request.detail))
}

fn restore(conn: &Connection, project_hash: &str, request: &RecallRequest) -> Result<RecallResponse, RecallError> {
    if request.ids.is_empty() {
        return Err(RecallError::MissingIdentifiers);
    }
    let obs_repo = ObservationRepository::new(conn, project_hash);
    let mut items = Vec::with_capacity(request.ids.len());
    for id in &request.ids {
        obs_repo.restore(id)?;
        if let Some(obs) = obs_repo.find_by_id(id, false)? {
            items.push(RecallItem::from_observation(&obs, 1.0, request.detail));
        }
    }
    Ok(finish(items, request.detail))
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

    fn req(action: RecallAction) -> RecallRequest {
        RecallRequest { action: Some(action), limit: 20, ..Default::default() }
    }

    #[test]
    fn search_without_a_query_is_an_error() {
        let c = conn();
        let request = req(RecallAction::Search);
        let err = recall(
            &c,
            "proj-a",
            request,
            None,
            #[cfg(feature = "vector-search")]
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RecallError::MissingQuery));
    }

    #[test]
    fn purge_without_identifiers_refuses_to_act_on_implicit_matches() {
        let c = conn();
        let request = req(RecallAction::Purge);
        let err = recall(
            &c,
            "proj-a",
            request,
            None,
            #[cfg(feature = "vector-search")]
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RecallError::MissingIdentifiers));
    }

    #[test]
    fn view_by_explicit_id_returns_full_detail_content() {
        let c = conn();
        let obs = ObservationRepository::new(&c, "proj-a")
            .save(Some("t".into()), "the full content".into(), "save-memory")
            .unwrap();

        let mut request = req(RecallAction::View);
        request.ids = vec![obs.id.clone()];
        request.detail = DetailLevel::Full;
        let response = recall(
            &c,
            "proj-a",
            request,
            None,
            #[cfg(feature = "vector-search")]
            None,
        )
        .unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].content.as_deref(), Some("the full content"));
    }

    #[test]
    fn purge_then_restore_round_trips_visibility() {
        let c = conn();
        let obs = ObservationRepository::new(&c, "proj-a")
            .save(None, "content".into(), "hook:Edit")
            .unwrap();

        let mut purge_request = req(RecallAction::Purge);
        purge_request.ids = vec![obs.id.clone()];
        recall(
            &c,
            "proj-a",
            purge_request,
            None,
            #[cfg(feature = "vector-search")]
            None,
        )
        .unwrap();
        assert!(ObservationRepository::new(&c, "proj-a").find_by_id(&obs.id, false).unwrap().is_none());

        let mut restore_request = req(RecallAction::Restore);
        restore_request.ids = vec![obs.id.clone()];
        recall(
            &c,
            "proj-a",
            restore_request,
            None,
            #[cfg(feature = "vector-search")]
            None,
        )
        .unwrap();
        assert!(ObservationRepository::new(&c, "proj-a").find_by_id(&obs.id, false).unwrap().is_some());
    }

    #[test]
    fn limit_is_clamped_to_twenty() {
        let c = conn();
        let repo = ObservationRepository::new(&c, "proj-a");
        let ids: Vec<String> = (0..25)
            .map(|i| repo.save(Some(format!("t{i}")), format!("observation number {i}"), "hook:Edit").unwrap().id)
            .collect();

        let mut request = req(RecallAction::View);
        request.limit = 500;
        request.ids = ids;
        let response = recall(
            &c,
            "proj-a",
            request,
            None,
            #[cfg(feature = "vector-search")]
            None,
        )
        .unwrap();
        assert_eq!(response.total_matches, 25);
        assert_eq!(response.items.len(), 20);
        assert!(response.truncated);
    }
}

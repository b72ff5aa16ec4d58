//! `recall`: search, view, purge, or restore saved memories behind one action-dispatched tool.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use substrate_core::retrieval::recall::{recall as run_recall, DetailLevel, RecallAction, RecallRequest};
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["search", "view", "purge", "restore"],
                "description": "search is the default; view/purge/restore require ids or (view only) a title."
            },
            "query": {
                "type": "string",
                "description": "Free-text query. Required for action 'search'."
            },
            "ids": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Explicit observation identifiers. Required for view/purge/restore unless title is given."
            },
            "title": {
                "type": "string",
                "description": "Exact title match, an alternate selector for action 'view'."
            },
            "detail": {
                "type": "string",
                "enum": ["compact", "timeline", "full"],
                "description": "Detail level of returned items. Defaults to 'compact'."
            },
            "limit": {
                "type": "integer",
                "description": "Maximum results, clamped to 20."
            },
            "include_purged": {
                "type": "boolean",
                "description": "Include soft-deleted observations in the results."
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct RecallArgs {
    action: Option<String>,
    query: Option<String>,
    #[serde(default)]
    ids: Vec<String>,
    title: Option<String>,
    detail: Option<String>,
    limit: Option<i64>,
    #[serde(default)]
    include_purged: bool,
}

fn parse_action(s: Option<&str>) -> Result<RecallAction, String> {
    match s {
        None | Some("search") => Ok(RecallAction::Search),
        Some("view") => Ok(RecallAction::View),
        Some("purge") => Ok(RecallAction::Purge),
        Some("restore") => Ok(RecallAction::Restore),
        Some(other) => Err(format!("invalid action '{other}'. Must be one of: search, view, purge, restore")),
    }
}

fn parse_detail(s: Option<&str>) -> Result<DetailLevel, String> {
    match s {
        None | Some("compact") => Ok(DetailLevel::Compact),
        Some("timeline") => Ok(DetailLevel::Timeline),
        Some("full") => Ok(DetailLevel::Full),
        Some(other) => Err(format!("invalid detail level '{other}'. Must be one of: compact, timeline, full")),
    }
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, args: Option<Value>) -> Result<Value, String> {
    let args: RecallArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => RecallArgs { action: None, query: None, ids: Vec::new(), title: None, detail: None, limit: None, include_purged: false },
    };

    let request = RecallRequest {
        action: Some(parse_action(args.action.as_deref())?),
        query: args.query,
        ids: args.ids,
        title: args.title,
        detail: parse_detail(args.detail.as_deref())?,
        limit: args.limit.unwrap_or(20),
        include_soft_deleted: args.include_purged,
    };

    let response = storage
        .with_connection(|conn| {
            Ok(run_recall(
                conn,
                project_hash,
                request,
                None,
                #[cfg(feature = "vector-search")]
                None,
            ))
        })
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    serde_json::to_value(response).map_err(|e| e.to_string())
}

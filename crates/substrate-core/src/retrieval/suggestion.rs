//! Wraps a router suggestion as a stored notification.
//!
//! [`crate::enrichment::router::evaluate`] decides *whether* to suggest a tool; this module only
//! decides how that decision is persisted once made, so a suggestion survives past the single
//! hook invocation that produced it and can be surfaced to the assistant on its next turn.

use rusqlite::Connection;
use serde_json::json;

use crate::enrichment::router::ToolSuggestion;
use crate::error::Result;
use crate::model::Notification;
use crate::repository::NotificationRepository;

/// Notification `kind` tag for tool-usage suggestions, distinguishing them from other
/// notification producers (curation reports, debug-path resolutions) sharing the same table.
pub const TOOL_SUGGESTION_KIND: &str = "tool_suggestion";

/// Persist `suggestion` as a notification for `project_hash`, or do nothing if the router
/// declined to suggest anything this turn.
pub fn format_tool_suggestion(
    conn: &Connection,
    project_hash: &str,
    suggestion: Option<ToolSuggestion>,
) -> Result<Option<Notification>> {
    let Some(suggestion) = suggestion else {
        return Ok(None);
    };

    let message = match &suggestion.description {
        Some(description) => format!("Consider using `{}` — {description}", suggestion.tool_name),
        None => format!("Consider using `{}`", suggestion.tool_name),
    };
    let metadata = json!({
        "tool_name": suggestion.tool_name,
        "confidence": suggestion.confidence,
    });

    let repo = NotificationRepository::new(conn, project_hash);
    repo.create(TOOL_SUGGESTION_KIND, &message, metadata).map(Some)
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
    fn no_suggestion_stores_nothing() {
        let c = conn();
        let result = format_tool_suggestion(&c, "proj-a", None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn a_suggestion_is_persisted_as_a_notification() {
        let c = conn();
        let suggestion = ToolSuggestion {
            tool_name: "debug_paths".to_string(),
            description: Some("track this investigation".to_string()),
            confidence: 0.8,
        };
        let notification = format_tool_suggestion(&c, "proj-a", Some(suggestion)).unwrap().unwrap();
        assert_eq!(notification.kind, TOOL_SUGGESTION_KIND);
        assert!(notification.message.contains("debug_paths"));

        let unread = NotificationRepository::new(&c, "proj-a").list_unread(10).unwrap();
        assert_eq!(unread.len(), 1);
    }
}

//! Tool-routing evaluator: decides whether to surface a tool-usage suggestion, invoked
//! synchronously from the hook pipeline's final stage rather than a server-side timer, since it
//! needs the tool registry's recent-usage state that only the short-lived hook process has cheap
//! access to (spec.md §4.5, SPEC_FULL.md §4.5).

use rusqlite::Connection;

use crate::error::Result;
use crate::model::{ToolRegistryEntry, ToolStatus};
use crate::repository::ToolRegistryRepository;

/// Minimum confidence a candidate suggestion must clear before it is ever surfaced.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// At most this many suggestions per session.
pub const MAX_SUGGESTIONS_PER_SESSION: u32 = 2;

/// Once a suggestion fires, this many further tool calls must pass before another can.
pub const COOLDOWN_TOOL_CALLS: u32 = 5;

/// Per-session rate-limit state. Held by the hook process's caller (the server keeps one per
/// active session) since it is cheap, short-lived, and would otherwise need its own table for no
/// benefit beyond what a restart already resets for free.
#[derive(Debug, Clone, Default)]
pub struct RouterState {
    pub suggestions_made: u32,
    pub tool_calls_since_last_suggestion: u32,
}

impl RouterState {
    fn can_suggest(&self) -> bool {
        self.suggestions_made < MAX_SUGGESTIONS_PER_SESSION
            && self.tool_calls_since_last_suggestion >= COOLDOWN_TOOL_CALLS
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls_since_last_suggestion += 1;
    }

    fn record_suggestion(&mut self) {
        self.suggestions_made += 1;
        self.tool_calls_since_last_suggestion = 0;
    }
}

/// A candidate tool the caller is about to suggest, paired with its confidence (how well it fits
/// the situation that triggered the evaluation — computed by the caller, this module only gates
/// and rate-limits).
#[derive(Debug, Clone)]
pub struct ToolSuggestion {
    pub tool_name: String,
    pub description: Option<String>,
    pub confidence: f64,
}

/// Evaluate a candidate against the confidence floor and the session's rate limit, and format it
/// for surfacing if it passes. Mutates `state` only when a suggestion is actually made.
pub fn evaluate(
    conn: &Connection,
    project_hash: &str,
    state: &mut RouterState,
    tool_name: &str,
    confidence: f64,
) -> Result<Option<ToolSuggestion>> {
    if confidence < CONFIDENCE_THRESHOLD || !state.can_suggest() {
        return Ok(None);
    }

    let registry = ToolRegistryRepository::new(conn, project_hash);
    let entry: Option<ToolRegistryEntry> = registry
        .list_visible()?
        .into_iter()
        .find(|t| t.name == tool_name && t.status != ToolStatus::Demoted);
    let Some(entry) = entry else {
        return Ok(None);
    };

    state.record_suggestion();
    Ok(Some(ToolSuggestion { tool_name: entry.name, description: entry.description, confidence }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ToolScope, ToolType};
    use crate::storage::migrations;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        migrations::apply_migrations(&c, false).unwrap();
        c
    }

    #[test]
    fn low_confidence_never_suggests() {
        let c = conn();
        ToolRegistryRepository::new(&c, "proj-a").upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", None).unwrap();
        let mut state = RouterState { tool_calls_since_last_suggestion: COOLDOWN_TOOL_CALLS, ..Default::default() };
        let result = evaluate(&c, "proj-a", &mut state, "grep", 0.4).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn suggestion_is_rate_limited_per_session() {
        let c = conn();
        ToolRegistryRepository::new(&c, "proj-a").upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", None).unwrap();
        let mut state = RouterState { tool_calls_since_last_suggestion: COOLDOWN_TOOL_CALLS, ..Default::default() };

        assert!(evaluate(&c, "proj-a", &mut state, "grep", 0.9).unwrap().is_some());
        state.tool_calls_since_last_suggestion = COOLDOWN_TOOL_CALLS;
        assert!(evaluate(&c, "proj-a", &mut state, "grep", 0.9).unwrap().is_some());
        state.tool_calls_since_last_suggestion = COOLDOWN_TOOL_CALLS;
        assert!(evaluate(&c, "proj-a", &mut state, "grep", 0.9).unwrap().is_none());
    }

    #[test]
    fn cooldown_blocks_suggestions_in_quick_succession() {
        let c = conn();
        ToolRegistryRepository::new(&c, "proj-a").upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", None).unwrap();
        let mut state = RouterState::default();
        let result = evaluate(&c, "proj-a", &mut state, "grep", 0.9).unwrap();
        assert!(result.is_none());
    }
}

//! Session-start context assembly.
//!
//! Written once by the `SessionStart` hook (spec.md §4.4 stage 9, §4.6 "session-start context
//! contract"): the last session's summary, if one exists, followed by a recency-ordered index of
//! recent observations, prioritizing ones a person (or a slash command acting on their behalf)
//! chose to save over ones a hook auto-captured. The whole thing is a plain-text index meant for
//! progressive disclosure — the assistant expands an item with `recall`'s `view` action, it never
//! carries full content itself.

use rusqlite::Connection;

use crate::error::Result;
use crate::model::Observation;
use crate::repository::{ListFilter, ObservationRepository, SessionRepository};

/// Hard character ceiling on the assembled context block. Lower than `recall`'s own token
/// budgets because this output is injected unconditionally into every session, not fetched on
/// demand.
pub const SESSION_START_CHAR_BUDGET: usize = 6_000;

/// How many candidate observations to pull from storage before budget-trimming. Wide enough that
/// dropping auto-captured noise still leaves user-saved material to prioritize.
const CANDIDATE_WINDOW: i64 = 60;

/// Sources the context assembler treats as higher-priority than hook auto-capture: a direct
/// `save_memory` call, or a slash command invoking it on the user's behalf.
const HIGH_PRIORITY_SOURCE_PREFIXES: &[&str] = &["save-memory", "slash-command"];

fn is_high_priority(source: &str) -> bool {
    HIGH_PRIORITY_SOURCE_PREFIXES.iter().any(|prefix| source.starts_with(prefix))
}

#[derive(Debug, Clone)]
pub struct SessionStartContext {
    pub previous_summary: Option<String>,
    pub lines: Vec<String>,
    pub truncated: bool,
}

impl SessionStartContext {
    /// Render as the plain-text block the hook writes to standard output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = &self.previous_summary {
            out.push_str("Previous session:\n");
            out.push_str(summary);
            out.push_str("\n\n");
        }
        if !self.lines.is_empty() {
            out.push_str("Recent memory:\n");
            for line in &self.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        if self.truncated {
            out.push_str("(older entries omitted — use recall to see more)\n");
        }
        out
    }
}

fn render_line(obs: &Observation) -> String {
    let id8 = &obs.id[..obs.id.len().min(8)];
    let age = humanize_age(obs.updated_at);
    let snippet: String = obs.content.chars().take(120).collect();
    let snippet = if obs.content.chars().count() > 120 { format!("{snippet}...") } else { snippet };
    match &obs.title {
        Some(title) => format!("[{id8}] {title} ({age}): {snippet}"),
        None => format!("[{id8}] ({age}): {snippet}"),
    }
}

fn humanize_age(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    let delta = chrono::Utc::now().signed_duration_since(timestamp);
    if delta.num_minutes() < 1 {
        "just now".to_string()
    } else if delta.num_hours() < 1 {
        format!("{}m ago", delta.num_minutes())
    } else if delta.num_days() < 1 {
        format!("{}h ago", delta.num_hours())
    } else {
        format!("{}d ago", delta.num_days())
    }
}

/// Build the session-start context for `project_hash`. Candidates are ordered high-priority
/// (user-saved) first, then recency within each priority tier, and accumulated into
/// [`SESSION_START_CHAR_BUDGET`] the same way [`super::budget::truncate_to_budget`] accumulates
/// `recall` results — always keeping at least the first line once any candidate exists.
pub fn assemble_session_start_context(
    conn: &Connection,
    project_hash: &str,
) -> Result<SessionStartContext> {
    let session_repo = SessionRepository::new(conn, project_hash);
    let previous_summary = session_repo.most_recent()?.and_then(|s| s.summary);

    let obs_repo = ObservationRepository::new(conn, project_hash);
    let mut candidates =
        obs_repo.list(ListFilter { limit: Some(CANDIDATE_WINDOW), ..Default::default() })?;
    candidates.sort_by(|a, b| {
        is_high_priority(&b.source)
            .cmp(&is_high_priority(&a.source))
            .then_with(|| b.rowid.cmp(&a.rowid))
    });

    let mut lines = Vec::new();
    let mut used_chars = 0usize;
    let mut truncated = false;
    let header_chars = previous_summary.as_ref().map_or(0, |s| s.len() + "Previous session:\n\n\n".len());

    for (i, obs) in candidates.iter().enumerate() {
        let line = render_line(obs);
        let cost = line.chars().count() + 1;
        if i > 0 && header_chars + used_chars + cost > SESSION_START_CHAR_BUDGET {
            truncated = true;
            break;
        }
        used_chars += cost;
        lines.push(line);
    }

    Ok(SessionStartContext { previous_summary, lines, truncated })
}

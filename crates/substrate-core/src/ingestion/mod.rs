//! Hook event ingestion pipeline (spec.md §4.4, §6).
//!
//! `substrate-hook` reads one [`HookEvent`] from standard input per invocation and hands it to
//! [`ingest`], which runs it through every stage spec.md §4.4 lists: usage recording, the
//! self-referential and privacy filters, research-tool routing, content extraction, admission,
//! duplicate suppression, synchronous storage, and finally route-suggestion evaluation. Each
//! stage can end the pipeline early by returning a rejection; none of them panic, so the caller
//! can always log the outcome and exit 0 as spec.md §7 requires of the hook process.

pub mod filters;

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;

use crate::enrichment::router::{self, RouterState};
use crate::error::Result;
use crate::model::Notification;
use crate::repository::observations::NewObservation;
use crate::repository::{ObservationRepository, ToolRegistryRepository};
use crate::retrieval::suggestion::format_tool_suggestion;

use filters::{admission_filter, is_duplicate, is_research_tool, is_self_referential, privacy_filter, AdmissionRejection};

/// The six lifecycle events a hook can be invoked for (spec.md §6). Named exactly as the calling
/// assistant sends them, so `serde`'s default unit-variant (de)serialization needs no renaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EventType {
    SessionStart,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    Stop,
    SessionEnd,
}

/// One hook invocation's payload. Deliberately tolerant of unknown fields (unlike the tool input
/// schemas in `substrate-mcp`'s tools) since the calling assistant's event shape is outside this
/// system's control and may grow fields over time.
#[derive(Debug, Clone, Deserialize)]
pub struct HookEvent {
    pub event_type: EventType,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_output: Option<Value>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Keys a tool's input commonly carries the file it touched under, checked in order.
const FILE_PATH_KEYS: &[&str] = &["file_path", "path", "notebook_path"];

fn extract_file_path(tool_input: Option<&Value>) -> Option<String> {
    let input = tool_input?;
    FILE_PATH_KEYS.iter().find_map(|key| input.get(key).and_then(Value::as_str)).map(str::to_string)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stage 5: turn the raw event payload into the text an observation would store. Output is
/// preferred over input since it reflects what actually happened rather than what was requested;
/// a failed tool call's output (an error message) is exactly the content worth remembering.
fn extract_content(event: &HookEvent) -> String {
    match (&event.tool_output, &event.tool_input) {
        (Some(output), _) => stringify(output),
        (None, Some(input)) => stringify(input),
        (None, None) => String::new(),
    }
}

/// Tunable inputs to a single [`ingest`] call that come from configuration rather than the event
/// itself.
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Path prefixes whose observations are dropped outright (spec.md §4.4 stage 3).
    pub exclusions: Vec<String>,
}

/// Why an event did not become a stored observation.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    SelfReferential,
    PrivacyExcluded,
    ResearchToolRouted,
    Admission(AdmissionRejection),
    Duplicate,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// The event carried no tool call, or wasn't a completion event — nothing to extract.
    NotApplicable,
    Rejected(RejectReason),
    Stored { observation_id: String, suggestion: Option<Notification> },
}

/// A crude, deterministic stand-in for the conversation-aware heuristic that would normally pick
/// a candidate tool to suggest — the exact trigger conditions are left to the caller's judgment
/// by spec.md §4.5, which only specifies the gating and rate limiting [`router::evaluate`]
/// performs once a candidate and its confidence are in hand.
fn candidate_suggestion(tool_name: &str, content: &str) -> Option<(&'static str, f64)> {
    let lower = content.to_lowercase();
    let looks_like_an_error = lower.contains("error") || lower.contains("exception") || lower.contains("traceback");
    match tool_name {
        "Edit" | "Write" | "MultiEdit" if looks_like_an_error => Some(("debug_paths", 0.65)),
        "Bash" if lower.contains("grep") || lower.contains("rg ") => Some(("recall", 0.62)),
        _ => None,
    }
}

/// Run one event through the full pipeline. `state` is the caller's per-session router state,
/// threaded through across invocations since a short-lived hook process has nowhere else to keep
/// it.
pub fn ingest(
    conn: &Connection,
    project_hash: &str,
    event: &HookEvent,
    config: &IngestConfig,
    state: &mut RouterState,
) -> Result<IngestOutcome> {
    let Some(tool_name) = event.tool_name.as_deref() else {
        return Ok(IngestOutcome::NotApplicable);
    };

    // Stage 1: usage recording happens regardless of what the rest of the pipeline decides.
    let success = !matches!(event.event_type, EventType::PostToolUseFailure);
    ToolRegistryRepository::new(conn, project_hash).record_usage(tool_name, success)?;

    if !matches!(event.event_type, EventType::PostToolUse | EventType::PostToolUseFailure) {
        return Ok(IngestOutcome::NotApplicable);
    }

    state.record_tool_call();

    // Stage 2.
    if is_self_referential(tool_name) {
        return Ok(IngestOutcome::Rejected(RejectReason::SelfReferential));
    }

    let file_path = extract_file_path(event.tool_input.as_ref());
    let raw_content = extract_content(event);

    // Stage 3.
    let Some(content) = privacy_filter(&raw_content, file_path.as_deref(), &config.exclusions) else {
        return Ok(IngestOutcome::Rejected(RejectReason::PrivacyExcluded));
    };

    // Stage 4.
    if is_research_tool(tool_name) {
        return Ok(IngestOutcome::Rejected(RejectReason::ResearchToolRouted));
    }

    // Stage 6.
    if let Err(rejection) = admission_filter(&content) {
        return Ok(IngestOutcome::Rejected(RejectReason::Admission(rejection)));
    }

    // Stage 7.
    if is_duplicate(conn, project_hash, event.session_id.as_deref(), &content)? {
        return Ok(IngestOutcome::Rejected(RejectReason::Duplicate));
    }

    // Stage 8.
    let observation = ObservationRepository::new(conn, project_hash).create(NewObservation {
        session_id: event.session_id.clone(),
        source: format!("hook:{tool_name}"),
        title: None,
        content: content.clone(),
    })?;

    // Stage 9.
    let candidate = candidate_suggestion(tool_name, &content);
    let suggestion = candidate
        .map(|(name, confidence)| router::evaluate(conn, project_hash, state, name, confidence))
        .transpose()?
        .flatten();
    let suggestion = format_tool_suggestion(conn, project_hash, suggestion)?;

    Ok(IngestOutcome::Stored { observation_id: observation.id, suggestion })
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

    fn post_tool_use(tool_name: &str, output: &str) -> HookEvent {
        HookEvent {
            event_type: EventType::PostToolUse,
            session_id: Some("s1".into()),
            tool_name: Some(tool_name.into()),
            tool_input: None,
            tool_output: Some(Value::String(output.into())),
            cwd: None,
        }
    }

    #[test]
    fn session_lifecycle_events_are_not_applicable() {
        let c = conn();
        let mut state = RouterState::default();
        let event = HookEvent {
            event_type: EventType::SessionStart,
            session_id: Some("s1".into()),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            cwd: None,
        };
        let outcome = ingest(&c, "proj-a", &event, &IngestConfig::default(), &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::NotApplicable));
    }

    #[test]
    fn self_referential_tool_calls_are_rejected_before_storage() {
        let c = conn();
        let mut state = RouterState::default();
        let event = post_tool_use("substrate_recall", "some content");
        let outcome = ingest(&c, "proj-a", &event, &IngestConfig::default(), &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::SelfReferential)));
    }

    #[test]
    fn research_tools_are_routed_away_without_storing() {
        let c = conn();
        let mut state = RouterState::default();
        let event = post_tool_use("Grep", "src/main.rs:12: fn main()");
        let outcome = ingest(&c, "proj-a", &event, &IngestConfig::default(), &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::ResearchToolRouted)));
    }

    #[test]
    fn excluded_paths_are_rejected_by_the_privacy_filter() {
        let c = conn();
        let mut state = RouterState::default();
        let mut event = post_tool_use("Edit", "updated the secret");
        event.tool_input = Some(serde_json::json!({"file_path": ".env"}));
        let config = IngestConfig { exclusions: vec![".env".to_string()] };
        let outcome = ingest(&c, "proj-a", &event, &config, &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::PrivacyExcluded)));
    }

    #[test]
    fn empty_output_is_rejected_by_the_admission_filter() {
        let c = conn();
        let mut state = RouterState::default();
        let event = post_tool_use("Edit", "   ");
        let outcome = ingest(&c, "proj-a", &event, &IngestConfig::default(), &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::Admission(AdmissionRejection::Empty))));
    }

    #[test]
    fn a_normal_edit_is_stored_as_an_observation() {
        let c = conn();
        let mut state = RouterState::default();
        let event = post_tool_use("Edit", "fixed the null check in the parser");
        let outcome = ingest(&c, "proj-a", &event, &IngestConfig::default(), &mut state).unwrap();
        let IngestOutcome::Stored { observation_id, .. } = outcome else { panic!("expected Stored") };

        let stored = ObservationRepository::new(&c, "proj-a").find_by_id(&observation_id, false).unwrap().unwrap();
        assert_eq!(stored.content, "fixed the null check in the parser");
        assert_eq!(stored.source, "hook:Edit");
    }

    #[test]
    fn a_near_duplicate_in_the_same_session_is_rejected() {
        let c = conn();
        let mut state = RouterState::default();
        let first = post_tool_use("Edit", "added cache to the lookup path");
        ingest(&c, "proj-a", &first, &IngestConfig::default(), &mut state).unwrap();

        let second = post_tool_use("Edit", "added cache to the lookup path");
        let outcome = ingest(&c, "proj-a", &second, &IngestConfig::default(), &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::Duplicate)));
    }

    #[test]
    fn post_tool_use_failure_still_records_usage_as_unsuccessful() {
        let c = conn();
        let mut state = RouterState::default();
        let event = HookEvent {
            event_type: EventType::PostToolUseFailure,
            session_id: Some("s1".into()),
            tool_name: Some("Bash".into()),
            tool_input: None,
            tool_output: Some(Value::String("command not found".into())),
            cwd: None,
        };
        let outcome = ingest(&c, "proj-a", &event, &IngestConfig::default(), &mut state).unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored { .. }));
    }
}

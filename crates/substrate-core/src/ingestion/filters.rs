//! Hook pipeline filter stages (spec.md §4.4, stages 2-4, 6-7).
//!
//! Each stage here is a pure function over already-extracted strings, independent of the
//! database, so the pipeline orchestration in [`super`] can unit test admission decisions
//! without opening a connection. The one exception is duplicate suppression, which needs the
//! repository's bounded recent-observation window.

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;

use crate::enrichment::curation::jaccard;
use crate::error::Result;
use crate::model::MAX_CONTENT_LEN;
use crate::repository::ObservationRepository;

/// Reserved tool-name prefixes the self-referential filter rejects, one per installation mode
/// this system can be registered under (a standalone MCP server, or a bundled plugin) — spec.md
/// §4.4.2 calls for "two such prefixes" in a `const` array so a future install mode only needs a
/// new entry here.
pub const SELF_REFERENTIAL_PREFIXES: &[&str] = &["substrate_", "mcp__substrate__"];

/// True when `tool_name` is one of this system's own tools, which must never be captured as an
/// observation of themselves (stage 2 of spec.md §4.4).
pub fn is_self_referential(tool_name: &str) -> bool {
    SELF_REFERENTIAL_PREFIXES.iter().any(|prefix| tool_name.starts_with(prefix))
}

/// Read-only/discovery tools whose invocations are recorded (stage 1 already incremented usage)
/// but never stored as full observations — spec.md §4.4 stage 4's "research-tool routing".
const RESEARCH_TOOL_NAMES: &[&str] =
    &["Read", "Glob", "Grep", "WebFetch", "WebSearch", "NotebookRead", "BashOutput"];

pub fn is_research_tool(tool_name: &str) -> bool {
    RESEARCH_TOOL_NAMES.contains(&tool_name)
}

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Common vendor API key prefixes.
        r"sk-[A-Za-z0-9_-]{20,}",
        r"AKIA[0-9A-Z]{16}",
        r"ghp_[A-Za-z0-9]{36}",
        r"xox[baprs]-[A-Za-z0-9-]{10,}",
        // Generic bearer/authorization headers.
        r"(?i)bearer\s+[A-Za-z0-9._-]{20,}",
        // key=value / "key": "value" style credential assignment.
        r#"(?i)(api[_-]?key|secret|token|password|passwd)["']?\s*[:=]\s*["']?[A-Za-z0-9/+_.=-]{12,}"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static secret pattern is valid regex"))
    .collect()
});

/// Replace anything matching a known secret pattern with a fixed placeholder. Applied
/// unconditionally to every observation's content before admission (spec.md §4.4 stage 3).
pub fn redact_secrets(content: &str) -> String {
    let mut redacted = content.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        redacted = pattern.replace_all(&redacted, "[REDACTED]").into_owned();
    }
    redacted
}

/// Privacy filter: redact secrets, then reject outright if the event touches a file under one of
/// the caller-configured exclusion paths (spec.md §4.4 stage 3's "reject observations from files
/// in a configurable exclusion list").
pub fn privacy_filter(content: &str, file_path: Option<&str>, exclusions: &[String]) -> Option<String> {
    if let Some(path) = file_path {
        if exclusions.iter().any(|excluded| path.starts_with(excluded.as_str())) {
            return None;
        }
    }
    Some(redact_secrets(content))
}

/// Output lines a tool can produce that carry no information worth remembering — directory
/// listings, "no results found" banners, and similar navigation chrome. Stage 6's admission
/// filter rejects content that, after trimming, is *entirely* one of these (not merely
/// containing the phrase), so legitimate content that happens to mention "no results" in prose
/// still passes through to the LLM classifier, which is where real noise classification belongs
/// per spec.md §4.4 stage 6's explicit deferral.
const PURE_NAVIGATION_MARKERS: &[&str] = &[
    "no matches found",
    "no results found",
    "no files found",
    "(no content)",
    "(empty)",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRejection {
    Empty,
    PureNavigation,
    TooLong(usize),
}

/// Stage 6: reject empty content, pure navigation output, and content over the length bound.
/// Noise classification by pattern is explicitly NOT done here (spec.md §4.4 stage 6) — that is
/// the LLM enrichment processor's job once the observation is stored.
pub fn admission_filter(content: &str) -> std::result::Result<(), AdmissionRejection> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AdmissionRejection::Empty);
    }
    if PURE_NAVIGATION_MARKERS.iter().any(|marker| trimmed.eq_ignore_ascii_case(marker)) {
        return Err(AdmissionRejection::PureNavigation);
    }
    let char_count = content.chars().count();
    if char_count > MAX_CONTENT_LEN {
        return Err(AdmissionRejection::TooLong(char_count));
    }
    Ok(())
}

/// How many of the most recent observations in the same session duplicate suppression compares
/// the candidate against.
pub const DUPLICATE_WINDOW: i64 = 20;

/// Jaccard similarity above which two observations are considered near-duplicates for admission
/// purposes. Deliberately the same threshold curation's near-duplicate merge uses, since both
/// are answering the same question ("is this substantially the same text") at different points
/// in the pipeline.
pub const DUPLICATE_JACCARD_THRESHOLD: f64 = 0.85;

/// Stage 7: reject `content` if it is a near-duplicate of anything recently stored in the same
/// session. Sessionless observations (no `session_id`) skip this check — there is no bounded
/// window to compare against.
pub fn is_duplicate(
    conn: &Connection,
    project_hash: &str,
    session_id: Option<&str>,
    content: &str,
) -> Result<bool> {
    let Some(session_id) = session_id else {
        return Ok(false);
    };
    let recent = ObservationRepository::new(conn, project_hash).recent_in_session(session_id, DUPLICATE_WINDOW)?;
    Ok(recent.iter().any(|obs| jaccard(&obs.content, content) > DUPLICATE_JACCARD_THRESHOLD))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;

    #[test]
    fn self_referential_prefixes_are_rejected() {
        assert!(is_self_referential("substrate_recall"));
        assert!(is_self_referential("mcp__substrate__recall"));
        assert!(!is_self_referential("Edit"));
    }

    #[test]
    fn research_tools_are_routed_away_from_full_capture() {
        assert!(is_research_tool("Read"));
        assert!(is_research_tool("Grep"));
        assert!(!is_research_tool("Edit"));
    }

    #[test]
    fn redacts_api_key_looking_strings() {
        let content = "set OPENAI key sk-abcdefghijklmnopqrstuvwxyz123456 in env";
        let redacted = redact_secrets(content);
        assert!(!redacted.contains("sk-abcdefghijklmnopqrstuvwxyz123456"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn redacts_generic_key_value_credentials() {
        let content = r#"config: {"api_key": "AbCdEf0123456789ZZZZ"}"#;
        let redacted = redact_secrets(content);
        assert!(!redacted.contains("AbCdEf0123456789ZZZZ"));
    }

    #[test]
    fn privacy_filter_rejects_excluded_paths() {
        let exclusions = vec![".env".to_string(), "secrets/".to_string()];
        assert!(privacy_filter("content", Some(".env.local"), &exclusions).is_none());
        assert!(privacy_filter("content", Some("src/main.rs"), &exclusions).is_some());
    }

    #[test]
    fn admission_rejects_empty_and_navigation_only_content() {
        assert_eq!(admission_filter("   "), Err(AdmissionRejection::Empty));
        assert_eq!(admission_filter("No matches found"), Err(AdmissionRejection::PureNavigation));
        assert!(admission_filter("fixed the null check").is_ok());
    }

    #[test]
    fn admission_rejects_content_over_the_length_bound() {
        let huge = "a".repeat(MAX_CONTENT_LEN + 1);
        assert_eq!(admission_filter(&huge), Err(AdmissionRejection::TooLong(MAX_CONTENT_LEN + 1)));
    }

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        migrations::apply_migrations(&c, false).unwrap();
        c
    }

    #[test]
    fn duplicate_suppression_rejects_near_identical_recent_content() {
        let c = conn();
        ObservationRepository::new(&c, "proj-a")
            .create(crate::repository::observations::NewObservation {
                session_id: Some("s1".into()),
                source: "hook:Edit".into(),
                title: None,
                content: "added cache to the lookup path".into(),
            })
            .unwrap();

        assert!(is_duplicate(&c, "proj-a", Some("s1"), "added cache to the lookup path").unwrap());
        assert!(!is_duplicate(&c, "proj-a", Some("s1"), "completely different content here").unwrap());
        assert!(!is_duplicate(&c, "proj-a", None, "added cache to the lookup path").unwrap());
    }
}

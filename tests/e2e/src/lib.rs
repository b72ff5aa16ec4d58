//! End-to-end test harness: a tempdir-backed [`substrate_core::Storage`] plus small helpers for
//! building the hook events and recall requests the scenario tests drive through the real
//! pipeline, not a repository in isolation.

use std::sync::Arc;

use substrate_core::enrichment::RouterState;
use substrate_core::ingestion::{EventType, IngestConfig};
use substrate_core::{ingest, HookEvent, IngestOutcome, Storage};

pub struct Harness {
    pub storage: Arc<Storage>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        Self { storage, _dir: dir }
    }

    /// Build a `PostToolUse` event whose output becomes the observation content, and drive it
    /// through [`ingest`] with a scratch [`substrate_core::enrichment::router::RouterState`].
    pub fn ingest_tool_output(&self, project_hash: &str, tool: &str, output: &str) -> IngestOutcome {
        let event = HookEvent {
            event_type: EventType::PostToolUse,
            session_id: Some("s1".to_string()),
            tool_name: Some(tool.to_string()),
            tool_input: None,
            tool_output: Some(serde_json::Value::String(output.to_string())),
            cwd: None,
        };
        let mut state = RouterState::default();
        self.storage
            .with_connection(|conn| ingest(conn, project_hash, &event, &IngestConfig::default(), &mut state))
            .unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

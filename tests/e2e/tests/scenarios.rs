//! Concrete end-to-end scenarios driving the real ingestion, recall, and path-tracking surfaces
//! together rather than one repository at a time.

use substrate_core::enrichment::llm::{DebugSignal, DebugSignalKind};
use substrate_core::enrichment::path_tracker::{PathTracker, TrackerState};
use substrate_core::repository::{DebugPathRepository, ObservationRepository};
use substrate_core::retrieval::recall::{recall, DetailLevel, RecallAction, RecallRequest};
use substrate_core::storage::migrations;
use substrate_core::{IngestOutcome, Storage};
use substrate_e2e_tests::Harness;

#[test]
fn scenario_a_ingestion_through_recall() {
    let harness = Harness::new();
    let outcome = harness.ingest_tool_output("abc", "Edit", "fixed the null check in src/auth.ts");
    let observation_id = match outcome {
        IngestOutcome::Stored { observation_id, .. } => observation_id,
        other => panic!("expected Stored, got {other:?}"),
    };

    let request = RecallRequest {
        action: Some(RecallAction::Search),
        query: Some("null check".to_string()),
        detail: DetailLevel::Compact,
        limit: 10,
        ..Default::default()
    };
    let response = harness
        .storage
        .with_connection(|conn| Ok(recall(conn, "abc", request, None, None)))
        .unwrap()
        .unwrap();

    assert_eq!(response.items.len(), 1);
    assert_eq!(response.items[0].id, observation_id);
    assert!(response.items[0].snippet.contains("null check"));
}

#[test]
fn scenario_b_degradation_without_a_vector_index() {
    // `recall` with no query embedding degrades to keyword-only search regardless of whether a
    // vector index is present; this exercises that path directly rather than disabling the
    // feature flag at compile time.
    let harness = Harness::new();
    harness
        .storage
        .with_connection(|conn| {
            let repo = ObservationRepository::new(conn, "abc");
            repo.save(None, "added a retry loop around the flaky request".to_string(), "hook:Edit")?;
            repo.save(None, "removed the retry loop, it masked a real bug".to_string(), "hook:Edit")?;
            Ok(())
        })
        .unwrap();

    let request = RecallRequest {
        action: Some(RecallAction::Search),
        query: Some("retry loop".to_string()),
        ..Default::default()
    };
    let response = harness
        .storage
        .with_connection(|conn| Ok(recall(conn, "abc", request, None, None)))
        .unwrap()
        .unwrap();

    assert_eq!(response.items.len(), 2);
}

#[test]
fn scenario_c_path_auto_resolution() {
    let conn_storage = Harness::new();
    let mut tracker = PathTracker::new();

    let error = DebugSignal { kind: DebugSignalKind::Error, confidence: 0.8, waypoint_hint: None };
    let success = DebugSignal { kind: DebugSignalKind::Success, confidence: 0.8, waypoint_hint: None };

    conn_storage
        .storage
        .with_connection(|conn| {
            for _ in 0..3 {
                tracker.handle_signal(conn, "abc", None, &error).unwrap();
            }
            for _ in 0..3 {
                tracker.handle_signal(conn, "abc", None, &success).unwrap();
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(*tracker.state(), TrackerState::Resolved);

    let (paths, waypoint_count) = conn_storage
        .storage
        .with_connection(|conn| {
            let repo = DebugPathRepository::new(conn, "abc");
            let paths = repo.list(None, 10)?;
            let waypoints = repo.waypoints(&paths[0].id)?;
            Ok((paths, waypoints.len()))
        })
        .unwrap();

    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].status.to_string(), "resolved");
    assert_eq!(waypoint_count, 7);
}

#[test]
fn scenario_d_project_isolation() {
    let harness = Harness::new();
    harness
        .storage
        .with_connection(|conn| {
            ObservationRepository::new(conn, "project-x").save(None, "shared text".to_string(), "hook:Edit")?;
            ObservationRepository::new(conn, "project-y").save(None, "shared text".to_string(), "hook:Edit")?;
            Ok(())
        })
        .unwrap();

    let request = RecallRequest {
        action: Some(RecallAction::Search),
        query: Some("shared text".to_string()),
        ..Default::default()
    };
    let response = harness
        .storage
        .with_connection(|conn| Ok(recall(conn, "project-x", request, None, None)))
        .unwrap()
        .unwrap();

    assert_eq!(response.items.len(), 1);
}

#[test]
fn scenario_e_duplicate_suppression() {
    let harness = Harness::new();
    let first = harness.ingest_tool_output("abc", "Edit", "added cache");
    assert!(matches!(first, IngestOutcome::Stored { .. }));

    let second = harness.ingest_tool_output("abc", "Edit", "added cache");
    assert!(matches!(second, IngestOutcome::Rejected(_)));

    let count = harness
        .storage
        .with_connection(|conn| {
            ObservationRepository::new(conn, "abc").list(Default::default()).map(|rows| rows.len())
        })
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn scenario_f_migration_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.db");

    {
        let storage = Storage::open(Some(path.clone())).unwrap();
        storage.close();
    }

    let reopened = Storage::open(Some(path.clone())).unwrap();
    let count = reopened
        .with_connection(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            Ok(n)
        })
        .unwrap();
    assert_eq!(count as usize, migrations::MIGRATIONS.len());
    reopened.close();

    // Now simulate the vector extension having been unavailable from the start: apply migrations
    // directly with `vector_available = false` against a fresh database and confirm the
    // vector-dependent migration is absent, so it re-attempts on the next open.
    let degraded_path = dir.path().join("degraded.db");
    let conn = rusqlite::Connection::open(&degraded_path).unwrap();
    migrations::apply_migrations(&conn, false).unwrap();
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0)).unwrap();
    assert_eq!(count as usize, migrations::MIGRATIONS.len() - 1);
}

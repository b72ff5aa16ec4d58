//! Enrichment agents: long-lived background workers that classify, embed, link, and curate
//! observations after the ingestion pipeline has stored them synchronously (spec.md §4.5).
//!
//! Structurally grounded on the teacher's `main.rs` background-task-spawning pattern
//! (`tokio::spawn` loops around `tokio::time::sleep`), generalized from the teacher's single
//! consolidation timer to six independent timers/events. Each tick function here is a plain,
//! synchronous-looking `Result`-returning call; [`Scheduler`] is what wraps each one in the
//! `tokio::spawn` loop, the in-flight guard, and the panic catch that turn it into a timer.

pub mod curation;
pub mod llm;
pub mod path_tracker;
pub mod router;
pub mod topic_shift;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use rusqlite::Connection;
use tokio::sync::Mutex as AsyncMutex;

use crate::embeddings::EmbeddingWorker;
use crate::error::Result;
use crate::model::Classification;
use crate::repository::ObservationRepository;
use crate::storage::Storage;

pub use llm::{LlmClient, NullLlmClient};
pub use path_tracker::PathTracker;
pub use router::RouterState;

const EMBEDDING_TICK: Duration = Duration::from_secs(5);
const LLM_TICK: Duration = Duration::from_secs(30);
const CURATION_TICK: Duration = Duration::from_secs(5 * 60);
const LLM_CONCURRENCY: usize = 3;
const EMBEDDING_BATCH_SIZE: i64 = 20;
const LLM_BATCH_SIZE: i64 = 20;
/// How long a single synchronous round-trip to the embedding worker is allowed to take before
/// the tick gives up on that observation and tries again next tick.
const EMBEDDING_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Distinct project hashes with at least one observation — the enrichment processors' unit of
/// per-project iteration when they've picked up cross-project work via `all_projects = true`.
fn distinct_project_hashes(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT project_hash FROM observations")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<rusqlite::Result<_>>().map_err(crate::error::StorageError::from)
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingTickReport {
    pub embedded: usize,
    pub failed: usize,
    pub shifts_detected: usize,
}

/// Pull up to [`EMBEDDING_BATCH_SIZE`] unembedded observations across every project, submit each
/// to the worker, and attach the resulting vector. Every successful embedding also runs the
/// topic-shift detector for that observation's session, per spec.md's "topic-shift detector (per
/// embedding update)".
pub fn embedding_tick(storage: &Storage, worker: &EmbeddingWorker) -> Result<EmbeddingTickReport> {
    let mut report = EmbeddingTickReport::default();

    let pending = storage.with_connection(|conn| {
        ObservationRepository::new(conn, "").list_unembedded(EMBEDDING_BATCH_SIZE, true)
    })?;

    for obs in pending {
        if !worker.submit(obs.id.clone(), obs.content.clone()) {
            report.failed += 1;
            continue;
        }
        match worker.recv_timeout(EMBEDDING_REQUEST_TIMEOUT) {
            Some(response) if response.correlation_id == obs.id => match response.result {
                Ok(vector) => {
                    storage.with_connection(|conn| {
                        ObservationRepository::new(conn, &obs.project_hash).update_embedding_unscoped(
                            &obs.id,
                            &vector,
                            crate::embeddings::MODEL_LABEL,
                            crate::embeddings::MODEL_VERSION,
                        )?;
                        if let Some(session_id) = &obs.session_id {
                            let _ = topic_shift::evaluate(conn, &obs.project_hash, session_id, obs.rowid, &vector);
                        }
                        Ok(())
                    })?;
                    report.embedded += 1;
                }
                Err(_) => report.failed += 1,
            },
            _ => report.failed += 1,
        }
    }

    Ok(report)
}

#[derive(Debug, Clone, Default)]
pub struct LlmTickReport {
    pub classified: usize,
    pub noise_dropped: usize,
    pub entities_upserted: usize,
    pub edges_upserted: usize,
    pub failed: usize,
}

/// Classify up to [`LLM_BATCH_SIZE`] unclassified observations across every project with up to
/// [`LLM_CONCURRENCY`] classifier calls in flight at once; entity extraction, the quality gate,
/// and relationship inference run per-observation afterward, serialized against the single
/// connection like every other write in this crate. `path_trackers` holds one
/// [`PathTracker`] per project, since its in-memory buffer must persist across ticks.
pub async fn llm_tick(
    storage: &Storage,
    llm: &dyn LlmClient,
    path_trackers: &AsyncMutex<HashMap<String, PathTracker>>,
) -> Result<LlmTickReport> {
    let pending = storage.with_connection(|conn| {
        ObservationRepository::new(conn, "").list_unclassified(LLM_BATCH_SIZE, true)
    })?;

    let classifications = stream::iter(pending)
        .map(|obs| async move {
            let result = llm.classify(&obs.content).await;
            (obs, result)
        })
        .buffer_unordered(LLM_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    let mut report = LlmTickReport::default();

    for (obs, result) in classifications {
        let classification_result = match result {
            Ok(c) => c,
            Err(_) => {
                report.failed += 1;
                continue;
            }
        };
        report.classified += 1;

        if !classification_result.is_signal {
            storage.with_connection(|conn| {
                ObservationRepository::new(conn, &obs.project_hash)
                    .update_classification_unscoped(&obs.id, Classification::Noise)?;
                ObservationRepository::new(conn, &obs.project_hash).soft_delete_unscoped(&obs.id)
            })?;
            report.noise_dropped += 1;
        } else if let Some(classification) = classification_result.classification {
            storage.with_connection(|conn| {
                ObservationRepository::new(conn, &obs.project_hash)
                    .update_classification_unscoped(&obs.id, classification)
            })?;

            if let Ok(entities) = llm.extract_entities(&obs.content).await {
                let passing = entities.into_iter().filter(passes_quality_gate).collect::<Vec<_>>();
                let mut node_types: HashMap<String, crate::model::NodeType> = HashMap::new();
                let upserted = storage.with_connection(|conn| {
                    let graph = crate::repository::GraphRepository::new(conn, &obs.project_hash);
                    let mut count = 0;
                    for entity in &passing {
                        if let Ok(node_type) = entity.entity_type.parse() {
                            graph.upsert_node(node_type, &entity.name, serde_json::json!({}), Some(&obs.id))?;
                            node_types.insert(entity.name.clone(), node_type);
                            count += 1;
                        }
                    }
                    Ok(count)
                })?;
                report.entities_upserted += upserted;

                if passing.len() >= 2 {
                    if let Ok(relationships) = llm.infer_relationships(&passing).await {
                        let edges = storage.with_connection(|conn| {
                            let graph = crate::repository::GraphRepository::new(conn, &obs.project_hash);
                            let mut count = 0;
                            for rel in &relationships {
                                let (Some(&source_type), Some(&target_type)) =
                                    (node_types.get(&rel.source_name), node_types.get(&rel.target_name))
                                else {
                                    continue;
                                };
                                let (Ok(Some(source)), Ok(Some(target))) = (
                                    graph.find_node(source_type, &rel.source_name),
                                    graph.find_node(target_type, &rel.target_name),
                                ) else {
                                    continue;
                                };
                                if let Ok(edge_type) = rel.relationship.parse() {
                                    graph.upsert_edge(&source.id, &target.id, edge_type, rel.weight, serde_json::json!({}))?;
                                    count += 1;
                                }
                            }
                            Ok(count)
                        })?;
                        report.edges_upserted += edges;
                    }
                }
            }

            if let Some(signal) = classification_result.debug_signal {
                let mut trackers = path_trackers.lock().await;
                let tracker = trackers.entry(obs.project_hash.clone()).or_insert_with(PathTracker::new);
                let _ = storage.with_connection(|conn| {
                    tracker.handle_signal(conn, &obs.project_hash, Some(&obs.id), &signal)
                });
            }
        }
    }

    Ok(report)
}

/// Quality gate entity extraction must pass before a candidate becomes a graph node: a minimum
/// name length, rejection of vague prefixes a model tends to hedge with, and a type-specific
/// confidence floor (files are cheap to verify so the floor is low; decisions and problems need
/// more confidence since they're harder to correct later).
fn passes_quality_gate(entity: &llm::ExtractedEntity) -> bool {
    const MIN_NAME_LEN: usize = 2;
    const VAGUE_PREFIXES: &[&str] = &["something", "some ", "a thing", "unknown", "unclear"];

    if entity.name.trim().chars().count() < MIN_NAME_LEN {
        return false;
    }
    let lower = entity.name.to_lowercase();
    if VAGUE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return false;
    }

    let floor = match entity.entity_type.as_str() {
        "file" | "reference" => 0.5,
        "decision" | "problem" | "solution" => 0.7,
        _ => 0.6,
    };
    entity.confidence >= floor
}

#[derive(Debug, Clone, Default)]
pub struct CurationTickReport {
    pub per_project: Vec<(String, curation::CurationReport)>,
}

/// Run the curation agent over every project that has at least one observation.
pub fn curation_tick(storage: &Storage) -> Result<CurationTickReport> {
    let project_hashes = storage.with_connection(distinct_project_hashes)?;
    let mut report = CurationTickReport::default();
    for project_hash in project_hashes {
        let project_report = storage.with_connection(|conn| Ok(curation::run(conn, &project_hash)))?;
        report.per_project.push((project_hash, project_report));
    }
    Ok(report)
}

/// Wraps a tick function so a still-running invocation is skipped rather than overlapped, and a
/// panic inside the tick is caught and logged rather than taking the whole loop down with it —
/// spec.md §4.5's "each tick is wrapped in a try/catch" and §5's "a tick whose prior invocation is
/// still running is skipped".
async fn guarded_tick<F, Fut>(in_flight: &Arc<AtomicBool>, label: &str, body: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    if in_flight.swap(true, Ordering::AcqRel) {
        tracing::debug!(tick = label, "previous tick still running, skipping");
        return;
    }
    let result = std::panic::AssertUnwindSafe(body()).catch_unwind().await;
    in_flight.store(false, Ordering::Release);
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(tick = label, error = %err, "tick failed"),
        Err(_) => tracing::error!(tick = label, "tick panicked"),
    }
}

use futures_util::FutureExt;

/// Owns the background timer tasks for one server process. Dropping it aborts every task.
pub struct Scheduler {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn all timer-driven agents. The embedding worker and LLM client are optional in the
    /// sense that a caller who couldn't bring either up passes `None`/[`NullLlmClient`]; the
    /// scheduler still runs, it just never has work to do for that agent.
    pub fn spawn(storage: Arc<Storage>, embedding_worker: Option<Arc<EmbeddingWorker>>, llm_client: Arc<dyn LlmClient>) -> Self {
        let mut handles = Vec::new();

        if let Some(worker) = embedding_worker {
            let storage = storage.clone();
            let in_flight = Arc::new(AtomicBool::new(false));
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(EMBEDDING_TICK).await;
                    let storage = storage.clone();
                    let worker = worker.clone();
                    guarded_tick(&in_flight, "embedding", move || async move {
                        embedding_tick(&storage, &worker).map(|_| ())
                    })
                    .await;
                }
            }));
        }

        {
            let storage = storage.clone();
            let llm_client = llm_client.clone();
            let in_flight = Arc::new(AtomicBool::new(false));
            let path_trackers: Arc<AsyncMutex<HashMap<String, PathTracker>>> = Arc::new(AsyncMutex::new(HashMap::new()));
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(LLM_TICK).await;
                    let storage = storage.clone();
                    let llm_client = llm_client.clone();
                    let path_trackers = path_trackers.clone();
                    guarded_tick(&in_flight, "llm-enrichment", move || async move {
                        llm_tick(&storage, llm_client.as_ref(), &path_trackers).await.map(|_| ())
                    })
                    .await;
                }
            }));
        }

        {
            let storage = storage.clone();
            let in_flight = Arc::new(AtomicBool::new(false));
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(CURATION_TICK).await;
                    let storage = storage.clone();
                    guarded_tick(&in_flight, "curation", move || async move { curation_tick(&storage).map(|_| ()) }).await;
                }
            }));
        }

        Self { handles }
    }

    /// Abort every spawned timer task. Called on clean server shutdown.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;

    #[test]
    fn quality_gate_rejects_short_and_vague_names() {
        let short = llm::ExtractedEntity { name: "a".into(), entity_type: "file".into(), confidence: 0.9 };
        assert!(!passes_quality_gate(&short));

        let vague = llm::ExtractedEntity { name: "something broken".into(), entity_type: "problem".into(), confidence: 0.9 };
        assert!(!passes_quality_gate(&vague));
    }

    #[test]
    fn quality_gate_applies_a_higher_floor_to_decisions() {
        let weak_decision = llm::ExtractedEntity { name: "use postgres".into(), entity_type: "decision".into(), confidence: 0.6 };
        assert!(!passes_quality_gate(&weak_decision));

        let strong_decision = llm::ExtractedEntity { name: "use postgres".into(), entity_type: "decision".into(), confidence: 0.8 };
        assert!(passes_quality_gate(&strong_decision));
    }

    #[test]
    fn distinct_project_hashes_deduplicates() {
        let conn = Connection::open_in_memory().unwrap();
        migrations::apply_migrations(&conn, false).unwrap();
        ObservationRepository::new(&conn, "proj-a").save(None, "a".into(), "hook:Edit").unwrap();
        ObservationRepository::new(&conn, "proj-a").save(None, "b".into(), "hook:Edit").unwrap();
        ObservationRepository::new(&conn, "proj-b").save(None, "c".into(), "hook:Edit").unwrap();

        let hashes = distinct_project_hashes(&conn).unwrap();
        assert_eq!(hashes.len(), 2);
    }

    #[tokio::test]
    async fn llm_tick_soft_deletes_noise_and_counts_it() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(Some(dir.path().join("t.db"))).unwrap();
        storage
            .with_connection(|conn| ObservationRepository::new(conn, "proj-a").save(None, "just noise".into(), "hook:Edit").map(|_| ()))
            .unwrap();

        let trackers = AsyncMutex::new(HashMap::new());
        let report = llm_tick(&storage, &NullLlmClient, &trackers).await.unwrap();
        assert_eq!(report.classified, 1);
        assert_eq!(report.noise_dropped, 1);
    }
}

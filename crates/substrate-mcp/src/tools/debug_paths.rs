//! `debug-paths`: list, show, start, or resolve a debugging episode.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use substrate_core::model::{DebugPath, PathWaypoint};
use substrate_core::repository::DebugPathRepository;
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["list", "show", "start", "resolve"],
            },
            "id": {
                "type": "string",
                "description": "The debug path identifier. Required for 'show' and 'resolve'."
            },
            "summary": {
                "type": "string",
                "description": "Trigger summary for 'start', resolution summary for 'resolve'."
            }
        },
        "required": ["action"]
    })
}

#[derive(Debug, Deserialize)]
struct DebugPathsArgs {
    action: String,
    id: Option<String>,
    summary: Option<String>,
}

fn path_json(path: &DebugPath) -> Value {
    serde_json::json!({
        "id": path.id,
        "status": path.status.to_string(),
        "triggerSummary": path.trigger_summary,
        "resolutionSummary": path.resolution_summary,
        "startedAt": path.started_at.to_rfc3339(),
        "resolvedAt": path.resolved_at.map(|t| t.to_rfc3339()),
    })
}

fn waypoint_json(waypoint: &PathWaypoint) -> Value {
    serde_json::json!({
        "id": waypoint.id,
        "type": waypoint.waypoint_type.to_string(),
        "sequenceOrder": waypoint.sequence_order,
        "summary": waypoint.summary,
        "createdAt": waypoint.created_at.to_rfc3339(),
    })
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, args: Option<Value>) -> Result<Value, String> {
    let args: DebugPathsArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".to_string()),
    };

    match args.action.as_str() {
        "list" => execute_list(storage, project_hash).await,
        "show" => execute_show(storage, project_hash, args.id).await,
        "start" => execute_start(storage, project_hash, args.summary).await,
        "resolve" => execute_resolve(storage, project_hash, args.id, args.summary).await,
        other => Err(format!("invalid action '{other}'. Must be one of: list, show, start, resolve")),
    }
}

async fn execute_list(storage: &Arc<Storage>, project_hash: &str) -> Result<Value, String> {
    storage
        .with_connection(|conn| {
            let paths = DebugPathRepository::new(conn, project_hash).list(None, 20)?;
            Ok(serde_json::json!({ "paths": paths.iter().map(path_json).collect::<Vec<_>>() }))
        })
        .map_err(|e| e.to_string())
}

async fn execute_show(storage: &Arc<Storage>, project_hash: &str, id: Option<String>) -> Result<Value, String> {
    let id = id.ok_or_else(|| "action 'show' requires 'id'".to_string())?;
    storage
        .with_connection(|conn| {
            let repo = DebugPathRepository::new(conn, project_hash);
            Ok(match repo.find(&id)? {
                Some(path) => {
                    let waypoints = repo.waypoints(&path.id)?;
                    Ok(serde_json::json!({
                        "path": path_json(&path),
                        "waypoints": waypoints.iter().map(waypoint_json).collect::<Vec<_>>(),
                    }))
                }
                None => Err(format!("no debug path found with id '{id}'")),
            })
        })
        .map_err(|e| e.to_string())?
}

async fn execute_start(storage: &Arc<Storage>, project_hash: &str, summary: Option<String>) -> Result<Value, String> {
    let summary = summary.ok_or_else(|| "action 'start' requires 'summary'".to_string())?;
    storage
        .with_connection(|conn| {
            let repo = DebugPathRepository::new(conn, project_hash);
            if repo.active()?.is_some() {
                return Ok(Err("a debug path is already active for this project".to_string()));
            }
            let path = repo.start(&summary)?;
            Ok(Ok(path_json(&path)))
        })
        .map_err(|e| e.to_string())?
}

async fn execute_resolve(
    storage: &Arc<Storage>,
    project_hash: &str,
    id: Option<String>,
    summary: Option<String>,
) -> Result<Value, String> {
    let id = id.ok_or_else(|| "action 'resolve' requires 'id'".to_string())?;
    let summary = summary.ok_or_else(|| "action 'resolve' requires 'summary'".to_string())?;
    storage
        .with_connection(|conn| {
            let repo = DebugPathRepository::new(conn, project_hash);
            repo.resolve(&id, &summary, None)?;
            let path = repo.find(&id)?.ok_or(substrate_core::StorageError::NotFound)?;
            Ok(path_json(&path))
        })
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[tokio::test]
    async fn start_then_list_shows_the_active_path() {
        let (storage, _dir) = test_storage();
        let args = serde_json::json!({"action": "start", "summary": "NullPointerException in auth.ts"});
        execute(&storage, "proj-a", Some(args)).await.unwrap();

        let result = execute(&storage, "proj-a", Some(serde_json::json!({"action": "list"}))).await.unwrap();
        assert_eq!(result["paths"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn starting_a_second_path_while_one_is_active_is_rejected() {
        let (storage, _dir) = test_storage();
        let args = serde_json::json!({"action": "start", "summary": "first error"});
        execute(&storage, "proj-a", Some(args)).await.unwrap();

        let args = serde_json::json!({"action": "start", "summary": "second error"});
        let err = execute(&storage, "proj-a", Some(args)).await.unwrap_err();
        assert!(err.contains("already active"));
    }

    #[tokio::test]
    async fn resolve_clears_active_status() {
        let (storage, _dir) = test_storage();
        let start_result = execute(&storage, "proj-a", Some(serde_json::json!({"action": "start", "summary": "trigger"}))).await.unwrap();
        let id = start_result["id"].as_str().unwrap().to_string();

        let args = serde_json::json!({"action": "resolve", "id": id, "summary": "added a null check"});
        let result = execute(&storage, "proj-a", Some(args)).await.unwrap();
        assert_eq!(result["status"], "resolved");
    }

    #[tokio::test]
    async fn show_unknown_id_is_an_error() {
        let (storage, _dir) = test_storage();
        let args = serde_json::json!({"action": "show", "id": "missing"});
        let err = execute(&storage, "proj-a", Some(args)).await.unwrap_err();
        assert!(err.contains("no debug path found"));
    }
}

//! `topic-context`: list recently stashed topics, the thread-resumption surface over
//! [`substrate_core::repository::StashRepository`].

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use substrate_core::model::Stash;
use substrate_core::repository::StashRepository;
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "limit": {
                "type": "integer",
                "description": "Maximum stashes to return, newest first. Defaults to 20."
            }
        }
    })
}

#[derive(Debug, Deserialize, Default)]
struct TopicContextArgs {
    limit: Option<i64>,
}

fn stash_json(stash: &Stash) -> Value {
    serde_json::json!({
        "id": stash.id,
        "topicLabel": stash.topic_label,
        "summary": stash.summary,
        "status": stash.status.to_string(),
        "observationCount": stash.observation_ids.len(),
        "updatedAt": stash.updated_at.to_rfc3339(),
    })
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, args: Option<Value>) -> Result<Value, String> {
    let args: TopicContextArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => TopicContextArgs::default(),
    };
    let limit = args.limit.unwrap_or(20);

    storage
        .with_connection(|conn| {
            let stashes = StashRepository::new(conn, project_hash).list(None, limit)?;
            Ok(serde_json::json!({ "stashes": stashes.iter().map(stash_json).collect::<Vec<_>>() }))
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
    async fn no_stashes_returns_an_empty_list() {
        let (storage, _dir) = test_storage();
        let result = execute(&storage, "proj-a", None).await.unwrap();
        assert!(result["stashes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_stashes_newest_first() {
        let (storage, _dir) = test_storage();
        storage
            .with_connection(|conn| {
                let repo = StashRepository::new(conn, "proj-a");
                repo.create(Some("s1"), "auth refactor", "paused to fix a build error", &[], &[])?;
                Ok(())
            })
            .unwrap();

        let result = execute(&storage, "proj-a", Some(serde_json::json!({"limit": 5}))).await.unwrap();
        let stashes = result["stashes"].as_array().unwrap();
        assert_eq!(stashes.len(), 1);
        assert_eq!(stashes[0]["topicLabel"], "auth refactor");
    }
}

//! `save-memory`: persist a piece of text directly, outside the hook ingestion pipeline.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use substrate_core::repository::ObservationRepository;
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "text": {
                "type": "string",
                "description": "The content to remember."
            },
            "title": {
                "type": "string",
                "description": "An optional title, used by recall's exact title match."
            },
            "source": {
                "type": "string",
                "description": "Where this memory came from. Defaults to 'save-memory'."
            }
        },
        "required": ["text"]
    })
}

#[derive(Debug, Deserialize)]
struct SaveMemoryArgs {
    text: String,
    title: Option<String>,
    source: Option<String>,
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, args: Option<Value>) -> Result<Value, String> {
    let args: SaveMemoryArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".to_string()),
    };
    let source = args.source.unwrap_or_else(|| "save-memory".to_string());

    let observation = storage
        .with_connection(|conn| ObservationRepository::new(conn, project_hash).save(args.title, args.text, &source))
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "id": observation.id,
        "title": observation.title,
        "source": observation.source,
        "createdAt": observation.created_at.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[test]
    fn schema_requires_text() {
        let schema = schema();
        assert_eq!(schema["required"], serde_json::json!(["text"]));
    }

    #[tokio::test]
    async fn missing_arguments_is_an_error() {
        let (storage, _dir) = test_storage();
        let err = execute(&storage, "proj-a", None).await.unwrap_err();
        assert!(err.contains("missing arguments"));
    }

    #[tokio::test]
    async fn saves_and_returns_the_new_id() {
        let (storage, _dir) = test_storage();
        let args = serde_json::json!({"text": "auth bug was a stale token cache", "title": "auth bug"});
        let result = execute(&storage, "proj-a", Some(args)).await.unwrap();
        assert!(result["id"].as_str().is_some());
        assert_eq!(result["title"], "auth bug");
    }
}

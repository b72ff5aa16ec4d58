//! `discover-tools`: list tools visible to this project from the tool registry, optionally
//! filtered by a keyword against name or description.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use substrate_core::model::ToolRegistryEntry;
use substrate_core::repository::ToolRegistryRepository;
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "keyword": {
                "type": "string",
                "description": "Case-insensitive substring matched against a tool's name or description."
            }
        }
    })
}

#[derive(Debug, Deserialize, Default)]
struct DiscoverToolsArgs {
    keyword: Option<String>,
}

fn entry_json(entry: &ToolRegistryEntry) -> Value {
    serde_json::json!({
        "name": entry.name,
        "type": entry.tool_type.to_string(),
        "scope": entry.scope.to_string(),
        "description": entry.description,
        "status": entry.status.to_string(),
        "usageCount": entry.usage_count,
    })
}

fn matches_keyword(entry: &ToolRegistryEntry, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    entry.name.to_lowercase().contains(&keyword)
        || entry.description.as_deref().unwrap_or("").to_lowercase().contains(&keyword)
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, args: Option<Value>) -> Result<Value, String> {
    let args: DiscoverToolsArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => DiscoverToolsArgs::default(),
    };

    let entries = storage
        .with_connection(|conn| ToolRegistryRepository::new(conn, project_hash).list_visible())
        .map_err(|e| e.to_string())?;

    let filtered: Vec<Value> = entries
        .iter()
        .filter(|entry| args.keyword.as_deref().map(|k| matches_keyword(entry, k)).unwrap_or(true))
        .map(entry_json)
        .collect();

    Ok(serde_json::json!({ "tools": filtered }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_core::model::{ToolScope, ToolType};
    use substrate_core::repository::ToolRegistryRepository;

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[tokio::test]
    async fn lists_every_visible_tool_without_a_keyword() {
        let (storage, _dir) = test_storage();
        storage
            .with_connection(|conn| {
                ToolRegistryRepository::new(conn, "proj-a")
                    .upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", Some("search file contents"))
            })
            .unwrap();

        let result = execute(&storage, "proj-a", None).await.unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keyword_filters_by_description() {
        let (storage, _dir) = test_storage();
        storage
            .with_connection(|conn| {
                let repo = ToolRegistryRepository::new(conn, "proj-a");
                repo.upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", Some("search file contents"))?;
                repo.upsert("bash", ToolType::Builtin, ToolScope::Global, "builtin", Some("run shell commands"))?;
                Ok(())
            })
            .unwrap();

        let result = execute(&storage, "proj-a", Some(serde_json::json!({"keyword": "search"}))).await.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "grep");
    }
}

//! `report-tools`: usage counts across every tool visible to this project, busiest first.

use serde_json::Value;
use std::sync::Arc;

use substrate_core::model::ToolRegistryEntry;
use substrate_core::repository::ToolRegistryRepository;
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

fn entry_json(entry: &ToolRegistryEntry) -> Value {
    serde_json::json!({
        "name": entry.name,
        "usageCount": entry.usage_count,
        "lastUsedAt": entry.last_used_at.map(|t| t.to_rfc3339()),
        "status": entry.status.to_string(),
    })
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, _args: Option<Value>) -> Result<Value, String> {
    // `list_visible` already orders by usage_count descending.
    let entries = storage
        .with_connection(|conn| ToolRegistryRepository::new(conn, project_hash).list_visible())
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({ "tools": entries.iter().map(entry_json).collect::<Vec<_>>() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_core::model::{ToolScope, ToolType};

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[tokio::test]
    async fn orders_tools_by_usage_count_descending() {
        let (storage, _dir) = test_storage();
        storage
            .with_connection(|conn| {
                let repo = ToolRegistryRepository::new(conn, "proj-a");
                repo.upsert("grep", ToolType::Builtin, ToolScope::Global, "builtin", None)?;
                repo.upsert("bash", ToolType::Builtin, ToolScope::Global, "builtin", None)?;
                repo.record_usage("bash", true)?;
                repo.record_usage("bash", true)?;
                repo.record_usage("grep", true)?;
                Ok(())
            })
            .unwrap();

        let result = execute(&storage, "proj-a", None).await.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools[0]["name"], "bash");
        assert_eq!(tools[0]["usageCount"], 2);
    }
}

//! `graph-stats`: report the knowledge graph's current size for this project.

use serde_json::Value;
use std::sync::Arc;

use substrate_core::repository::GraphRepository;
use substrate_core::Storage;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, _args: Option<Value>) -> Result<Value, String> {
    storage
        .with_connection(|conn| {
            let repo = GraphRepository::new(conn, project_hash);
            let node_count = repo.node_count()?;
            let edge_count = repo.edge_count()?;
            Ok(serde_json::json!({ "nodeCount": node_count, "edgeCount": edge_count }))
        })
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_core::model::{EdgeType, NodeType};

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[tokio::test]
    async fn empty_graph_reports_zero_counts() {
        let (storage, _dir) = test_storage();
        let result = execute(&storage, "proj-a", None).await.unwrap();
        assert_eq!(result["nodeCount"], 0);
        assert_eq!(result["edgeCount"], 0);
    }

    #[tokio::test]
    async fn counts_reflect_inserted_nodes_and_edges() {
        let (storage, _dir) = test_storage();
        storage
            .with_connection(|conn| {
                let repo = GraphRepository::new(conn, "proj-a");
                let a = repo.upsert_node(NodeType::File, "a.rs", serde_json::json!({}), None)?;
                let b = repo.upsert_node(NodeType::File, "b.rs", serde_json::json!({}), None)?;
                repo.upsert_edge(&a.id, &b.id, EdgeType::RelatedTo, 0.5, serde_json::json!({}))?;
                Ok(())
            })
            .unwrap();

        let result = execute(&storage, "proj-a", None).await.unwrap();
        assert_eq!(result["nodeCount"], 2);
        assert_eq!(result["edgeCount"], 1);
    }
}

//! `query-graph`: traverse the knowledge graph outward from one named node.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::str::FromStr;

use substrate_core::model::{GraphEdge, GraphNode, NodeType};
use substrate_core::repository::GraphRepository;
use substrate_core::Storage;

/// Hard ceiling on how far `query-graph` will walk outward from the seed node, regardless of
/// what the caller requests — bounds a single call's cost on a densely connected project.
const MAX_DEPTH: u32 = 5;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "node_type": {
                "type": "string",
                "enum": ["file", "project", "reference", "decision", "problem", "solution"],
                "description": "The seed node's type."
            },
            "node_name": {
                "type": "string",
                "description": "The seed node's name."
            },
            "depth": {
                "type": "integer",
                "description": "How many hops outward to traverse, clamped to 5. Defaults to 1."
            }
        },
        "required": ["node_type", "node_name"]
    })
}

#[derive(Debug, Deserialize)]
struct QueryGraphArgs {
    node_type: String,
    node_name: String,
    depth: Option<u32>,
}

fn node_json(node: &GraphNode) -> Value {
    serde_json::json!({
        "id": node.id,
        "type": node.node_type.to_string(),
        "name": node.name,
        "metadata": node.metadata,
    })
}

fn edge_json(edge: &GraphEdge) -> Value {
    serde_json::json!({
        "id": edge.id,
        "sourceId": edge.source_id,
        "targetId": edge.target_id,
        "type": edge.edge_type.to_string(),
        "weight": edge.weight,
    })
}

pub async fn execute(storage: &Arc<Storage>, project_hash: &str, args: Option<Value>) -> Result<Value, String> {
    let args: QueryGraphArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}"))?,
        None => return Err("missing arguments".to_string()),
    };
    let node_type = NodeType::from_str(&args.node_type)
        .map_err(|_| format!("invalid node_type '{}'", args.node_type))?;
    let depth = args.depth.unwrap_or(1).min(MAX_DEPTH);

    storage
        .with_connection(|conn| {
            let repo = GraphRepository::new(conn, project_hash);
            let Some(seed) = repo.find_node(node_type, &args.node_name)? else {
                return Ok(Err(format!("no node found of type '{}' named '{}'", args.node_type, args.node_name)));
            };

            let mut visited_nodes: HashSet<String> = HashSet::from([seed.id.clone()]);
            let mut visited_edges: HashSet<String> = HashSet::new();
            let mut nodes = vec![seed.clone()];
            let mut edges: Vec<GraphEdge> = Vec::new();
            let mut frontier = VecDeque::from([(seed.id.clone(), 0u32)]);

            while let Some((node_id, hops)) = frontier.pop_front() {
                if hops >= depth {
                    continue;
                }
                for edge in repo.edges_from(&node_id)? {
                    if visited_edges.insert(edge.id.clone()) {
                        if visited_nodes.insert(edge.target_id.clone()) {
                            if let Some(target) = repo.find_node_by_id(&edge.target_id)? {
                                nodes.push(target);
                            }
                            frontier.push_back((edge.target_id.clone(), hops + 1));
                        }
                        edges.push(edge);
                    }
                }
            }

            Ok(Ok(serde_json::json!({
                "seed": node_json(&seed),
                "nodes": nodes.iter().map(node_json).collect::<Vec<_>>(),
                "edges": edges.iter().map(edge_json).collect::<Vec<_>>(),
            })))
        })
        .map_err(|e| e.to_string())?
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_core::model::EdgeType;

    fn test_storage() -> (Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        (storage, dir)
    }

    #[tokio::test]
    async fn unknown_node_is_reported_as_an_error() {
        let (storage, _dir) = test_storage();
        let args = serde_json::json!({"node_type": "file", "node_name": "missing.rs"});
        let err = execute(&storage, "proj-a", Some(args)).await.unwrap_err();
        assert!(err.contains("no node found"));
    }

    #[tokio::test]
    async fn traversal_reaches_a_two_hop_neighbor() {
        let (storage, _dir) = test_storage();
        storage
            .with_connection(|conn| {
                let repo = GraphRepository::new(conn, "proj-a");
                let a = repo.upsert_node(NodeType::Problem, "auth bug", serde_json::json!({}), None)?;
                let b = repo.upsert_node(NodeType::Solution, "fix token cache", serde_json::json!({}), None)?;
                let c = repo.upsert_node(NodeType::File, "src/auth.ts", serde_json::json!({}), None)?;
                repo.upsert_edge(&a.id, &b.id, EdgeType::SolvedBy, 0.9, serde_json::json!({}))?;
                repo.upsert_edge(&b.id, &c.id, EdgeType::Modifies, 0.8, serde_json::json!({}))?;
                Ok(())
            })
            .unwrap();

        let args = serde_json::json!({"node_type": "problem", "node_name": "auth bug", "depth": 2});
        let result = execute(&storage, "proj-a", Some(args)).await.unwrap();
        let names: Vec<String> = result["nodes"].as_array().unwrap().iter().map(|n| n["name"].as_str().unwrap().to_string()).collect();
        assert!(names.contains(&"src/auth.ts".to_string()));
    }

    #[tokio::test]
    async fn depth_zero_returns_only_the_seed() {
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

        let args = serde_json::json!({"node_type": "file", "node_name": "a.rs", "depth": 0});
        let result = execute(&storage, "proj-a", Some(args)).await.unwrap();
        assert_eq!(result["nodes"].as_array().unwrap().len(), 1);
    }
}

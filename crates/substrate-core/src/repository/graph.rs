//! Knowledge-graph repository: nodes and edges.
//!
//! Nodes upsert on `(project_hash, type, name)`. Edges are directed and capped at
//! [`crate::model::MAX_NODE_DEGREE`] outgoing edges per source node — inserting past the cap
//! evicts the lowest-weight edge from that node rather than growing unbounded, per the curation
//! invariant that degree capping happens at write time as well as during the periodic sweep.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{immediate_transaction, new_id, now_rfc3339};
use crate::error::{Result, StorageError};
use crate::model::{EdgeType, GraphEdge, GraphNode, NodeType, MAX_NODE_DEGREE};

pub struct GraphRepository<'a> {
    conn: &'a Connection,
    project_hash: &'a str,
}

impl<'a> GraphRepository<'a> {
    pub fn new(conn: &'a Connection, project_hash: &'a str) -> Self {
        Self { conn, project_hash }
    }

    fn row_to_node(row: &Row) -> rusqlite::Result<GraphNode> {
        let node_type: String = row.get("type")?;
        let metadata: String = row.get("metadata")?;
        let observation_ids: String = row.get("observation_ids")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(GraphNode {
            id: row.get("id")?,
            node_type: node_type.parse().unwrap_or(NodeType::Reference),
            name: row.get("name")?,
            project_hash: row.get("project_hash")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
            observation_ids: serde_json::from_str(&observation_ids).unwrap_or_default(),
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    fn row_to_edge(row: &Row) -> rusqlite::Result<GraphEdge> {
        let edge_type: String = row.get("type")?;
        let metadata: String = row.get("metadata")?;
        let created_at: String = row.get("created_at")?;
        Ok(GraphEdge {
            id: row.get("id")?,
            source_id: row.get("source_id")?,
            target_id: row.get("target_id")?,
            edge_type: edge_type.parse().unwrap_or(EdgeType::RelatedTo),
            weight: row.get("weight")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    /// Upsert a node on `(project_hash, type, name)`. When an existing node is matched, its
    /// `observation_ids` gains `observation_id` (deduplicated) rather than being replaced — a
    /// node accumulates evidence across many observations over its lifetime.
    pub fn upsert_node(
        &self,
        node_type: NodeType,
        name: &str,
        metadata: serde_json::Value,
        observation_id: Option<&str>,
    ) -> Result<GraphNode> {
        let now = now_rfc3339();
        immediate_transaction(self.conn, || {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT id FROM knowledge_graph_nodes WHERE project_hash = ?1 AND type = ?2 AND name = ?3",
                    params![self.project_hash, node_type.to_string(), name],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                let current_obs: String = self.conn.query_row(
                    "SELECT observation_ids FROM knowledge_graph_nodes WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                let mut ids: Vec<String> = serde_json::from_str(&current_obs).unwrap_or_default();
                if let Some(obs_id) = observation_id {
                    if !ids.iter().any(|existing_id| existing_id == obs_id) {
                        ids.push(obs_id.to_string());
                    }
                }
                self.conn.execute(
                    "UPDATE knowledge_graph_nodes SET metadata = ?1, observation_ids = ?2, updated_at = ?3 WHERE id = ?4",
                    params![metadata.to_string(), serde_json::to_string(&ids).unwrap_or_default(), now, id],
                )?;
            } else {
                let id = new_id();
                let ids = observation_id.map(|o| vec![o.to_string()]).unwrap_or_default();
                self.conn.execute(
                    "INSERT INTO knowledge_graph_nodes
                        (id, type, name, project_hash, metadata, observation_ids, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        id,
                        node_type.to_string(),
                        name,
                        self.project_hash,
                        metadata.to_string(),
                        serde_json::to_string(&ids).unwrap_or_default(),
                        now,
                    ],
                )?;
            }
            Ok(())
        })?;

        self.find_node(node_type, name)?.ok_or(StorageError::NotFound)
    }

    pub fn find_node(&self, node_type: NodeType, name: &str) -> Result<Option<GraphNode>> {
        self.conn
            .query_row(
                "SELECT * FROM knowledge_graph_nodes WHERE project_hash = ?1 AND type = ?2 AND name = ?3",
                params![self.project_hash, node_type.to_string(), name],
                Self::row_to_node,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn find_node_by_id(&self, id: &str) -> Result<Option<GraphNode>> {
        self.conn
            .query_row(
                "SELECT * FROM knowledge_graph_nodes WHERE id = ?1 AND project_hash = ?2",
                params![id, self.project_hash],
                Self::row_to_node,
            )
            .optional()
            .map_err(StorageError::from)
    }

    pub fn list_nodes(&self, node_type: Option<NodeType>, limit: i64) -> Result<Vec<GraphNode>> {
        let limit = limit.clamp(1, super::MAX_LIST_LIMIT);
        match node_type {
            Some(t) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM knowledge_graph_nodes WHERE project_hash = ?1 AND type = ?2 ORDER BY updated_at DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![self.project_hash, t.to_string(), limit], Self::row_to_node)?;
                rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM knowledge_graph_nodes WHERE project_hash = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![self.project_hash, limit], Self::row_to_node)?;
                rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
            }
        }
    }

    /// Outgoing edges from `node_id`, ordered lowest-weight first — the order the degree-cap
    /// eviction and the curation sweep both consume.
    fn outgoing_edges(&self, node_id: &str) -> Result<Vec<GraphEdge>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM knowledge_graph_edges WHERE source_id = ?1 ORDER BY weight ASC")?;
        let rows = stmt.query_map(params![node_id], Self::row_to_edge)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    /// Upsert a directed edge. `weight` is clamped into `[0, 1]`. If `source_id` already has
    /// [`MAX_NODE_DEGREE`] outgoing edges after this insert, the single lowest-weight edge is
    /// deleted (ties broken arbitrarily by `rowid`).
    pub fn upsert_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        weight: f64,
        metadata: serde_json::Value,
    ) -> Result<GraphEdge> {
        let weight = weight.clamp(0.0, 1.0);
        let now = now_rfc3339();

        immediate_transaction(self.conn, || {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT id FROM knowledge_graph_edges WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
                    params![source_id, target_id, edge_type.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                self.conn.execute(
                    "UPDATE knowledge_graph_edges SET weight = ?1, metadata = ?2 WHERE id = ?3",
                    params![weight, metadata.to_string(), id],
                )?;
            } else {
                let id = new_id();
                self.conn.execute(
                    "INSERT INTO knowledge_graph_edges (id, source_id, target_id, type, weight, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![id, source_id, target_id, edge_type.to_string(), weight, metadata.to_string(), now],
                )?;

                let degree: i64 = self.conn.query_row(
                    "SELECT COUNT(*) FROM knowledge_graph_edges WHERE source_id = ?1",
                    params![source_id],
                    |row| row.get(0),
                )?;
                if degree as usize > MAX_NODE_DEGREE {
                    if let Some(weakest) = self
                        .conn
                        .query_row(
                            "SELECT id FROM knowledge_graph_edges WHERE source_id = ?1 ORDER BY weight ASC, rowid ASC LIMIT 1",
                            params![source_id],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?
                    {
                        self.conn.execute(
                            "DELETE FROM knowledge_graph_edges WHERE id = ?1",
                            params![weakest],
                        )?;
                    }
                }
            }
            Ok(())
        })?;

        self.conn
            .query_row(
                "SELECT * FROM knowledge_graph_edges WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
                params![source_id, target_id, edge_type.to_string()],
                Self::row_to_edge,
            )
            .map_err(StorageError::from)
    }

    pub fn edges_from(&self, node_id: &str) -> Result<Vec<GraphEdge>> {
        self.outgoing_edges(node_id)
    }

    pub fn edges_to(&self, node_id: &str) -> Result<Vec<GraphEdge>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM knowledge_graph_edges WHERE target_id = ?1 ORDER BY weight DESC")?;
        let rows = stmt.query_map(params![node_id], Self::row_to_edge)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    /// Edges below [`crate::model::EDGE_WEIGHT_FLOOR`], across the whole project — used by
    /// curation's temporal-decay step to find what to delete.
    pub fn edges_below_floor(&self, floor: f64) -> Result<Vec<GraphEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.* FROM knowledge_graph_edges e
             JOIN knowledge_graph_nodes n ON n.id = e.source_id
             WHERE n.project_hash = ?1 AND e.weight < ?2",
        )?;
        let rows = stmt.query_map(params![self.project_hash, floor], Self::row_to_edge)?;
        rows.collect::<rusqlite::Result<_>>().map_err(StorageError::from)
    }

    pub fn delete_edge(&self, edge_id: &str) -> Result<()> {
        immediate_transaction(self.conn, || {
            self.conn.execute("DELETE FROM knowledge_graph_edges WHERE id = ?1", params![edge_id])?;
            Ok(())
        })
    }

    /// Apply a uniform decay multiplier to every edge's weight, across the whole project — the
    /// other half of curation's temporal-decay step.
    pub fn decay_all_weights(&self, factor: f64) -> Result<u32> {
        immediate_transaction(self.conn, || {
            let updated = self.conn.execute(
                "UPDATE knowledge_graph_edges SET weight = weight * ?1
                 WHERE source_id IN (SELECT id FROM knowledge_graph_nodes WHERE project_hash = ?2)",
                params![factor, self.project_hash],
            )?;
            Ok(updated as u32)
        })
    }

    pub fn node_count(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM knowledge_graph_nodes WHERE project_hash = ?1",
                params![self.project_hash],
                |row| row.get(0),
            )
            .map_err(StorageError::from)
    }

    pub fn edge_count(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM knowledge_graph_edges e
                 JOIN knowledge_graph_nodes n ON n.id = e.source_id
                 WHERE n.project_hash = ?1",
                params![self.project_hash],
                |row| row.get(0),
            )
            .map_err(StorageError::from)
    }
}

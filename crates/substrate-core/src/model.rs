//! Domain types.
//!
//! One struct per entity family, plus the closed enums each repository stores as SQLite `TEXT`
//! columns via hand-written `ToSql`/`FromSql` rather than a derive — matching the convention the
//! storage layer uses throughout: enums round-trip through their `Display`/`FromStr`
//! implementations, never through an integer discriminant, so the database stays readable with
//! a plain SQL client.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum content length, in characters, for a single observation.
pub const MAX_CONTENT_LEN: usize = 100_000;

/// Vector embedding dimensionality used throughout the search layer.
pub const EMBEDDING_DIMENSIONS: usize = 384;

macro_rules! sql_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => $text),+
                };
                write!(f, "{s}")
            }
        }

        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant)),+,
                    other => Err(format!(concat!(stringify!($name), ": unknown variant {:?}"), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse().map_err(|_| FromSqlError::InvalidType)
            }
        }
    };
}

/// Classification assigned to an observation by the LLM enrichment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Noise,
    Discovery,
    Problem,
    Solution,
}

sql_enum!(Classification {
    Noise => "noise",
    Discovery => "discovery",
    Problem => "problem",
    Solution => "solution",
});

/// A single captured unit of activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Stable, opaque 16-hex-character text identifier.
    pub id: String,
    /// Auto-assigned, monotonically increasing, never-reused integer row identifier. Required
    /// by the external-content full-text index, which is not stable across compaction without
    /// it.
    pub rowid: i64,
    pub project_hash: String,
    pub session_id: Option<String>,
    pub source: String,
    pub title: Option<String>,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_version: Option<i64>,
    pub classification: Option<Classification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A tool-use session scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_hash: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Closed enum of knowledge-graph node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Project,
    Reference,
    Decision,
    Problem,
    Solution,
}

sql_enum!(NodeType {
    File => "file",
    Project => "project",
    Reference => "reference",
    Decision => "decision",
    Problem => "problem",
    Solution => "solution",
});

/// A knowledge-graph node, upserted on `(project_hash, type, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub name: String,
    pub project_hash: String,
    pub metadata: serde_json::Value,
    pub observation_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed enum of directed edge kinds between graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    RelatedTo,
    SolvedBy,
    CausedBy,
    Modifies,
    InformedBy,
    References,
    VerifiedBy,
    PrecededBy,
}

sql_enum!(EdgeType {
    RelatedTo => "related_to",
    SolvedBy => "solved_by",
    CausedBy => "caused_by",
    Modifies => "modifies",
    InformedBy => "informed_by",
    References => "references",
    VerifiedBy => "verified_by",
    PrecededBy => "preceded_by",
});

/// Maximum outgoing edges a single node may hold before the lowest-weight edge is evicted.
pub const MAX_NODE_DEGREE: usize = 50;

/// Edge weights below this floor are deleted during curation's temporal-decay step.
pub const EDGE_WEIGHT_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Closed enum of debug-path lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugPathStatus {
    Active,
    Resolved,
    Abandoned,
}

sql_enum!(DebugPathStatus {
    Active => "active",
    Resolved => "resolved",
    Abandoned => "abandoned",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugPath {
    pub id: String,
    pub status: DebugPathStatus,
    pub trigger_summary: String,
    pub resolution_summary: Option<String>,
    pub kiss_summary: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub project_hash: String,
}

/// Closed enum of waypoint kinds on a debug path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointType {
    Error,
    Attempt,
    Failure,
    Success,
    Pivot,
    Revert,
    Discovery,
    Resolution,
}

sql_enum!(WaypointType {
    Error => "error",
    Attempt => "attempt",
    Failure => "failure",
    Success => "success",
    Pivot => "pivot",
    Revert => "revert",
    Discovery => "discovery",
    Resolution => "resolution",
});

/// Maximum waypoints recorded per debug path; over the cap, resolution tracking continues but
/// new waypoints are dropped.
pub const MAX_WAYPOINTS_PER_PATH: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathWaypoint {
    pub id: String,
    pub path_id: String,
    pub observation_id: Option<String>,
    pub waypoint_type: WaypointType,
    pub sequence_order: i64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Closed enum of tool-registry entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolType {
    McpServer,
    SlashCommand,
    Skill,
    Plugin,
    Builtin,
}

sql_enum!(ToolType {
    McpServer => "mcp_server",
    SlashCommand => "slash_command",
    Skill => "skill",
    Plugin => "plugin",
    Builtin => "builtin",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolScope {
    Global,
    Project,
    Plugin,
}

sql_enum!(ToolScope {
    Global => "global",
    Project => "project",
    Plugin => "plugin",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    Active,
    Stale,
    Demoted,
}

sql_enum!(ToolStatus {
    Active => "active",
    Stale => "stale",
    Demoted => "demoted",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRegistryEntry {
    pub name: String,
    pub tool_type: ToolType,
    pub scope: ToolScope,
    pub project_hash: Option<String>,
    pub source: String,
    pub description: Option<String>,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ToolStatus,
}

/// Closed enum of stash lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StashStatus {
    Stashed,
    Resumed,
    Expired,
}

sql_enum!(StashStatus {
    Stashed => "stashed",
    Resumed => "resumed",
    Expired => "expired",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSnapshot {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stash {
    pub id: String,
    pub project_hash: String,
    pub session_id: Option<String>,
    pub topic_label: String,
    pub summary: String,
    pub observation_ids: Vec<String>,
    pub snapshots: Vec<ObservationSnapshot>,
    pub status: StashStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub project_hash: String,
    pub kind: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Persisted per-session/per-project adaptive-threshold state for the topic-shift detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdState {
    pub project_hash: String,
    pub session_id: String,
    pub ewma_mean: f64,
    pub ewma_variance: f64,
    pub sample_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// One row per topic-shift decision, whichever way it went, for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftDecision {
    pub id: String,
    pub project_hash: String,
    pub session_id: String,
    pub distance: f64,
    pub threshold: f64,
    pub shifted: bool,
    pub ewma_mean: f64,
    pub ewma_variance: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_round_trips_through_display_and_from_str() {
        for c in [
            Classification::Noise,
            Classification::Discovery,
            Classification::Problem,
            Classification::Solution,
        ] {
            let s = c.to_string();
            let parsed: Classification = s.parse().unwrap();
            assert_eq!(parsed, c);
        }
    }

    #[test]
    fn edge_type_text_matches_spec_vocabulary() {
        assert_eq!(EdgeType::RelatedTo.to_string(), "related_to");
        assert_eq!(EdgeType::PrecededBy.to_string(), "preceded_by");
    }

    #[test]
    fn unknown_variant_is_rejected() {
        assert!("bogus".parse::<NodeType>().is_err());
    }
}

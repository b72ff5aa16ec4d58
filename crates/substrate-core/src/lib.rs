//! # substrate-core
//!
//! Storage and enrichment substrate for a coding assistant's persistent memory: a per-project
//! SQLite database holding observations, a knowledge graph, debug paths, tool usage, and the
//! background agents that classify, embed, and curate that content over time.
//!
//! - **Storage**: SQLite (via `rusqlite`, bundled) in WAL mode, one connection per process.
//! - **Search**: FTS5 keyword search fused with HNSW vector search (`usearch`) over local
//!   embeddings (`fastembed`).
//! - **Enrichment**: off-tick background agents — embedding, topic-shift detection, LLM
//!   classification, curation, and debug-path tracking.
//! - **Retrieval**: a unified recall surface with token-budgeted detail levels and a
//!   session-start context assembler.
//!
//! Every entity is scoped to a project, identified by a stable hash of its working directory
//! (see [`project`]). Nothing in this crate talks to a client directly; that lives in
//! `substrate-mcp`.

pub mod config;
pub mod enrichment;
pub mod error;
pub mod ingestion;
pub mod model;
pub mod project;
pub mod repository;
pub mod retrieval;
pub mod storage;

#[cfg(feature = "embeddings")]
pub mod embeddings;

#[cfg(feature = "vector-search")]
pub mod search;

pub use config::Config;
pub use error::{Result, StorageError};
pub use model::{
    Classification, DebugPath, DebugPathStatus, EdgeType, GraphEdge, GraphNode, Notification,
    Observation, ObservationSnapshot, PathWaypoint, Session, ShiftDecision, Stash, StashStatus,
    ThresholdState, ToolRegistryEntry, ToolScope, ToolStatus, ToolType, WaypointType,
    EMBEDDING_DIMENSIONS, MAX_CONTENT_LEN, MAX_NODE_DEGREE, MAX_WAYPOINTS_PER_PATH,
};
pub use ingestion::{ingest, EventType, HookEvent, IngestConfig, IngestOutcome, RejectReason};
pub use project::project_hash;
pub use storage::Storage;

#[cfg(feature = "embeddings")]
pub use embeddings::{EmbeddingWorker, LocalEmbedder};

#[cfg(feature = "vector-search")]
pub use search::{HybridSearchConfig, HybridSearcher, KeywordSearcher, VectorIndex};

/// Crate version, surfaced through the `status` MCP tool.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

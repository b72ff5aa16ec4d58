//! MCP tool implementations.
//!
//! One module per tool. Each exposes `schema() -> Value` (the JSON Schema advertised by
//! `tools/list`) and `async fn execute(storage, project_hash, args) -> Result<Value, String>`
//! (the handler `tools/call` dispatches into). Plain `String` errors, not `substrate_core`'s
//! typed `StorageError`, since everything crossing this boundary is rendered straight into a
//! `CallToolResult`'s text content.

pub mod debug_paths;
pub mod discover_tools;
pub mod graph_stats;
pub mod query_graph;
pub mod recall;
pub mod report_tools;
pub mod save_memory;
pub mod status;
pub mod topic_context;

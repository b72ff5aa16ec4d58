//! MCP server: dispatches `initialize`, `tools/list`, `tools/call`, and `ping` over the
//! connection [`crate::protocol::stdio::StdioTransport`] drives.

use std::sync::Arc;
use tracing::{info, warn};

use substrate_core::Storage;

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::tools;

pub struct McpServer {
    storage: Arc<Storage>,
    project_hash: String,
    initialized: bool,
}

impl McpServer {
    pub fn new(storage: Arc<Storage>, project_hash: String) -> Self {
        Self { storage, project_hash, initialized: false }
    }

    /// Dispatch one JSON-RPC request. Returns `None` for notifications, which get no response.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id, request.params)),
            "notifications/initialized" => {
                self.initialized = true;
                None
            }
            "tools/list" => Some(self.handle_tools_list(id)),
            "tools/call" => Some(self.handle_tools_call(id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(id, serde_json::json!({}))),
            other => {
                warn!(method = other, "unknown method");
                Some(JsonRpcResponse::error(id, JsonRpcError::method_not_found()))
            }
        }
    }

    fn handle_initialize(&mut self, id: Option<serde_json::Value>, params: Option<serde_json::Value>) -> JsonRpcResponse {
        let request: Option<InitializeRequest> = params.and_then(|p| serde_json::from_value(p).ok());
        if let Some(request) = &request {
            info!(protocol_version = %request.protocol_version, "initialize");
        }
        let result = InitializeResult::new("substrate-mcp", env!("CARGO_PKG_VERSION"));
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }

    fn handle_tools_list(&self, id: Option<serde_json::Value>) -> JsonRpcResponse {
        let result = ListToolsResult {
            tools: vec![
                ToolDescription {
                    name: "save-memory".into(),
                    description: "Save a piece of text as a persistent memory.".into(),
                    input_schema: tools::save_memory::schema(),
                },
                ToolDescription {
                    name: "recall".into(),
                    description: "Search, view, purge, or restore saved memories.".into(),
                    input_schema: tools::recall::schema(),
                },
                ToolDescription {
                    name: "query-graph".into(),
                    description: "Traverse the knowledge graph from a named node.".into(),
                    input_schema: tools::query_graph::schema(),
                },
                ToolDescription {
                    name: "graph-stats".into(),
                    description: "Report node and edge counts in the knowledge graph.".into(),
                    input_schema: tools::graph_stats::schema(),
                },
                ToolDescription {
                    name: "topic-context".into(),
                    description: "List recently stashed topics for this project.".into(),
                    input_schema: tools::topic_context::schema(),
                },
                ToolDescription {
                    name: "status".into(),
                    description: "Report server version, storage health, and unread notifications.".into(),
                    input_schema: tools::status::schema(),
                },
                ToolDescription {
                    name: "discover-tools".into(),
                    description: "List tools visible to this project, optionally filtered by keyword.".into(),
                    input_schema: tools::discover_tools::schema(),
                },
                ToolDescription {
                    name: "report-tools".into(),
                    description: "Report tool usage counts, ordered by frequency.".into(),
                    input_schema: tools::report_tools::schema(),
                },
                ToolDescription {
                    name: "debug-paths".into(),
                    description: "List, show, start, or resolve a debugging episode.".into(),
                    input_schema: tools::debug_paths::schema(),
                },
            ],
        };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }

    async fn handle_tools_call(&self, id: Option<serde_json::Value>, params: Option<serde_json::Value>) -> JsonRpcResponse {
        let request: CallToolRequest = match params.and_then(|p| serde_json::from_value(p).ok()) {
            Some(r) => r,
            None => return JsonRpcResponse::error(id, JsonRpcError::invalid_params("missing tools/call params")),
        };

        let outcome = match request.name.as_str() {
            "save-memory" => tools::save_memory::execute(&self.storage, &self.project_hash, request.arguments).await,
            "recall" => tools::recall::execute(&self.storage, &self.project_hash, request.arguments).await,
            "query-graph" => tools::query_graph::execute(&self.storage, &self.project_hash, request.arguments).await,
            "graph-stats" => tools::graph_stats::execute(&self.storage, &self.project_hash, request.arguments).await,
            "topic-context" => tools::topic_context::execute(&self.storage, &self.project_hash, request.arguments).await,
            "status" => tools::status::execute(&self.storage, &self.project_hash, request.arguments).await,
            "discover-tools" => tools::discover_tools::execute(&self.storage, &self.project_hash, request.arguments).await,
            "report-tools" => tools::report_tools::execute(&self.storage, &self.project_hash, request.arguments).await,
            "debug-paths" => tools::debug_paths::execute(&self.storage, &self.project_hash, request.arguments).await,
            other => Err(format!("unknown tool '{other}'")),
        };

        let result = match outcome {
            Ok(value) => CallToolResult::ok(&value),
            Err(message) => CallToolResult::error(&message),
        };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> McpServer {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(Some(dir.path().join("test.db"))).unwrap());
        McpServer::new(storage, "proj-a".to_string())
    }

    fn request(method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest { jsonrpc: "2.0".into(), id: Some(serde_json::json!(1)), method: method.into(), params }
    }

    #[tokio::test]
    async fn initialize_returns_server_info() {
        let mut server = server();
        let response = server.handle_request(request("initialize", None)).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "substrate-mcp");
    }

    #[tokio::test]
    async fn tools_list_enumerates_all_nine_tools() {
        let mut server = server();
        let response = server.handle_request(request("tools/list", None)).await.unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 9);
    }

    #[tokio::test]
    async fn unknown_method_reports_method_not_found() {
        let mut server = server();
        let response = server.handle_request(request("bogus", None)).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn tools_call_round_trips_save_memory() {
        let mut server = server();
        let params = serde_json::json!({"name": "save-memory", "arguments": {"text": "remember this"}});
        let response = server.handle_request(request("tools/call", Some(params))).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn notifications_initialized_produces_no_response() {
        let mut server = server();
        let response = server.handle_request(request("notifications/initialized", None)).await;
        assert!(response.is_none());
        assert!(server.initialized);
    }
}

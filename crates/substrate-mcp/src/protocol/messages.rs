//! MCP message payloads carried inside JSON-RPC `params`/`result` (the method-specific shapes
//! [`super::types`] leaves as opaque `Value`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::MCP_VERSION;

/// `initialize` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeRequest {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ServerCapabilities {
    pub tools: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

impl InitializeResult {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities { tools: serde_json::json!({}) },
            server_info: ServerInfo { name: name.to_string(), version: version.to_string() },
        }
    }
}

/// One entry in `tools/list`'s response, naming a tool and its declared input schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescription>,
}

/// `tools/call` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// One block of a `tools/call` response's `content` array. Only the `text` variant is produced
/// here — every tool returns JSON serialized as a single text block, matching the teacher's
/// convention of treating structured results as pretty-printed text for maximum client
/// compatibility rather than relying on a client understanding a bespoke content type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn ok(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self { content: vec![ContentBlock::Text { text }], is_error: false }
    }

    pub fn error(message: &str) -> Self {
        Self { content: vec![ContentBlock::Text { text: message.to_string() }], is_error: true }
    }
}

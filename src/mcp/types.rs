use jsonrpc_core::types::response::{Failure, Output, Success};
use jsonrpc_core::{Error as RpcError, ErrorCode, Id, Value, Version};
use serde::{Deserialize, Serialize};

/// MCP Protocol Types
/// Based on Model Context Protocol specification

/// Header carrying the server-assigned session identifier in both directions.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Tool Definition for MCP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Successful payload of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Wrap a handler return value. Strings are passed through untouched,
    /// everything else is rendered as pretty JSON.
    pub fn from_value(value: &Value) -> Self {
        let text = match value {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: false,
        }
    }

    /// Concatenated text of all content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Name/version advertised in the `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(skip)]
    pub protocol_version: String,
}

/// Error codes for MCP responses
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Transport and gateway specific codes
    pub const INVALID_SESSION: i64 = -32000;
    pub const EXTERNAL_DEPENDENCY: i64 = -32001;
}

/// Build a JSON-RPC error object with the given code.
pub fn rpc_error(code: i64, message: impl Into<String>) -> RpcError {
    RpcError {
        code: ErrorCode::from(code),
        message: message.into(),
        data: None,
    }
}

pub fn success_output(id: Id, result: Value) -> Output {
    Output::Success(Success {
        jsonrpc: Some(Version::V2),
        result,
        id,
    })
}

pub fn failure_output(id: Id, error: RpcError) -> Output {
    Output::Failure(Failure {
        jsonrpc: Some(Version::V2),
        error,
        id,
    })
}

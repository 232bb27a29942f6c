//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// MCP protocol revision implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null when the request id could not be read).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages, one per line, over stdin/stdout.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Case study MCP server starting...");
        let reader = BufReader::new(tokio::io::stdin());
        self.serve(reader, tokio::io::stdout()).await
    }

    /// Serve line-delimited JSON-RPC from `reader` until EOF.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request
    /// Returns None for notifications (requests without id)
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": all_tools()
            }),
        )
    }

    /// Handle tools/call request
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server exposes, in workflow order.
pub fn all_tools() -> Vec<Tool> {
    vec![
        // Session workflow
        get_session_create_tool(),
        get_submit_brief_tool(),
        get_gather_context_tool(),
        get_recommend_styles_tool(),
        get_select_style_tool(),
        get_generate_tool(),
        get_refine_tool(),
        // Output and persistence
        get_export_tool(),
        get_save_project_tool(),
        get_load_project_tool(),
        get_library_tool(),
        get_session_snapshot_tool(),
    ]
}

fn session_only_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": {
                "type": "string",
                "description": "Session ID returned by case_study_session_create"
            }
        },
        "required": ["session_id"],
        "additionalProperties": false
    })
}

// ============================================================================
// Session Workflow Tools
// ============================================================================

fn get_session_create_tool() -> Tool {
    Tool {
        name: "case_study_session_create".to_string(),
        description: "Open a new case study session. Returns the session ID used by every other tool.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

fn get_submit_brief_tool() -> Tool {
    Tool {
        name: "case_study_submit_brief".to_string(),
        description: "Submit (or resubmit) the campaign brief. Project title, client name and brief text are required; resubmitting discards research, styles and the current draft.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session ID"
                },
                "project_title": {
                    "type": "string",
                    "description": "Title of the case study project"
                },
                "client_name": {
                    "type": "string",
                    "description": "Client the campaign was run for"
                },
                "campaign_name": {
                    "type": "string",
                    "description": "Campaign name used in research queries (defaults to the project title)"
                },
                "industry": {
                    "type": "string",
                    "description": "Industry used for benchmark lookups"
                },
                "duration": {
                    "type": "string",
                    "description": "Campaign duration or timeframe"
                },
                "brief_text": {
                    "type": "string",
                    "description": "The campaign brief"
                },
                "achievements_text": {
                    "type": "string",
                    "description": "Known results and achievements"
                },
                "target_metric_names": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Metrics to research, extract, benchmark and verify. Empty skips research."
                }
            },
            "required": ["session_id", "project_title", "client_name", "brief_text"],
            "additionalProperties": false
        }),
    }
}

fn get_gather_context_tool() -> Tool {
    Tool {
        name: "case_study_gather_context".to_string(),
        description: "Research the campaign: web search, metric extraction, industry benchmarks and fact verification. Failed lookups are reported as shortfalls rather than errors.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_recommend_styles_tool() -> Tool {
    Tool {
        name: "case_study_recommend_styles".to_string(),
        description: "Recommend narrative styles for the case study. The Default/Structured option is always offered last.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_select_style_tool() -> Tool {
    Tool {
        name: "case_study_select_style".to_string(),
        description: "Select one of the offered styles by its index.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session ID"
                },
                "index": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Zero-based index into the offered style options"
                }
            },
            "required": ["session_id", "index"],
            "additionalProperties": false
        }),
    }
}

fn get_generate_tool() -> Tool {
    Tool {
        name: "case_study_generate".to_string(),
        description: "Compose the case study in the selected style from the brief and gathered context. Adds the draft to the session library.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_refine_tool() -> Tool {
    Tool {
        name: "case_study_refine".to_string(),
        description: "Revise the current draft according to free-text feedback. The revision replaces the current draft; earlier drafts stay in the library.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session ID"
                },
                "feedback": {
                    "type": "string",
                    "minLength": 1,
                    "description": "What to change in the current draft"
                }
            },
            "required": ["session_id", "feedback"],
            "additionalProperties": false
        }),
    }
}

// ============================================================================
// Output and Persistence Tools
// ============================================================================

fn get_export_tool() -> Tool {
    Tool {
        name: "case_study_export".to_string(),
        description: "Export the current draft as Markdown or PDF into the export directory and archive it. PDF failures are reported, never written as empty files.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session ID"
                },
                "format": {
                    "type": "string",
                    "enum": ["markdown", "md", "pdf"],
                    "default": "markdown",
                    "description": "Export format"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

fn get_save_project_tool() -> Tool {
    Tool {
        name: "case_study_save_project".to_string(),
        description: "Save the session's brief, selected style and current draft as a project file named after the project title.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_load_project_tool() -> Tool {
    Tool {
        name: "case_study_load_project".to_string(),
        description: "Restore a saved project file into a new session.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "type": "string",
                    "description": "Project file name as listed by case_study_library"
                }
            },
            "required": ["file_name"],
            "additionalProperties": false
        }),
    }
}

fn get_library_tool() -> Tool {
    Tool {
        name: "case_study_library".to_string(),
        description: "List archived case studies and saved projects, plus every draft of a session when a session ID is given.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Optional session whose drafts to include"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 1000,
                    "default": 20,
                    "description": "Maximum number of archived case studies to return"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_session_snapshot_tool() -> Tool {
    Tool {
        name: "case_study_session_snapshot".to_string(),
        description: "Return the full session state: phase, brief, gathered context, styles, current draft and library.".to_string(),
        input_schema: session_only_schema(),
    }
}

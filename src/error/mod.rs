use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Completion service error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Case study not found: {id}")]
    CaseStudyNotFound { id: String },

    #[error("Project file not found: {path}")]
    ProjectNotFound { path: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Completion service (LLM) errors
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Completion service unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Empty completion (finish reason: {finish_reason})")]
    EmptyResponse { finish_reason: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Search provider and page scraper errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search provider not configured: {provider}")]
    NotConfigured { provider: String },

    #[error("Search API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid search response: {message}")]
    InvalidResponse { message: String },

    #[error("Search timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Export (markdown/HTML/PDF) errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("PDF generation failed: converter exited with {status}: {stderr}")]
    PdfRendering { status: String, stderr: String },

    #[error("PDF generation failed: converter produced no PDF output")]
    EmptyPdf,

    #[error("PDF generation failed: converter unavailable ({message})")]
    RendererUnavailable { message: String },

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline precondition errors with structured details
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Unknown style option: {index} (offered: {offered})")]
    UnknownStyle { index: usize, offered: usize },
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Mcp(inner) => inner,
            other => McpError::ExecutionFailed {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for completion service operations
pub type CompletionResult<T> = Result<T, CompletionError>;

/// Result type alias for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type alias for export operations
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

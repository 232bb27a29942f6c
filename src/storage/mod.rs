//! Storage layer for the invocation log and the archived case study library.
//!
//! Sessions themselves live in memory (see [`crate::session`]); this module
//! persists what must outlive a process: a record of every tool call and the
//! documents users exported.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::pipeline::CaseStudyDocument;

/// Invocation log entry for debugging and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// Session the call operated on, when there was one.
    pub session_id: Option<String>,
    /// Name of the MCP tool invoked.
    pub tool_name: String,
    /// Input arguments as JSON.
    pub input: serde_json::Value,
    /// Output result as JSON (if successful).
    pub output: Option<serde_json::Value>,
    /// Session phase after the call.
    pub phase: Option<String>,
    /// Latency in milliseconds.
    pub latency_ms: Option<i64>,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Error message (if failed).
    pub error: Option<String>,
    /// When the invocation occurred.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log entry
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            tool_name: tool_name.into(),
            input,
            output: None,
            phase: None,
            latency_ms: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Set the session ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Record the phase the session ended up in
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// An exported case study kept in the long-lived library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedCaseStudy {
    /// Document id (stable across re-exports of the same revision).
    pub id: String,
    /// Session that produced the document.
    pub session_id: Option<String>,
    pub title: String,
    pub client: String,
    pub industry: String,
    pub style: String,
    pub revision: u32,
    pub incomplete_evidence: bool,
    pub body_markdown: String,
    /// When the document was composed.
    pub created_at: DateTime<Utc>,
    /// When the document was (last) archived.
    pub archived_at: DateTime<Utc>,
}

impl ArchivedCaseStudy {
    /// Capture a document for the archive
    pub fn from_document(document: &CaseStudyDocument, session_id: Option<&str>) -> Self {
        Self {
            id: document.id.clone(),
            session_id: session_id.map(str::to_string),
            title: document.title.clone(),
            client: document.client.clone(),
            industry: document.industry.clone(),
            style: document.style.clone(),
            revision: document.revision,
            incomplete_evidence: document.incomplete_evidence,
            body_markdown: document.body_markdown.clone(),
            created_at: document.created_at,
            archived_at: Utc::now(),
        }
    }
}

/// Storage trait for database operations.
#[async_trait]
pub trait Storage: Send + Sync {
    // Invocation logging

    /// Log a tool invocation for debugging.
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;

    // Case study library

    /// Archive a document. Archiving the same document id again replaces the entry.
    async fn archive_case_study(
        &self,
        document: &CaseStudyDocument,
        session_id: Option<&str>,
    ) -> StorageResult<ArchivedCaseStudy>;
    /// Get an archived case study by document ID.
    async fn get_archived_case_study(&self, id: &str) -> StorageResult<ArchivedCaseStudy>;
    /// Most recently archived case studies first.
    async fn list_archived_case_studies(&self, limit: u32) -> StorageResult<Vec<ArchivedCaseStudy>>;
}

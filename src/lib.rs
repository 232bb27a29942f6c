//! # Case Study Forge
//!
//! A research-and-synthesis pipeline that drafts marketing case studies.
//! A campaign brief goes in; the pipeline searches the web for campaign
//! coverage, extracts before/after metrics with a language model, looks up
//! industry benchmarks, cross-checks the claims against independent sources,
//! recommends narrative styles and composes a structured case study that can
//! be refined with feedback and exported as Markdown or PDF.
//!
//! ## Architecture
//!
//! ```text
//! MCP Client / CLI → Session state machine → CaseStudyPipeline
//!                          ↓                    ↓          ↓
//!                    SQLite (log, archive)   Search     Gemini
//! ```
//!
//! Every lookup that fails is recorded as a shortfall on the session context
//! rather than aborting the run; only an invalid brief or a failed
//! composition is surfaced as an error.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use case_study_forge::{AppState, Config, McpServer};
//! use case_study_forge::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::from_config(config, storage)?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Markdown, HTML and PDF export.
pub mod export;
/// Completion service trait and Gemini client.
pub mod llm;
/// Research, extraction, verification, style and composition stages.
pub mod pipeline;
/// Prompt templates for every completion call.
pub mod prompts;
/// Token-bucket rate limiting and retry backoff.
pub mod rate_limit;
/// Web search providers and the retrying snippet fetcher.
pub mod search;
/// MCP server implementation and request handling.
pub mod server;
/// Per-session state machine, session store and project files.
pub mod session;
/// SQLite storage for the invocation log and case study archive.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};

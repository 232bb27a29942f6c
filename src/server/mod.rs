//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers driving the per-session pipeline
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::export::{Exporter, PdfChrome, WkhtmltopdfRenderer};
use crate::llm::{CompletionService, GeminiClient};
use crate::pipeline::CaseStudyPipeline;
use crate::rate_limit::TokenBucket;
use crate::search::{build_provider, SnippetFetcher};
use crate::session::SessionStore;
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Live sessions.
    pub sessions: SessionStore,
    /// Research and synthesis stages.
    pub pipeline: CaseStudyPipeline,
    /// Markdown/PDF writer.
    pub exporter: Exporter,
}

impl AppState {
    /// Create new application state from already-built parts
    pub fn new(
        config: Config,
        storage: SqliteStorage,
        pipeline: CaseStudyPipeline,
        exporter: Exporter,
    ) -> Self {
        Self {
            config,
            storage,
            sessions: SessionStore::new(),
            pipeline,
            exporter,
        }
    }

    /// Build the production pipeline and exporter from configuration.
    ///
    /// One token bucket per provider is shared by every stage that calls it.
    pub fn from_config(config: Config, storage: SqliteStorage) -> AppResult<Self> {
        let pipeline = build_pipeline(&config)?;
        let exporter = build_exporter(&config);
        Ok(Self::new(config, storage, pipeline, exporter))
    }

    /// Directory holding saved project files.
    pub fn projects_dir(&self) -> &Path {
        &self.config.export.output_dir
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

/// Wire the Gemini client and the configured search provider into a pipeline.
pub fn build_pipeline(config: &Config) -> AppResult<CaseStudyPipeline> {
    let llm_limiter = Arc::new(TokenBucket::new(
        "llm",
        config.rate_limit.llm_burst,
        config.rate_limit.llm_per_sec,
    ));
    let completion: Arc<dyn CompletionService> = Arc::new(GeminiClient::new(
        &config.llm,
        config.request.clone(),
        llm_limiter,
    )?);

    let provider = build_provider(&config.search).map_err(|e| AppError::Config {
        message: format!("Failed to build search client: {}", e),
    })?;
    let search_limiter = Arc::new(TokenBucket::new(
        provider.name(),
        config.rate_limit.search_burst,
        config.rate_limit.search_per_sec,
    ));
    let fetcher = SnippetFetcher::new(provider, search_limiter, config.request.clone());

    tracing::info!(
        model = %config.llm.model,
        search = ?config.search.provider,
        concurrency = config.pipeline.benchmark_concurrency,
        "Pipeline initialized"
    );

    Ok(CaseStudyPipeline::new(completion, fetcher, &config.pipeline))
}

/// Exporter writing to the configured directory, rendering PDFs with wkhtmltopdf.
pub fn build_exporter(config: &Config) -> Exporter {
    let renderer = WkhtmltopdfRenderer::new(
        config.export.wkhtmltopdf_path.clone(),
        Duration::from_millis(config.request.timeout_ms),
    );
    Exporter::new(
        config.export.output_dir.clone(),
        PdfChrome::from(&config.export),
        Arc::new(renderer),
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::test_config;
    use super::*;
    use crate::storage::{Invocation, Storage};

    #[tokio::test]
    async fn test_app_state_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let storage = SqliteStorage::new_in_memory().await.unwrap();

        let state = AppState::from_config(config, storage).unwrap();

        assert_eq!(state.config.llm.api_key, "test-key");
        assert_eq!(state.projects_dir(), dir.path());
        assert_eq!(state.exporter.output_dir(), dir.path());
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::from_config(test_config(dir.path().to_path_buf()), storage).unwrap();
        let shared: SharedState = Arc::new(state);

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_app_state_storage_access() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::from_config(test_config(dir.path().to_path_buf()), storage).unwrap();

        let invocation = Invocation::new("case_study_session_create", serde_json::json!({}));
        state.storage.log_invocation(&invocation).await.unwrap();
        assert!(state
            .storage
            .list_archived_case_studies(10)
            .await
            .unwrap()
            .is_empty());
    }
}

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use super::SharedState;
use crate::error::{AppResult, McpError, McpResult, ToolError};
use crate::export::ExportFormat;
use crate::pipeline::CampaignBrief;
use crate::session::{list_projects, load_project, save_project, Session};
use crate::storage::{Invocation, Storage};

/// Default number of archived case studies returned by the library tool.
const DEFAULT_LIBRARY_LIMIT: u32 = 20;

/// Route tool calls to appropriate handlers and log each call as an invocation
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    let start = Instant::now();
    let input = arguments.clone().unwrap_or(Value::Null);
    let result = route(state, tool_name, arguments).await;
    let latency_ms = start.elapsed().as_millis() as i64;

    let mut invocation = Invocation::new(tool_name, input);
    let session_id = match &result {
        Ok(output) => output.get("session_id"),
        Err(_) => invocation.input.get("session_id"),
    }
    .and_then(Value::as_str)
    .map(str::to_string);
    if let Some(session_id) = session_id {
        invocation = invocation.with_session(session_id);
    }

    invocation = match &result {
        Ok(output) => {
            if let Some(phase) = output.get("phase").and_then(Value::as_str) {
                invocation = invocation.with_phase(phase);
            }
            invocation.success(output.clone(), latency_ms)
        }
        Err(e) => invocation.failure(e.to_string(), latency_ms),
    };

    if let Err(e) = state.storage.log_invocation(&invocation).await {
        warn!(tool = %tool_name, error = %e, "Failed to log invocation");
    }

    result
}

async fn route(state: &SharedState, tool_name: &str, arguments: Option<Value>) -> McpResult<Value> {
    let result = match tool_name {
        "case_study_session_create" => handle_session_create(state).await,
        "case_study_submit_brief" => handle_submit_brief(state, arguments).await,
        "case_study_gather_context" => handle_gather_context(state, arguments).await,
        "case_study_recommend_styles" => handle_recommend_styles(state, arguments).await,
        "case_study_select_style" => handle_select_style(state, arguments).await,
        "case_study_generate" => handle_generate(state, arguments).await,
        "case_study_refine" => handle_refine(state, arguments).await,
        "case_study_export" => handle_export(state, arguments).await,
        "case_study_save_project" => handle_save_project(state, arguments).await,
        "case_study_load_project" => handle_load_project(state, arguments).await,
        "case_study_library" => handle_library(state, arguments).await,
        "case_study_session_snapshot" => handle_session_snapshot(state, arguments).await,
        _ => {
            return Err(McpError::UnknownTool {
                tool_name: tool_name.to_string(),
            })
        }
    };
    result.map_err(McpError::from)
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitBriefParams {
    session_id: String,
    #[serde(flatten)]
    brief: CampaignBrief,
}

#[derive(Debug, Deserialize)]
struct SelectStyleParams {
    session_id: String,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct RefineParams {
    session_id: String,
    feedback: String,
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    session_id: String,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoadProjectParams {
    file_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct LibraryParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Handle case_study_session_create - open an idle session
async fn handle_session_create(state: &SharedState) -> AppResult<Value> {
    let session_id = state.sessions.create().await;
    info!(session_id = %session_id, "Session created");
    Ok(json!({
        "session_id": session_id,
        "phase": "idle",
    }))
}

/// Handle case_study_submit_brief - validate and store the brief
async fn handle_submit_brief(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SubmitBriefParams = parse_arguments("case_study_submit_brief", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;

    session.submit_brief(params.brief)?;
    let brief = session.brief()?;

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "project_title": brief.project_title,
        "target_metrics": brief.metric_names(),
    }))
}

/// Handle case_study_gather_context - research, extraction, benchmarks, verification
async fn handle_gather_context(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SessionParams = parse_arguments("case_study_gather_context", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;

    let brief = session.brief()?.clone();
    let context = state.pipeline.gather_context(&brief).await?;
    session.record_context(context)?;
    let context = session.context()?;

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "incomplete_evidence": context.is_incomplete(),
        "metrics_available": context.metrics_available(),
        "shortfalls": context.shortfalls,
        "context": context,
    }))
}

/// Handle case_study_recommend_styles - offer narrative styles
async fn handle_recommend_styles(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SessionParams = parse_arguments("case_study_recommend_styles", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;

    let brief = session.brief()?.clone();
    let context = session.context()?.clone();
    let recommendation = state.pipeline.recommend_styles(&brief, &context).await;
    session.offer_styles(recommendation.clone())?;

    let options: Vec<Value> = recommendation
        .options
        .iter()
        .enumerate()
        .map(|(index, option)| json!({ "index": index, "label": option.label }))
        .collect();

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "options": options,
        "narrative": recommendation.narrative,
        "degraded": recommendation.degraded,
    }))
}

/// Handle case_study_select_style - choose one offered style
async fn handle_select_style(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SelectStyleParams = parse_arguments("case_study_select_style", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;

    let style = session.select_style(params.index)?.clone();

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "style": style.label,
    }))
}

/// Handle case_study_generate - compose the case study in the selected style
async fn handle_generate(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SessionParams = parse_arguments("case_study_generate", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;

    let brief = session.brief()?.clone();
    let style = session.selected_style()?.clone();
    let context = session.context()?.clone();

    let document = state.pipeline.compose(&brief, &style, &context).await?;
    session.record_document(document)?;

    document_response(&session)
}

/// Handle case_study_refine - revise the current document with feedback
async fn handle_refine(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: RefineParams = parse_arguments("case_study_refine", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;

    let previous = session.begin_refinement()?;
    let revised = match state.pipeline.revise(&previous, &params.feedback).await {
        Ok(doc) => doc,
        Err(e) => {
            session.cancel_refinement();
            return Err(e);
        }
    };
    session.record_document(revised)?;

    document_response(&session)
}

fn document_response(session: &Session) -> AppResult<Value> {
    let document = session.document()?;
    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "document": document,
        "library_size": session.library.len(),
    }))
}

// ============================================================================
// Export and persistence
// ============================================================================

/// Handle case_study_export - write Markdown or PDF and archive the document
async fn handle_export(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: ExportParams = parse_arguments("case_study_export", arguments)?;
    let format = match params.format.as_deref() {
        None => ExportFormat::Markdown,
        Some(value) => value.parse::<ExportFormat>().map_err(|reason| ToolError::Validation {
            field: "format".to_string(),
            reason,
        })?,
    };

    let handle = state.sessions.get(&params.session_id).await?;
    let mut session = handle.lock().await;
    let document = session.document()?.clone();

    let artifact = state.exporter.export(&document, format).await?;
    session.mark_exported()?;

    let archived = match state
        .storage
        .archive_case_study(&document, Some(&session.id))
        .await
    {
        Ok(_) => true,
        Err(e) => {
            warn!(document_id = %document.id, error = %e, "Failed to archive exported case study");
            false
        }
    };

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "artifact": artifact,
        "archived": archived,
    }))
}

/// Handle case_study_save_project - persist the session as a project file
async fn handle_save_project(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SessionParams = parse_arguments("case_study_save_project", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let session = handle.lock().await;

    let path = save_project(state.projects_dir(), &session).await?;

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "path": path.display().to_string(),
    }))
}

/// Handle case_study_load_project - restore a saved project into a new session
async fn handle_load_project(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: LoadProjectParams = parse_arguments("case_study_load_project", arguments)?;
    let file_name = params.file_name.trim();

    // Only bare names inside the projects directory.
    let is_bare_name = Path::new(file_name)
        .file_name()
        .map(|name| name == file_name)
        .unwrap_or(false);
    if !is_bare_name {
        return Err(ToolError::Validation {
            field: "file_name".to_string(),
            reason: "must be a file name inside the projects directory".to_string(),
        }
        .into());
    }

    let project = load_project(&state.projects_dir().join(file_name)).await?;
    let session = project.into_session();
    let phase = session.phase;
    let session_id = state.sessions.insert(session).await;

    info!(session_id = %session_id, file = %file_name, "Project loaded");
    Ok(json!({
        "session_id": session_id,
        "phase": phase,
    }))
}

/// Handle case_study_library - session documents, archived exports and saved projects
async fn handle_library(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: LibraryParams = match arguments {
        Some(Value::Null) | None => LibraryParams::default(),
        some => parse_arguments("case_study_library", some)?,
    };

    let session_documents = match &params.session_id {
        Some(id) => {
            let handle = state.sessions.get(id).await?;
            let session = handle.lock().await;
            let documents: Vec<Value> = session
                .library
                .iter()
                .map(|doc| {
                    json!({
                        "id": doc.id,
                        "title": doc.title,
                        "style": doc.style,
                        "revision": doc.revision,
                        "incomplete_evidence": doc.incomplete_evidence,
                        "created_at": doc.created_at,
                    })
                })
                .collect();
            Some(documents)
        }
        None => None,
    };

    let limit = params.limit.unwrap_or(DEFAULT_LIBRARY_LIMIT).clamp(1, 1000);
    let archived = state.storage.list_archived_case_studies(limit).await?;
    let projects = list_projects(state.projects_dir()).await?;

    let mut response = json!({
        "archived": archived,
        "projects": projects,
    });
    if let (Some(documents), Some(id)) = (session_documents, params.session_id) {
        response["session_id"] = json!(id);
        response["session_documents"] = json!(documents);
    }
    Ok(response)
}

/// Handle case_study_session_snapshot - full serializable session state
async fn handle_session_snapshot(state: &SharedState, arguments: Option<Value>) -> AppResult<Value> {
    let params: SessionParams = parse_arguments("case_study_session_snapshot", arguments)?;
    let handle = state.sessions.get(&params.session_id).await?;
    let session = handle.lock().await;

    Ok(json!({
        "session_id": session.id,
        "phase": session.phase,
        "session": session.snapshot(),
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{Exporter, MockPdfRenderer, PdfChrome};
    use crate::llm::MockCompletionService;
    use crate::pipeline::CaseStudyPipeline;
    use crate::rate_limit::TokenBucket;
    use crate::search::{DisabledSearch, SnippetFetcher};
    use crate::server::test_support::test_config;
    use crate::server::AppState;
    use crate::storage::SqliteStorage;
    use std::sync::Arc;

    const STYLE_REPLY: &str = "1. Data-Driven: numbers first\n2. Storytelling: a narrative arc\n3. Executive Summary: brief";
    const BODY: &str = "## Overview\nA\n## Strategic Approach\nB\n## Creative Execution\nC\n## Results & Metrics\nD\n## Learnings & Summary\nE";

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestParams {
        content: String,
        value: i32,
    }

    async fn state_with(completion: MockCompletionService, dir: &Path) -> SharedState {
        let config = test_config(dir.to_path_buf());
        let fetcher = SnippetFetcher::new(
            Arc::new(DisabledSearch),
            Arc::new(TokenBucket::unlimited("search")),
            config.request.clone(),
        );
        let pipeline = CaseStudyPipeline::new(Arc::new(completion), fetcher, &config.pipeline);
        let mut renderer = MockPdfRenderer::new();
        renderer
            .expect_render()
            .returning(|_| Ok(b"%PDF-1.4 test".to_vec()));
        let exporter = Exporter::new(dir.to_path_buf(), PdfChrome::default(), Arc::new(renderer));
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        Arc::new(AppState::new(config, storage, pipeline, exporter))
    }

    fn scripted_completion() -> MockCompletionService {
        let mut completion = MockCompletionService::new();
        completion.expect_generate().returning(|prompt| {
            if prompt.contains("Revise") || prompt.contains("revise") {
                Ok(format!("{}\n\nRevised.", BODY))
            } else if prompt.contains("narrative styles") || prompt.contains("Style Name") {
                Ok(STYLE_REPLY.to_string())
            } else {
                Ok(BODY.to_string())
            }
        });
        completion
    }

    async fn call(state: &SharedState, tool: &str, args: Value) -> McpResult<Value> {
        handle_tool_call(state, tool, Some(args)).await
    }

    #[test]
    fn test_parse_arguments_success() {
        let args = Some(json!({ "content": "test content", "value": 42 }));
        let params: TestParams = parse_arguments("test.tool", args).unwrap();
        assert_eq!(params.content, "test content");
        assert_eq!(params.value, 42);
    }

    #[test]
    fn test_parse_arguments_missing_arguments() {
        let result: McpResult<TestParams> = parse_arguments("test.tool", None);
        let err = result.unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
        assert!(err.to_string().contains("Missing arguments"));
        assert!(err.to_string().contains("test.tool"));
    }

    #[test]
    fn test_parse_arguments_wrong_type() {
        let args = Some(json!({ "content": "test", "value": "not a number" }));
        let result: McpResult<TestParams> = parse_arguments("test.tool", args);
        assert!(matches!(result, Err(McpError::InvalidParameters { .. })));
    }

    #[test]
    fn test_submit_brief_params_flatten() {
        let args = Some(json!({
            "session_id": "s1",
            "project_title": "Launch",
            "client_name": "Acme",
            "brief_text": "Launch it",
            "target_metric_names": ["ROI"]
        }));
        let params: SubmitBriefParams = parse_arguments("case_study_submit_brief", args).unwrap();
        assert_eq!(params.session_id, "s1");
        assert_eq!(params.brief.client_name, "Acme");
        assert_eq!(params.brief.metric_names(), vec!["ROI".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(MockCompletionService::new(), dir.path()).await;
        let err = call(&state, "case_study_nope", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_invalid_brief_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut completion = MockCompletionService::new();
        completion.expect_generate().never();
        let state = state_with(completion, dir.path()).await;

        let created = call(&state, "case_study_session_create", json!({})).await.unwrap();
        let session_id = created["session_id"].as_str().unwrap().to_string();

        let err = call(
            &state,
            "case_study_submit_brief",
            json!({ "session_id": session_id, "project_title": "", "client_name": "Acme", "brief_text": "x" }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("project_title"));

        let snapshot = call(&state, "case_study_session_snapshot", json!({ "session_id": session_id }))
            .await
            .unwrap();
        assert_eq!(snapshot["phase"], "idle");
    }

    #[tokio::test]
    async fn test_generate_before_style_is_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(MockCompletionService::new(), dir.path()).await;
        let created = call(&state, "case_study_session_create", json!({})).await.unwrap();

        let err = call(&state, "case_study_generate", json!({ "session_id": created["session_id"] }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid session state"));
    }

    #[tokio::test]
    async fn test_full_session_flow_without_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(scripted_completion(), dir.path()).await;

        let created = call(&state, "case_study_session_create", json!({})).await.unwrap();
        let sid = created["session_id"].clone();

        call(
            &state,
            "case_study_submit_brief",
            json!({ "session_id": sid, "project_title": "Spring Launch", "client_name": "Acme", "brief_text": "Launch the spring line" }),
        )
        .await
        .unwrap();

        let gathered = call(&state, "case_study_gather_context", json!({ "session_id": sid })).await.unwrap();
        assert_eq!(gathered["phase"], "context_gathered");
        assert_eq!(gathered["incomplete_evidence"], false);

        let styles = call(&state, "case_study_recommend_styles", json!({ "session_id": sid })).await.unwrap();
        let options = styles["options"].as_array().unwrap();
        assert!(!options.is_empty());
        assert_eq!(options.last().unwrap()["label"], "Default/Structured");

        let selected = call(&state, "case_study_select_style", json!({ "session_id": sid, "index": 0 }))
            .await
            .unwrap();
        assert_eq!(selected["phase"], "style_selected");

        let generated = call(&state, "case_study_generate", json!({ "session_id": sid })).await.unwrap();
        assert_eq!(generated["phase"], "document_generated");
        assert_eq!(generated["document"]["revision"], 1);

        let refined = call(
            &state,
            "case_study_refine",
            json!({ "session_id": sid, "feedback": "Shorter overview" }),
        )
        .await
        .unwrap();
        assert_eq!(refined["document"]["revision"], 2);
        assert_eq!(refined["library_size"], 2);

        let exported = call(&state, "case_study_export", json!({ "session_id": sid, "format": "md" }))
            .await
            .unwrap();
        assert_eq!(exported["phase"], "exported");
        assert_eq!(exported["archived"], true);
        assert_eq!(exported["artifact"]["file_name"], "Spring_Launch_case_study.md");
        assert!(dir.path().join("Spring_Launch_case_study.md").exists());

        let library = call(&state, "case_study_library", json!({ "session_id": sid })).await.unwrap();
        assert_eq!(library["archived"].as_array().unwrap().len(), 1);
        assert_eq!(library["session_documents"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_project() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(MockCompletionService::new(), dir.path()).await;

        let created = call(&state, "case_study_session_create", json!({})).await.unwrap();
        let sid = created["session_id"].clone();
        call(
            &state,
            "case_study_submit_brief",
            json!({ "session_id": sid, "project_title": "Fall Promo", "client_name": "Acme", "brief_text": "b" }),
        )
        .await
        .unwrap();

        let saved = call(&state, "case_study_save_project", json!({ "session_id": sid })).await.unwrap();
        assert!(saved["path"].as_str().unwrap().ends_with("Fall_Promo.json"));

        let loaded = call(&state, "case_study_load_project", json!({ "file_name": "Fall_Promo.json" }))
            .await
            .unwrap();
        assert_eq!(loaded["phase"], "brief_submitted");
        assert_ne!(loaded["session_id"], sid);

        let err = call(&state, "case_study_load_project", json!({ "file_name": "../etc/passwd" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file_name"));
    }

    #[tokio::test]
    async fn test_every_call_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(MockCompletionService::new(), dir.path()).await;

        call(&state, "case_study_session_create", json!({})).await.unwrap();
        let _ = call(&state, "case_study_generate", json!({ "session_id": "missing" })).await;

        let (total, failed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) FROM invocations",
        )
        .fetch_one(state.storage.pool())
        .await
        .unwrap();
        assert_eq!(total, 2);
        assert_eq!(failed, 1);
    }
}

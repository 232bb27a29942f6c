use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{Session, SessionPhase};
use crate::error::{AppResult, StorageError, StorageResult, ToolError};
use crate::export::sanitize_title;
use crate::pipeline::{CampaignBrief, CaseStudyDocument, StyleOption};

/// Layout version written into every project file.
const PROJECT_FILE_VERSION: u32 = 1;

/// A saved case study project: one JSON file per project title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub brief: CampaignBrief,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<CaseStudyDocument>,
}

impl ProjectFile {
    /// Capture the persistent part of a session.
    pub fn from_session(session: &Session) -> Result<Self, ToolError> {
        let brief = session.brief()?.clone();
        Ok(Self {
            version: PROJECT_FILE_VERSION,
            saved_at: Utc::now(),
            brief,
            selected_style: session.selected_style.as_ref().map(|s| s.label.clone()),
            document_body: session.document.as_ref().map(|d| d.body_markdown.clone()),
            document: session.document.clone(),
        })
    }

    /// Rebuild a fresh session from the saved state.
    ///
    /// With a saved document the session resumes at `document_generated`,
    /// otherwise at `brief_submitted`.
    pub fn into_session(self) -> Session {
        let mut session = Session::new();
        session.brief = Some(self.brief);
        session.selected_style = self.selected_style.map(StyleOption::new);
        session.phase = SessionPhase::BriefSubmitted;

        if let Some(document) = self.document {
            session.library.push(document.clone());
            session.document = Some(document);
            session.phase = SessionPhase::DocumentGenerated;
        }

        session
    }
}

/// Listing entry for a saved project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub file_name: String,
    pub project_title: String,
    pub client_name: String,
    pub saved_at: DateTime<Utc>,
    pub has_document: bool,
}

/// `<sanitized_title>.json`
pub fn project_file_name(title: &str) -> String {
    format!("{}.json", sanitize_title(title))
}

/// Write the session's project file into `dir`, replacing any earlier save.
///
/// A session without a brief has nothing to save.
pub async fn save_project(dir: &Path, session: &Session) -> AppResult<PathBuf> {
    let project = ProjectFile::from_session(session)?;
    let path = write_project(dir, &project).await?;

    info!(
        session_id = %session.id,
        path = %path.display(),
        has_document = project.document.is_some(),
        "Project saved"
    );
    Ok(path)
}

async fn write_project(dir: &Path, project: &ProjectFile) -> StorageResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(project_file_name(&project.brief.project_title));
    let json = serde_json::to_vec_pretty(project)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}

/// Read a project file.
pub async fn load_project(path: &Path) -> StorageResult<ProjectFile> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::ProjectNotFound {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Summaries of every readable project file in `dir`, sorted by file name.
///
/// A missing directory lists as empty; unreadable files are skipped.
pub async fn list_projects(dir: &Path) -> StorageResult<Vec<ProjectSummary>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut summaries = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        match load_project(&path).await {
            Ok(project) => summaries.push(ProjectSummary {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                project_title: project.brief.project_title,
                client_name: project.brief.client_name,
                saved_at: project.saved_at,
                has_document: project.document.is_some(),
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable project file"),
        }
    }

    summaries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(summaries)
}

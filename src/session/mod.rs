//! Per-session pipeline state.
//!
//! A [`Session`] is the explicit context object for one user's run: the
//! submitted brief, every intermediate artifact, the current document and
//! the library of documents generated so far. Transitions check the current
//! [`SessionPhase`] and reset downstream state when an earlier step is
//! re-entered.

mod persist;

pub use persist::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::ToolError;
use crate::pipeline::{
    CampaignBrief, CaseStudyDocument, GatheredContext, StyleOption, StyleRecommendation,
};

/// Where a session is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    BriefSubmitted,
    ContextGathered,
    StylesOffered,
    StyleSelected,
    DocumentGenerated,
    Refining,
    Exported,
}

impl SessionPhase {
    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::BriefSubmitted => "brief_submitted",
            SessionPhase::ContextGathered => "context_gathered",
            SessionPhase::StylesOffered => "styles_offered",
            SessionPhase::StyleSelected => "style_selected",
            SessionPhase::DocumentGenerated => "document_generated",
            SessionPhase::Refining => "refining",
            SessionPhase::Exported => "exported",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SessionPhase::Idle),
            "brief_submitted" => Ok(SessionPhase::BriefSubmitted),
            "context_gathered" => Ok(SessionPhase::ContextGathered),
            "styles_offered" => Ok(SessionPhase::StylesOffered),
            "style_selected" => Ok(SessionPhase::StyleSelected),
            "document_generated" => Ok(SessionPhase::DocumentGenerated),
            "refining" => Ok(SessionPhase::Refining),
            "exported" => Ok(SessionPhase::Exported),
            _ => Err(format!("Unknown session phase: {}", s)),
        }
    }
}

/// Append-only list of every document generated in a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Library(Vec<CaseStudyDocument>);

impl Library {
    /// Append a document
    pub fn push(&mut self, document: CaseStudyDocument) {
        self.0.push(document);
    }

    /// Documents in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &CaseStudyDocument> {
        self.0.iter()
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look a document up by id.
    pub fn get(&self, id: &str) -> Option<&CaseStudyDocument> {
        self.0.iter().find(|doc| doc.id == id)
    }

    /// Most recently added document.
    pub fn latest(&self) -> Option<&CaseStudyDocument> {
        self.0.last()
    }
}

/// One user's pipeline context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<CampaignBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<GatheredContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<StyleRecommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_style: Option<StyleOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<CaseStudyDocument>,
    #[serde(default)]
    pub library: Library,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an idle session with a fresh id
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            phase: SessionPhase::Idle,
            created_at: now,
            updated_at: now,
            brief: None,
            context: None,
            styles: None,
            selected_style: None,
            document: None,
            library: Library::default(),
        }
    }

    fn require(&self, allowed: &[SessionPhase], expected: &str) -> Result<(), ToolError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(ToolError::InvalidState {
                expected: expected.to_string(),
                actual: self.phase.to_string(),
            })
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(session_id = %self.id, from = %self.phase, to = %phase, "Session transition");
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    /// Submit (or resubmit) the brief. Allowed from any phase.
    ///
    /// Everything gathered for a previous brief is discarded; the library
    /// is kept.
    pub fn submit_brief(&mut self, brief: CampaignBrief) -> Result<(), ToolError> {
        brief.validate()?;
        self.brief = Some(brief);
        self.context = None;
        self.styles = None;
        self.selected_style = None;
        self.document = None;
        self.enter(SessionPhase::BriefSubmitted);
        Ok(())
    }

    /// The submitted brief.
    pub fn brief(&self) -> Result<&CampaignBrief, ToolError> {
        self.brief.as_ref().ok_or_else(|| ToolError::InvalidState {
            expected: SessionPhase::BriefSubmitted.to_string(),
            actual: self.phase.to_string(),
        })
    }

    /// Store gathered context, discarding styles and documents built on
    /// earlier context.
    pub fn record_context(&mut self, context: GatheredContext) -> Result<(), ToolError> {
        self.brief()?;
        self.context = Some(context);
        self.styles = None;
        self.selected_style = None;
        self.document = None;
        self.enter(SessionPhase::ContextGathered);
        Ok(())
    }

    /// The gathered context.
    pub fn context(&self) -> Result<&GatheredContext, ToolError> {
        self.context.as_ref().ok_or_else(|| ToolError::InvalidState {
            expected: SessionPhase::ContextGathered.to_string(),
            actual: self.phase.to_string(),
        })
    }

    /// Store the offered styles.
    pub fn offer_styles(&mut self, styles: StyleRecommendation) -> Result<(), ToolError> {
        self.context()?;
        self.styles = Some(styles);
        self.selected_style = None;
        self.document = None;
        self.enter(SessionPhase::StylesOffered);
        Ok(())
    }

    /// Select one of the offered styles by zero-based index.
    ///
    /// Selecting again restarts from this point and clears the current
    /// document.
    pub fn select_style(&mut self, index: usize) -> Result<&StyleOption, ToolError> {
        let styles = self.styles.as_ref().ok_or_else(|| ToolError::InvalidState {
            expected: SessionPhase::StylesOffered.to_string(),
            actual: self.phase.to_string(),
        })?;
        let option = styles
            .options
            .get(index)
            .cloned()
            .ok_or(ToolError::UnknownStyle {
                index,
                offered: styles.options.len(),
            })?;

        self.document = None;
        self.enter(SessionPhase::StyleSelected);
        Ok(self.selected_style.insert(option))
    }

    /// The selected style.
    pub fn selected_style(&self) -> Result<&StyleOption, ToolError> {
        self.selected_style
            .as_ref()
            .ok_or_else(|| ToolError::InvalidState {
                expected: SessionPhase::StyleSelected.to_string(),
                actual: self.phase.to_string(),
            })
    }

    /// Make `document` the current one and add it to the library.
    ///
    /// Accepts a fresh draft after a style is selected, or a revision while
    /// refining; the previous current document is replaced.
    pub fn record_document(&mut self, document: CaseStudyDocument) -> Result<(), ToolError> {
        self.require(
            &[
                SessionPhase::StyleSelected,
                SessionPhase::DocumentGenerated,
                SessionPhase::Refining,
                SessionPhase::Exported,
            ],
            "style_selected or refining",
        )?;
        self.selected_style()?;

        self.library.push(document.clone());
        self.document = Some(document);
        self.enter(SessionPhase::DocumentGenerated);
        Ok(())
    }

    /// The current document.
    pub fn document(&self) -> Result<&CaseStudyDocument, ToolError> {
        self.document.as_ref().ok_or_else(|| ToolError::InvalidState {
            expected: SessionPhase::DocumentGenerated.to_string(),
            actual: self.phase.to_string(),
        })
    }

    /// Start a feedback round on the current document.
    pub fn begin_refinement(&mut self) -> Result<CaseStudyDocument, ToolError> {
        self.require(
            &[
                SessionPhase::DocumentGenerated,
                SessionPhase::Refining,
                SessionPhase::Exported,
            ],
            "document_generated",
        )?;
        let document = self.document()?.clone();
        self.enter(SessionPhase::Refining);
        Ok(document)
    }

    /// Abandon a feedback round, keeping the current document.
    pub fn cancel_refinement(&mut self) {
        if self.phase == SessionPhase::Refining {
            self.enter(SessionPhase::DocumentGenerated);
        }
    }

    /// Record a successful export of the current document.
    pub fn mark_exported(&mut self) -> Result<(), ToolError> {
        self.require(
            &[SessionPhase::DocumentGenerated, SessionPhase::Exported],
            "document_generated",
        )?;
        self.document()?;
        self.enter(SessionPhase::Exported);
        Ok(())
    }

    /// Serializable view of the whole session.
    pub fn snapshot(&self) -> serde_json::Value {
        crate::pipeline::serialize_for_log(self, "session_snapshot")
    }
}

/// All live sessions, each behind its own lock.
///
/// Holding a session's lock across a pipeline call keeps that session to a
/// single writer while other sessions proceed.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new idle session, returning its id.
    pub async fn create(&self) -> String {
        self.insert(Session::new()).await
    }

    /// Register an existing session, replacing any with the same id.
    pub async fn insert(&self, session: Session) -> String {
        let id = session.id.clone();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        id
    }

    /// Handle to a session.
    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>, ToolError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ToolError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    /// Drop a session; returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether there are no live sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

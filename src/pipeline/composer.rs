use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::{CampaignBrief, GatheredContext, MetricRecord, StyleOption};
use crate::error::CompletionResult;
use crate::export::section_headings;
use crate::llm::CompletionService;
use crate::prompts::{CASE_STUDY_PROMPT, NOT_AVAILABLE, REVISION_PROMPT};

/// Section outline every case study is asked to follow.
pub const CASE_STUDY_SECTIONS: [&str; 5] = [
    "Overview",
    "Strategic Approach",
    "Creative Execution",
    "Results & Metrics",
    "Learnings & Summary",
];

/// Line inserted when metrics are unavailable and the draft does not say so.
const METRICS_NOT_AVAILABLE_LINE: &str = "_Quantitative campaign metrics: not available._";

/// The generated case study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseStudyDocument {
    pub id: String,
    pub title: String,
    pub client: String,
    #[serde(default)]
    pub industry: String,
    pub style: String,
    pub body_markdown: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_metrics: Option<Vec<MetricRecord>>,
    /// Some research lookups failed while gathering context.
    #[serde(default)]
    pub incomplete_evidence: bool,
    /// The draft had metric content to work from. When false, every
    /// revision keeps the "not available" marker in its results section.
    #[serde(default = "metrics_were_available")]
    pub metrics_available: bool,
    /// 1 for a fresh draft, incremented by each revision.
    #[serde(default = "first_revision")]
    pub revision: u32,
}

fn first_revision() -> u32 {
    1
}

fn metrics_were_available() -> bool {
    true
}

impl CaseStudyDocument {
    /// Create a first-revision document
    pub fn new(
        brief: &CampaignBrief,
        style: &StyleOption,
        body_markdown: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: brief.project_title.trim().to_string(),
            client: brief.client_name.trim().to_string(),
            industry: brief.industry.trim().to_string(),
            style: style.label.clone(),
            body_markdown: body_markdown.into(),
            created_at: Utc::now(),
            source_metrics: None,
            incomplete_evidence: false,
            metrics_available: metrics_were_available(),
            revision: first_revision(),
        }
    }

    /// Attach the metrics the draft was based on
    pub fn with_source_metrics(mut self, metrics: Option<Vec<MetricRecord>>) -> Self {
        self.source_metrics = metrics;
        self
    }

    /// Flag the draft as based on incomplete evidence
    pub fn with_incomplete_evidence(mut self, incomplete: bool) -> Self {
        self.incomplete_evidence = incomplete;
        self
    }

    /// Record whether the draft had metric content
    pub fn with_metrics_available(mut self, available: bool) -> Self {
        self.metrics_available = available;
        self
    }

    /// A successor revision carrying a new body.
    pub fn revised(&self, body_markdown: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body_markdown: body_markdown.into(),
            created_at: Utc::now(),
            revision: self.revision + 1,
            ..self.clone()
        }
    }
}

/// Outline sections with no matching heading in `body`.
pub fn missing_sections(body: &str) -> Vec<&'static str> {
    let headings: Vec<String> = section_headings(body)
        .into_iter()
        .map(|h| h.to_lowercase())
        .collect();

    CASE_STUDY_SECTIONS
        .iter()
        .copied()
        .filter(|section| {
            let key = section
                .split_whitespace()
                .next()
                .unwrap_or(section)
                .to_lowercase();
            !headings.iter().any(|h| h.contains(&key))
        })
        .collect()
}

/// Make sure a draft written without metrics says so explicitly.
///
/// Only the results section is checked for an existing statement. The marker
/// goes under the results heading when there is one, otherwise a results
/// section is appended.
pub fn mark_metrics_unavailable(body: &str) -> String {
    let mut lines: Vec<&str> = body.lines().collect();
    let results_heading = lines
        .iter()
        .position(|line| is_heading(line) && line.to_lowercase().contains("results"));

    match results_heading {
        Some(idx) => {
            let section_end = lines[idx + 1..]
                .iter()
                .position(|line| is_heading(line))
                .map_or(lines.len(), |offset| idx + 1 + offset);
            if lines[idx..section_end]
                .iter()
                .any(|line| line.to_lowercase().contains(NOT_AVAILABLE))
            {
                return body.to_string();
            }

            lines.insert(idx + 1, "");
            lines.insert(idx + 2, METRICS_NOT_AVAILABLE_LINE);
            lines.join("\n")
        }
        None => format!(
            "{}\n\n## Results & Metrics\n\n{}",
            body.trim_end(),
            METRICS_NOT_AVAILABLE_LINE
        ),
    }
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Writes and revises case studies.
#[derive(Clone)]
pub struct CaseStudyComposer {
    completion: Arc<dyn CompletionService>,
}

impl CaseStudyComposer {
    /// Create a new composer
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// Prompt for a first draft. Depends only on its inputs.
    pub fn build_prompt(
        &self,
        brief: &CampaignBrief,
        style: &StyleOption,
        context: &GatheredContext,
    ) -> String {
        let guidance = if style.is_default() {
            "Follow the section outline exactly in a neutral, structured tone.".to_string()
        } else {
            format!(
                "Tell the story in the \"{}\" style while keeping the section outline.",
                style.label
            )
        };

        let mut prompt = format!(
            "{}\n\nNarrative style: {}\n{}\n\n{}",
            CASE_STUDY_PROMPT,
            style.label,
            guidance,
            context.describe(brief)
        );

        if context.is_incomplete() {
            prompt.push_str(
                "\n\nNote: some research lookups failed. Treat the evidence above as incomplete and do not fill the gaps.",
            );
        }

        prompt
    }

    /// Compose a first-revision case study.
    ///
    /// Completion failures are returned. Missing outline sections are logged,
    /// not rejected.
    pub async fn compose(
        &self,
        brief: &CampaignBrief,
        style: &StyleOption,
        context: &GatheredContext,
    ) -> CompletionResult<CaseStudyDocument> {
        let start = Instant::now();
        let prompt = self.build_prompt(brief, style, context);
        let reply = self.completion.generate(&prompt).await?;

        let mut body = reply.trim().to_string();
        if !context.metrics_available() {
            body = mark_metrics_unavailable(&body);
        }
        log_missing_sections(&body);

        let document = CaseStudyDocument::new(brief, style, body)
            .with_source_metrics(context.extracted_metrics())
            .with_incomplete_evidence(context.is_incomplete())
            .with_metrics_available(context.metrics_available());

        info!(
            stage = "compose",
            document_id = %document.id,
            style = %document.style,
            incomplete_evidence = document.incomplete_evidence,
            latency_ms = start.elapsed().as_millis() as u64,
            "Case study composed"
        );

        Ok(document)
    }

    /// Prompt for a feedback-driven revision.
    pub fn build_revision_prompt(&self, previous: &CaseStudyDocument, feedback: &str) -> String {
        format!(
            "{}\n\nEditor feedback:\n{}\n\nCurrent draft:\n{}",
            REVISION_PROMPT,
            feedback.trim(),
            previous.body_markdown
        )
    }

    /// Revise `previous` according to `feedback`, producing the next revision.
    pub async fn revise(
        &self,
        previous: &CaseStudyDocument,
        feedback: &str,
    ) -> CompletionResult<CaseStudyDocument> {
        let start = Instant::now();
        let prompt = self.build_revision_prompt(previous, feedback);
        let reply = self.completion.generate(&prompt).await?;

        let mut body = reply.trim().to_string();
        if !previous.metrics_available {
            body = mark_metrics_unavailable(&body);
        }
        log_missing_sections(&body);
        let document = previous.revised(body);

        info!(
            stage = "revise",
            document_id = %document.id,
            revision = document.revision,
            latency_ms = start.elapsed().as_millis() as u64,
            "Case study revised"
        );

        Ok(document)
    }
}

fn log_missing_sections(body: &str) {
    let missing = missing_sections(body);
    if !missing.is_empty() {
        warn!(missing = ?missing, "Case study is missing outline sections");
    }
}

//! Case study research and synthesis pipeline.
//!
//! Stages, in order:
//! - [`MetricExtractor`]: before/after metrics from campaign text
//! - [`BenchmarkFetcher`]: industry benchmark per metric
//! - [`FactVerifier`]: credibility of the metrics against public sources
//! - [`StyleRecommender`]: narrative styles to choose from
//! - [`CaseStudyComposer`]: the final document and its revisions
//!
//! [`CaseStudyPipeline`] wires them together. Search and completion failures
//! inside a stage are recorded as [`StageShortfall`]s and the run continues;
//! only brief validation and composition failures are returned as errors.

mod benchmarks;
mod brief;
mod composer;
mod metrics;
mod parse;
mod styles;
mod verification;

pub use benchmarks::*;
pub use brief::*;
pub use composer::*;
pub use metrics::*;
pub use parse::*;
pub use styles::*;
pub use verification::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{AppResult, ToolError};
use crate::llm::CompletionService;
use crate::prompts::NOT_AVAILABLE;
use crate::search::{truncate_chars, Shortfall, SnippetFetcher, SourceSnippet};

/// Character budget for public coverage embedded in prompts.
const COVERAGE_CHAR_BUDGET: usize = 3000;

// ============================================================================
// Gathered context
// ============================================================================

/// Pipeline stage names used in shortfall records and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Metrics,
    Benchmarks,
    Verification,
    Styles,
}

impl Stage {
    /// Get the stage name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Metrics => "metrics",
            Stage::Benchmarks => "benchmarks",
            Stage::Verification => "verification",
            Stage::Styles => "styles",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lookup that produced no usable data, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageShortfall {
    pub stage: Stage,
    /// Query or metric the lookup was for.
    pub subject: String,
    pub reason: Shortfall,
}

impl StageShortfall {
    /// Create a shortfall record
    pub fn new(stage: Stage, subject: impl Into<String>, reason: Shortfall) -> Self {
        Self {
            stage,
            subject: subject.into(),
            reason,
        }
    }
}

/// State of the metric extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MetricsStatus {
    /// The brief named no metrics.
    NotRequested,
    /// Extraction was attempted but produced nothing.
    Unavailable { reason: Shortfall },
    /// The completion service answered.
    Extracted(Parsed<Vec<MetricRecord>>),
}

/// Everything learned before styles are offered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatheredContext {
    pub campaign_snippets: Vec<SourceSnippet>,
    pub metrics: MetricsStatus,
    pub benchmarks: BTreeMap<String, BenchmarkOutcome>,
    pub verification: VerificationReport,
    pub shortfalls: Vec<StageShortfall>,
}

impl Default for GatheredContext {
    fn default() -> Self {
        Self {
            campaign_snippets: Vec::new(),
            metrics: MetricsStatus::NotRequested,
            benchmarks: BTreeMap::new(),
            verification: VerificationReport::NotPerformed,
            shortfalls: Vec::new(),
        }
    }
}

impl GatheredContext {
    /// Whether any lookup fell short.
    pub fn is_incomplete(&self) -> bool {
        !self.shortfalls.is_empty()
    }

    /// Whether there is any metric content to write about.
    pub fn metrics_available(&self) -> bool {
        match &self.metrics {
            MetricsStatus::Extracted(Parsed::Parsed(records)) => !records.is_empty(),
            MetricsStatus::Extracted(Parsed::Unparsed { raw }) => !raw.trim().is_empty(),
            MetricsStatus::NotRequested | MetricsStatus::Unavailable { .. } => false,
        }
    }

    /// Decoded metric records, when extraction produced some.
    pub fn extracted_metrics(&self) -> Option<Vec<MetricRecord>> {
        match &self.metrics {
            MetricsStatus::Extracted(Parsed::Parsed(records)) if !records.is_empty() => {
                Some(records.clone())
            }
            _ => None,
        }
    }

    /// Deterministic text description of the brief and context for prompts.
    ///
    /// Every block is present; empty ones read "not available".
    pub fn describe(&self, brief: &CampaignBrief) -> String {
        let mut out = String::new();

        out.push_str(&format!("Project title: {}\n", brief.project_title.trim()));
        out.push_str(&format!("Client: {}\n", brief.client_name.trim()));
        out.push_str(&format!("Campaign: {}\n", brief.campaign_label()));
        out.push_str(&format!("Industry: {}\n", or_not_available(&brief.industry)));
        out.push_str(&format!(
            "Duration: {}\n",
            or_not_available(brief.duration.as_deref().unwrap_or_default())
        ));

        out.push_str(&format!("\nCampaign brief:\n{}\n", brief.brief_text.trim()));
        out.push_str(&format!(
            "\nKey achievements:\n{}\n",
            or_not_available(&brief.achievements_text)
        ));

        out.push_str(&format!("\nCampaign metrics:\n{}\n", self.metrics_text()));

        out.push_str("\nIndustry benchmarks:\n");
        if self.benchmarks.is_empty() {
            out.push_str(&format!("{}\n", NOT_AVAILABLE));
        } else {
            for (metric, outcome) in &self.benchmarks {
                out.push_str(&format!("- {}: {}\n", metric, outcome.prompt_text()));
            }
        }

        out.push_str(&format!(
            "\nFact verification:\n{}\n",
            self.verification
                .prompt_text()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        ));

        let coverage: Vec<String> = self
            .campaign_snippets
            .iter()
            .map(SourceSnippet::as_evidence)
            .collect();
        let coverage = truncate_chars(&coverage.join("\n"), COVERAGE_CHAR_BUDGET).0;
        out.push_str(&format!("\nPublic coverage:\n{}", or_not_available(&coverage)));

        out
    }

    fn metrics_text(&self) -> String {
        match &self.metrics {
            MetricsStatus::NotRequested => format!("{} (no metrics requested)", NOT_AVAILABLE),
            MetricsStatus::Unavailable { reason } => format!("{} ({})", NOT_AVAILABLE, reason),
            MetricsStatus::Extracted(Parsed::Parsed(records)) if records.is_empty() => {
                format!("{} (none stated in the sources)", NOT_AVAILABLE)
            }
            MetricsStatus::Extracted(parsed) => parsed.prompt_text(),
        }
    }
}

fn or_not_available(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        value.to_string()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Search query for public coverage of the campaign.
pub fn campaign_query(brief: &CampaignBrief) -> String {
    format!(
        "{} {} marketing campaign results",
        brief.client_name.trim(),
        brief.campaign_label()
    )
}

/// The full research and synthesis pipeline.
#[derive(Clone)]
pub struct CaseStudyPipeline {
    fetcher: SnippetFetcher,
    extractor: MetricExtractor,
    benchmarks: BenchmarkFetcher,
    verifier: FactVerifier,
    styles: StyleRecommender,
    composer: CaseStudyComposer,
    max_results: usize,
}

impl CaseStudyPipeline {
    /// Build every stage over one completion service and one snippet fetcher
    pub fn new(
        completion: Arc<dyn CompletionService>,
        fetcher: SnippetFetcher,
        config: &PipelineConfig,
    ) -> Self {
        let deadline = config.deadline_ms.map(Duration::from_millis);

        Self {
            extractor: MetricExtractor::new(completion.clone()),
            benchmarks: BenchmarkFetcher::new(fetcher.clone(), completion.clone(), config.max_results)
                .with_concurrency(config.benchmark_concurrency)
                .with_deadline(deadline),
            verifier: FactVerifier::new(
                fetcher.clone(),
                completion.clone(),
                config.max_results,
                config.verification_char_budget,
            )
            .with_concurrency(config.benchmark_concurrency)
            .with_deadline(deadline),
            styles: StyleRecommender::new(completion.clone(), config.style_count),
            composer: CaseStudyComposer::new(completion),
            fetcher,
            max_results: config.max_results,
        }
    }

    /// Reject an invalid brief before any external call.
    pub fn validate_brief(brief: &CampaignBrief) -> AppResult<()> {
        brief.validate()?;
        Ok(())
    }

    /// Run search, metric extraction, benchmarks and verification.
    ///
    /// With no target metrics nothing external is called and the context only
    /// reflects the brief itself.
    pub async fn gather_context(&self, brief: &CampaignBrief) -> AppResult<GatheredContext> {
        Self::validate_brief(brief)?;
        let start = Instant::now();
        let mut context = GatheredContext::default();

        let metric_names = brief.metric_names();
        if metric_names.is_empty() {
            info!(client = %brief.client_name, "No metrics requested, skipping research");
            return Ok(context);
        }

        let query = campaign_query(brief);
        let batch = self.fetcher.fetch(&query, self.max_results).await;
        if let Some(reason) = batch.shortfall {
            context
                .shortfalls
                .push(StageShortfall::new(Stage::Search, &query, reason));
        }
        context.campaign_snippets = batch.snippets;

        context.metrics = self.extract_metrics(brief, &metric_names, &context.campaign_snippets).await;
        if let MetricsStatus::Unavailable { reason } = &context.metrics {
            context
                .shortfalls
                .push(StageShortfall::new(Stage::Metrics, brief.campaign_label(), *reason));
        }

        context.benchmarks = self.benchmarks.benchmarks(&brief.industry, &metric_names).await;
        for (metric, outcome) in &context.benchmarks {
            if let Some(reason) = outcome.shortfall() {
                context
                    .shortfalls
                    .push(StageShortfall::new(Stage::Benchmarks, metric, reason));
            }
        }

        context.verification = match &context.metrics {
            MetricsStatus::Extracted(metrics) => {
                self.verifier
                    .verify(&brief.client_name, brief.campaign_label(), metrics)
                    .await
            }
            _ => VerificationReport::NotPerformed,
        };
        match &context.verification {
            VerificationReport::InsufficientEvidence { queries, reasons } => {
                for (query, reason) in queries.iter().zip(reasons) {
                    context
                        .shortfalls
                        .push(StageShortfall::new(Stage::Verification, query, *reason));
                }
            }
            VerificationReport::Unavailable { reason } => {
                context.shortfalls.push(StageShortfall::new(
                    Stage::Verification,
                    brief.campaign_label(),
                    *reason,
                ));
            }
            VerificationReport::NotPerformed | VerificationReport::Assessed { .. } => {}
        }

        if context.is_incomplete() {
            warn!(
                client = %brief.client_name,
                shortfalls = context.shortfalls.len(),
                "Context gathered with incomplete evidence"
            );
        }
        info!(
            client = %brief.client_name,
            snippets = context.campaign_snippets.len(),
            benchmarks = context.benchmarks.len(),
            verification = %context.verification.as_str(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Context gathered"
        );

        Ok(context)
    }

    async fn extract_metrics(
        &self,
        brief: &CampaignBrief,
        metric_names: &[String],
        snippets: &[SourceSnippet],
    ) -> MetricsStatus {
        let mut sources: Vec<String> = Vec::new();
        if !brief.achievements_text.trim().is_empty() {
            sources.push(brief.achievements_text.trim().to_string());
        }
        sources.extend(snippets.iter().map(SourceSnippet::as_evidence));

        if sources.is_empty() {
            return MetricsStatus::Unavailable {
                reason: Shortfall::NoResults,
            };
        }

        match self
            .extractor
            .extract(
                &sources.join("\n\n"),
                brief.client_name.trim(),
                brief.campaign_label(),
                metric_names,
            )
            .await
        {
            Ok(parsed) => MetricsStatus::Extracted(parsed),
            Err(e) => {
                warn!(
                    client = %brief.client_name,
                    error = %e,
                    reason = %Shortfall::CompletionFailed,
                    "Metric extraction failed"
                );
                MetricsStatus::Unavailable {
                    reason: Shortfall::CompletionFailed,
                }
            }
        }
    }

    /// Offer narrative styles; always includes the default option.
    pub async fn recommend_styles(
        &self,
        brief: &CampaignBrief,
        context: &GatheredContext,
    ) -> StyleRecommendation {
        self.styles.recommend(brief, context).await
    }

    /// Compose the case study in the chosen style.
    pub async fn compose(
        &self,
        brief: &CampaignBrief,
        style: &StyleOption,
        context: &GatheredContext,
    ) -> AppResult<CaseStudyDocument> {
        Self::validate_brief(brief)?;
        Ok(self.composer.compose(brief, style, context).await?)
    }

    /// Revise a document with free-text feedback.
    pub async fn revise(
        &self,
        previous: &CaseStudyDocument,
        feedback: &str,
    ) -> AppResult<CaseStudyDocument> {
        if feedback.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "feedback".to_string(),
                reason: "Feedback cannot be empty".to_string(),
            }
            .into());
        }
        Ok(self.composer.revise(previous, feedback).await?)
    }

    /// Prompt the composer would send; exposed for inspection.
    pub fn composition_prompt(
        &self,
        brief: &CampaignBrief,
        style: &StyleOption,
        context: &GatheredContext,
    ) -> String {
        self.composer.build_prompt(brief, style, context)
    }
}

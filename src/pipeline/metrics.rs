use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{parse_lenient, Parsed};
use crate::error::CompletionResult;
use crate::llm::CompletionService;
use crate::prompts::METRIC_EXTRACTION_PROMPT;

/// A metric value as stated by a source: a number when it parses as one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Whether the value carries any content.
    pub fn is_present(&self) -> bool {
        match self {
            MetricValue::Number(n) => n.is_finite(),
            MetricValue::Text(t) => !t.trim().is_empty(),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(t) => write!(f, "{}", t),
        }
    }
}

/// A before/after campaign metric extracted from source text.
///
/// The shape is advisory: every field except the name may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(alias = "metric", alias = "metric_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_value: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_value: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_change: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_quote: Option<String>,
}

impl MetricRecord {
    /// Create a record with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before_value: None,
            after_value: None,
            percent_change: None,
            unit: None,
            timeframe: None,
            evidence_quote: None,
        }
    }

    /// Set before and after values
    pub fn with_values(mut self, before: MetricValue, after: MetricValue) -> Self {
        self.before_value = Some(before);
        self.after_value = Some(after);
        self
    }

    /// Set the timeframe
    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = Some(timeframe.into());
        self
    }

    /// Before value, after value and timeframe are all present.
    pub fn is_complete(&self) -> bool {
        self.before_value.as_ref().is_some_and(MetricValue::is_present)
            && self.after_value.as_ref().is_some_and(MetricValue::is_present)
            && self
                .timeframe
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

/// Accepted reply shapes: a bare array or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum MetricsReply {
    Wrapped { metrics: Vec<MetricRecord> },
    Bare(Vec<MetricRecord>),
}

impl From<MetricsReply> for Vec<MetricRecord> {
    fn from(reply: MetricsReply) -> Self {
        match reply {
            MetricsReply::Wrapped { metrics } | MetricsReply::Bare(metrics) => metrics,
        }
    }
}

/// Decode a metric-extraction reply.
pub fn parse_metrics(completion: &str) -> Parsed<Vec<MetricRecord>> {
    parse_lenient::<MetricsReply>(completion, "metric_extraction").map(Vec::from)
}

/// Asks the completion service for before/after metrics found in source text.
#[derive(Clone)]
pub struct MetricExtractor {
    completion: Arc<dyn CompletionService>,
}

impl MetricExtractor {
    /// Create a new metric extractor
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// Extract metrics for `client`/`campaign` from `snippet_text`.
    ///
    /// Completion failures are returned; a reply that does not decode is kept
    /// as [`Parsed::Unparsed`].
    pub async fn extract(
        &self,
        snippet_text: &str,
        client: &str,
        campaign: &str,
        metric_names: &[String],
    ) -> CompletionResult<Parsed<Vec<MetricRecord>>> {
        let start = Instant::now();
        let prompt = build_extraction_prompt(snippet_text, client, campaign, metric_names);

        let completion = match self.completion.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    stage = "metrics",
                    error = %e,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Metric extraction failed"
                );
                return Err(e);
            }
        };

        let parsed = parse_metrics(&completion);
        info!(
            stage = "metrics",
            parsed = parsed.is_parsed(),
            records = parsed.as_parsed().map(Vec::len).unwrap_or(0),
            latency_ms = start.elapsed().as_millis() as u64,
            "Metric extraction completed"
        );

        Ok(parsed)
    }
}

fn build_extraction_prompt(
    snippet_text: &str,
    client: &str,
    campaign: &str,
    metric_names: &[String],
) -> String {
    let focus = if metric_names.is_empty() {
        "any".to_string()
    } else {
        metric_names.join(", ")
    };

    format!(
        "{}\n\nClient: {}\nCampaign: {}\nMetrics of interest: {}\n\nSource text:\n{}",
        METRIC_EXTRACTION_PROMPT, client, campaign, focus, snippet_text
    )
}

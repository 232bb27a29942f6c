use futures::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{parse_lenient, MetricRecord, Parsed};
use crate::llm::CompletionService;
use crate::prompts::FACT_VERIFICATION_PROMPT;
use crate::search::{truncate_chars, Shortfall, SnippetBatch, SnippetFetcher};

/// Provenance-seeking query templates; `{client}` and `{campaign}` are filled in.
const VERIFICATION_QUERIES: [&str; 4] = [
    "{client} {campaign} press release",
    "{client} {campaign} agency case study",
    "{client} annual report {campaign} results",
    "{client} {campaign} ROI statistics",
];

/// Confidence attached to a credibility judgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Get the level as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConfidenceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ConfidenceLevel::Low),
            "medium" | "moderate" => Ok(ConfidenceLevel::Medium),
            "high" => Ok(ConfidenceLevel::High),
            _ => Err(format!("Unknown confidence level: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for ConfidenceLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|r| r.parse().ok()).unwrap_or_default())
    }
}

/// Accepts any JSON number or numeric string and clamps it to 0..=100.
fn deserialize_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Number(f64),
        Text(String),
    }

    let value = match Option::<Score>::deserialize(deserializer)? {
        Some(Score::Number(n)) => n,
        Some(Score::Text(t)) => t.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        None => 0.0,
    };
    Ok(clamp_score(value))
}

/// Round and clamp a raw score into 0..=100.
pub fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Credibility judgment for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    #[serde(alias = "metric", alias = "name")]
    pub metric_name: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, deserialize_with = "deserialize_score")]
    pub credibility_score: u8,
    #[serde(default)]
    pub confidence_level: ConfidenceLevel,
    #[serde(default)]
    pub supporting_evidence: String,
    #[serde(default)]
    pub contradicting_evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_adjustment: Option<String>,
}

/// Document-level verification judgment.
///
/// `metrics` is required so that a reply in some other shape stays
/// [`Parsed::Unparsed`] with its text intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationAssessment {
    #[serde(alias = "verifications")]
    pub metrics: Vec<VerificationRecord>,
    #[serde(default)]
    pub overall_reliability: String,
    #[serde(default)]
    pub potential_biases: Vec<String>,
    #[serde(default)]
    pub missing_context: Vec<String>,
}

/// What the fact verifier concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationReport {
    /// No metrics to verify.
    NotPerformed,
    /// Every provenance query came back empty; no score is given.
    InsufficientEvidence {
        queries: Vec<String>,
        reasons: Vec<Shortfall>,
    },
    /// Evidence was gathered but the completion service failed.
    Unavailable { reason: Shortfall },
    /// The completion service judged the metrics against the evidence.
    Assessed {
        assessment: Parsed<VerificationAssessment>,
        sources_considered: usize,
        truncated: bool,
    },
}

impl VerificationReport {
    /// Short status label.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationReport::NotPerformed => "not_performed",
            VerificationReport::InsufficientEvidence { .. } => "insufficient_evidence",
            VerificationReport::Unavailable { .. } => "unavailable",
            VerificationReport::Assessed { .. } => "assessed",
        }
    }

    /// Text form for embedding in a later prompt.
    pub fn prompt_text(&self) -> Option<String> {
        match self {
            VerificationReport::NotPerformed => None,
            VerificationReport::InsufficientEvidence { .. } => Some(
                "insufficient evidence: no public sources were found to check these metrics"
                    .to_string(),
            ),
            VerificationReport::Unavailable { reason } => {
                Some(format!("verification unavailable ({})", reason))
            }
            VerificationReport::Assessed { assessment, .. } => Some(assessment.prompt_text()),
        }
    }
}

/// Fill the provenance query templates for a client and campaign.
pub fn verification_queries(client: &str, campaign: &str) -> Vec<String> {
    VERIFICATION_QUERIES
        .iter()
        .map(|template| {
            template
                .replace("{client}", client.trim())
                .replace("{campaign}", campaign.trim())
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Evidence text built from several snippet batches.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub text: String,
    pub sources: usize,
    pub truncated: bool,
}

/// Join every snippet as a provenance-prefixed block, truncated to `char_budget`.
pub fn aggregate_evidence(batches: &[SnippetBatch], char_budget: usize) -> Evidence {
    let blocks: Vec<String> = batches
        .iter()
        .flat_map(|batch| batch.snippets.iter().map(|s| s.as_evidence()))
        .collect();
    let (text, truncated) = truncate_chars(&blocks.join("\n\n"), char_budget);

    Evidence {
        text,
        sources: blocks.len(),
        truncated,
    }
}

/// Cross-checks extracted metrics against public sources.
#[derive(Clone)]
pub struct FactVerifier {
    fetcher: SnippetFetcher,
    completion: Arc<dyn CompletionService>,
    max_results: usize,
    char_budget: usize,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl FactVerifier {
    /// Create a new fact verifier
    pub fn new(
        fetcher: SnippetFetcher,
        completion: Arc<dyn CompletionService>,
        max_results: usize,
        char_budget: usize,
    ) -> Self {
        Self {
            fetcher,
            completion,
            max_results,
            char_budget,
            concurrency: 1,
            deadline: None,
        }
    }

    /// Allow up to `concurrency` provenance queries in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Bound the provenance queries by `deadline`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Verify `metrics` for `client`/`campaign`.
    ///
    /// Never fails: missing evidence and completion failures come back as
    /// report variants.
    pub async fn verify(
        &self,
        client: &str,
        campaign: &str,
        metrics: &Parsed<Vec<MetricRecord>>,
    ) -> VerificationReport {
        let start = Instant::now();
        let queries = verification_queries(client, campaign);
        let batches = self.gather(&queries, start).await;

        let evidence = aggregate_evidence(&batches, self.char_budget);
        if evidence.sources == 0 {
            let reasons = batches
                .iter()
                .map(|b| b.shortfall.unwrap_or(Shortfall::NoResults))
                .collect();
            warn!(
                stage = "verification",
                client = %client,
                "No provenance evidence found for any query"
            );
            return VerificationReport::InsufficientEvidence { queries, reasons };
        }

        let prompt = format!(
            "{}\n\nClient: {}\nCampaign: {}\n\nClaimed metrics:\n{}\n\nSource evidence:\n{}",
            FACT_VERIFICATION_PROMPT,
            client,
            campaign,
            metrics.prompt_text(),
            evidence.text
        );

        match self.completion.generate(&prompt).await {
            Ok(completion) => {
                let assessment =
                    parse_lenient::<VerificationAssessment>(&completion, "fact_verification");
                info!(
                    stage = "verification",
                    sources = evidence.sources,
                    truncated = evidence.truncated,
                    parsed = assessment.is_parsed(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Fact verification completed"
                );
                VerificationReport::Assessed {
                    assessment,
                    sources_considered: evidence.sources,
                    truncated: evidence.truncated,
                }
            }
            Err(e) => {
                warn!(stage = "verification", error = %e, "Fact verification failed");
                VerificationReport::Unavailable {
                    reason: Shortfall::CompletionFailed,
                }
            }
        }
    }

    async fn gather(&self, queries: &[String], start: Instant) -> Vec<SnippetBatch> {
        let deadline = self.deadline.map(|d| start + d);

        stream::iter(queries)
            .map(|query| async move {
                match deadline {
                    Some(at) => tokio::time::timeout_at(at, self.fetcher.fetch(query, self.max_results))
                        .await
                        .unwrap_or_else(|_| {
                            SnippetBatch::empty(query.as_str(), Shortfall::DeadlineExceeded, 0)
                        }),
                    None => self.fetcher.fetch(query, self.max_results).await,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::error::{CompletionError, SearchError};
    use crate::llm::MockCompletionService;
    use crate::rate_limit::TokenBucket;
    use crate::search::{MockSearchProvider, SourceSnippet};

    fn fetcher(search: MockSearchProvider) -> SnippetFetcher {
        SnippetFetcher::new(
            Arc::new(search),
            Arc::new(TokenBucket::unlimited("search")),
            RequestConfig {
                timeout_ms: 1000,
                max_retries: 0,
                retry_delay_ms: 1,
                retry_jitter_ms: 0,
            },
        )
    }

    fn metrics() -> Parsed<Vec<MetricRecord>> {
        Parsed::Parsed(vec![MetricRecord::new("Sales")])
    }

    fn snippet(title: &str, text: &str) -> SourceSnippet {
        SourceSnippet {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            published_date: Some("2024-01-01".to_string()),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_queries_cover_four_provenance_kinds() {
        let queries = verification_queries("Acme", "Spring Push");
        assert_eq!(
            queries,
            vec![
                "Acme Spring Push press release",
                "Acme Spring Push agency case study",
                "Acme annual report Spring Push results",
                "Acme Spring Push ROI statistics",
            ]
        );
    }

    #[test]
    fn test_scores_are_clamped() {
        let record: VerificationRecord = serde_json::from_str(
            r#"{"metric_name": "Sales", "verified": true, "credibility_score": 140, "confidence_level": "HIGH"}"#,
        )
        .unwrap();
        assert_eq!(record.credibility_score, 100);
        assert_eq!(record.confidence_level, ConfidenceLevel::High);

        let record: VerificationRecord = serde_json::from_str(
            r#"{"name": "Sales", "credibility_score": "-5", "confidence_level": null}"#,
        )
        .unwrap();
        assert_eq!(record.credibility_score, 0);
        assert!(!record.verified);

        let record: VerificationRecord =
            serde_json::from_str(r#"{"metric": "Sales", "credibility_score": "72.6%", "confidence_level": "unsure"}"#)
                .unwrap();
        assert_eq!(record.credibility_score, 73);
        assert_eq!(record.confidence_level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_assessment_in_another_shape_keeps_raw_text() {
        let reply = r#"{"verification_results": [{"claim": "Sales +50%", "score": 20}], "summary": "weak"}"#;
        let parsed = parse_lenient::<VerificationAssessment>(reply, "fact_verification");

        assert!(!parsed.is_parsed());
        assert_eq!(parsed.prompt_text(), reply);

        let aliased = parse_lenient::<VerificationAssessment>(
            r#"{"verifications": [{"metric_name": "Sales", "credibility_score": 40}]}"#,
            "fact_verification",
        );
        assert_eq!(aliased.as_parsed().unwrap().metrics[0].credibility_score, 40);
    }

    #[test]
    fn test_aggregate_evidence_truncates() {
        let batches = vec![
            SnippetBatch {
                query: "q1".to_string(),
                snippets: vec![snippet("a", "first")],
                shortfall: None,
                attempts: 1,
            },
            SnippetBatch::empty("q2", Shortfall::NoResults, 1),
            SnippetBatch {
                query: "q3".to_string(),
                snippets: vec![snippet("b", "second")],
                shortfall: None,
                attempts: 1,
            },
        ];

        let full = aggregate_evidence(&batches, 10_000);
        assert_eq!(full.sources, 2);
        assert!(!full.truncated);
        assert!(full.text.contains("a (https://example.com/a, 2024-01-01): first"));
        assert!(full.text.contains("\n\nb ("));

        let cut = aggregate_evidence(&batches, 20);
        assert!(cut.truncated);
        assert_eq!(cut.text.chars().count(), 20);
    }

    #[tokio::test]
    async fn test_zero_results_is_insufficient_evidence() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search.expect_search().times(4).returning(|_, _| Ok(Vec::new()));

        let mut completion = MockCompletionService::new();
        completion.expect_generate().never();

        let verifier = FactVerifier::new(fetcher(search), Arc::new(completion), 3, 4000);
        let report = verifier.verify("Acme", "Spring", &metrics()).await;

        match report {
            VerificationReport::InsufficientEvidence { queries, reasons } => {
                assert_eq!(queries.len(), 4);
                assert!(reasons.iter().all(|r| *r == Shortfall::NoResults));
            }
            other => panic!("expected insufficient evidence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failures_are_insufficient_evidence() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search
            .expect_search()
            .returning(|_, _| Err(SearchError::Timeout { timeout_ms: 10 }));

        let verifier = FactVerifier::new(
            fetcher(search),
            Arc::new(MockCompletionService::new()),
            3,
            4000,
        );
        let report = verifier.verify("Acme", "Spring", &metrics()).await;
        assert_eq!(report.as_str(), "insufficient_evidence");
    }

    #[tokio::test]
    async fn test_assessed_with_evidence() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search.expect_search().returning(|query, _| {
            if query.contains("press release") {
                Ok(vec![snippet("press", "Acme sales rose 20%")])
            } else {
                Ok(Vec::new())
            }
        });

        let mut completion = MockCompletionService::new();
        completion
            .expect_generate()
            .withf(|prompt| prompt.contains("Acme sales rose 20%") && prompt.contains("\"Sales\""))
            .times(1)
            .returning(|_| {
                Ok(r#"{"metrics": [{"metric_name": "Sales", "verified": true, "credibility_score": 85, "confidence_level": "high"}], "overall_reliability": "good"}"#.to_string())
            });

        let verifier = FactVerifier::new(fetcher(search), Arc::new(completion), 3, 4000);
        match verifier.verify("Acme", "Spring", &metrics()).await {
            VerificationReport::Assessed {
                assessment,
                sources_considered,
                truncated,
            } => {
                assert_eq!(sources_considered, 1);
                assert!(!truncated);
                let assessment = assessment.as_parsed().unwrap();
                assert_eq!(assessment.metrics[0].credibility_score, 85);
                assert_eq!(assessment.overall_reliability, "good");
            }
            other => panic!("expected assessment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completion_failure_is_unavailable() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search
            .expect_search()
            .returning(|_, _| Ok(vec![snippet("x", "evidence")]));

        let mut completion = MockCompletionService::new();
        completion
            .expect_generate()
            .returning(|_| Err(CompletionError::Timeout { timeout_ms: 5 }));

        let verifier = FactVerifier::new(fetcher(search), Arc::new(completion), 3, 4000)
            .with_concurrency(4);
        assert_eq!(
            verifier.verify("Acme", "Spring", &metrics()).await,
            VerificationReport::Unavailable {
                reason: Shortfall::CompletionFailed
            }
        );
    }

    #[test]
    fn test_report_serialization_is_tagged() {
        let report = VerificationReport::InsufficientEvidence {
            queries: vec!["q".to_string()],
            reasons: vec![Shortfall::Timeout],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "insufficient_evidence");
        assert_eq!(value["reasons"][0], "timeout");
    }
}

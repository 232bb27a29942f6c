use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{parse_lenient, MetricValue, Parsed};
use crate::llm::CompletionService;
use crate::prompts::BENCHMARK_PROMPT;
use crate::search::{Shortfall, SnippetFetcher};

/// Industry benchmark for one metric. Every value is advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    #[serde(alias = "metric", alias = "name")]
    pub metric_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_performer_value: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_min: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_max: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<MetricValue>,
}

/// What the benchmark lookup produced for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum BenchmarkOutcome {
    /// Evidence was found and summarized.
    Found(Parsed<BenchmarkRecord>),
    /// Nothing usable; `reason` says why.
    NoData { reason: Shortfall },
}

impl BenchmarkOutcome {
    /// The shortfall reason, when there is no data.
    pub fn shortfall(&self) -> Option<Shortfall> {
        match self {
            BenchmarkOutcome::Found(_) => None,
            BenchmarkOutcome::NoData { reason } => Some(*reason),
        }
    }

    /// Text form for embedding in a later prompt.
    pub fn prompt_text(&self) -> String {
        match self {
            BenchmarkOutcome::Found(parsed) => parsed.prompt_text(),
            BenchmarkOutcome::NoData { reason } => format!("no data ({})", reason),
        }
    }
}

/// Search query for a metric's industry benchmark.
pub fn benchmark_query(industry: &str, metric: &str) -> String {
    let industry = industry.trim();
    if industry.is_empty() {
        format!("marketing campaign benchmark average {}", metric)
    } else {
        format!("{} industry benchmark average {} marketing campaign", industry, metric)
    }
}

/// Looks up an industry benchmark per metric.
///
/// Lookups run one at a time unless a concurrency cap above one is set. With
/// a deadline, lookups still running when it expires yield
/// [`Shortfall::DeadlineExceeded`]. Output is keyed, and so ordered, by metric
/// name either way.
#[derive(Clone)]
pub struct BenchmarkFetcher {
    fetcher: SnippetFetcher,
    completion: Arc<dyn CompletionService>,
    max_results: usize,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl BenchmarkFetcher {
    /// Create a new benchmark fetcher
    pub fn new(
        fetcher: SnippetFetcher,
        completion: Arc<dyn CompletionService>,
        max_results: usize,
    ) -> Self {
        Self {
            fetcher,
            completion,
            max_results,
            concurrency: 1,
            deadline: None,
        }
    }

    /// Allow up to `concurrency` lookups in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Bound the whole fan-out by `deadline`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Benchmark every metric in `metric_names`; duplicates collapse.
    pub async fn benchmarks(
        &self,
        industry: &str,
        metric_names: &[String],
    ) -> BTreeMap<String, BenchmarkOutcome> {
        let start = Instant::now();
        let deadline = self.deadline.map(|d| start + d);
        let names: BTreeSet<&str> = metric_names.iter().map(String::as_str).collect();

        let results: Vec<(String, BenchmarkOutcome)> = stream::iter(names)
            .map(|name| async move {
                let outcome = match deadline {
                    Some(at) => tokio::time::timeout_at(at, self.benchmark_one(industry, name))
                        .await
                        .unwrap_or_else(|_| {
                            warn!(stage = "benchmarks", metric = %name, "Benchmark lookup hit the deadline");
                            BenchmarkOutcome::NoData {
                                reason: Shortfall::DeadlineExceeded,
                            }
                        }),
                    None => self.benchmark_one(industry, name).await,
                };
                (name.to_string(), outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let found = results
            .iter()
            .filter(|(_, o)| matches!(o, BenchmarkOutcome::Found(_)))
            .count();
        info!(
            stage = "benchmarks",
            metrics = results.len(),
            found,
            latency_ms = start.elapsed().as_millis() as u64,
            "Benchmark lookups completed"
        );

        results.into_iter().collect()
    }

    async fn benchmark_one(&self, industry: &str, metric: &str) -> BenchmarkOutcome {
        let query = benchmark_query(industry, metric);
        let batch = self.fetcher.fetch(&query, self.max_results).await;

        if batch.is_empty() {
            let reason = batch.shortfall.unwrap_or(Shortfall::NoResults);
            debug!(metric = %metric, reason = %reason, "No benchmark evidence, skipping completion");
            return BenchmarkOutcome::NoData { reason };
        }

        let prompt = format!(
            "{}\n\nIndustry: {}\nMetric: {}\n\nSearch excerpts:\n{}",
            BENCHMARK_PROMPT,
            industry,
            metric,
            batch.joined_text()
        );

        match self.completion.generate(&prompt).await {
            Ok(completion) => BenchmarkOutcome::Found(
                parse_lenient::<BenchmarkRecord>(&completion, "benchmark"),
            ),
            Err(e) => {
                warn!(stage = "benchmarks", metric = %metric, error = %e, "Benchmark summary failed");
                BenchmarkOutcome::NoData {
                    reason: Shortfall::CompletionFailed,
                }
            }
        }
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

    fn snippet(text: &str) -> SourceSnippet {
        SourceSnippet {
            title: "Report".to_string(),
            url: "https://example.com/report".to_string(),
            published_date: None,
            text: text.to_string(),
        }
    }

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

    #[test]
    fn test_benchmark_query() {
        assert_eq!(
            benchmark_query("Retail", "CTR"),
            "Retail industry benchmark average CTR marketing campaign"
        );
        assert_eq!(
            benchmark_query(" ", "CTR"),
            "marketing campaign benchmark average CTR"
        );
    }

    #[test]
    fn test_record_accepts_mixed_values() {
        let record: BenchmarkRecord = serde_json::from_str(
            r#"{"metric_name": "CTR", "average": "2.1%", "range_min": 0.5, "year": 2024}"#,
        )
        .unwrap();
        assert_eq!(record.average, Some(MetricValue::Text("2.1%".to_string())));
        assert_eq!(record.year, Some(MetricValue::Number(2024.0)));
        assert!(record.source.is_none());
    }

    #[tokio::test]
    async fn test_no_snippets_skips_completion() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search.expect_search().returning(|_, _| Ok(Vec::new()));

        let mut completion = MockCompletionService::new();
        completion.expect_generate().never();

        let benchmarks = BenchmarkFetcher::new(fetcher(search), Arc::new(completion), 3)
            .benchmarks("Retail", &["CTR".to_string()])
            .await;

        assert_eq!(
            benchmarks["CTR"],
            BenchmarkOutcome::NoData {
                reason: Shortfall::NoResults
            }
        );
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_block_other_metrics() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search.expect_search().returning(|query, _| {
            if query.contains("ROI") {
                Err(SearchError::Timeout { timeout_ms: 10 })
            } else {
                Ok(vec![snippet("Average CTR is 2%")])
            }
        });

        let mut completion = MockCompletionService::new();
        completion
            .expect_generate()
            .times(1)
            .returning(|_| Ok(r#"{"metric_name": "CTR", "average": "2%"}"#.to_string()));

        let benchmarks = BenchmarkFetcher::new(fetcher(search), Arc::new(completion), 3)
            .benchmarks("Retail", &["ROI".to_string(), "CTR".to_string()])
            .await;

        let keys: Vec<_> = benchmarks.keys().cloned().collect();
        assert_eq!(keys, vec!["CTR".to_string(), "ROI".to_string()]);
        assert!(matches!(benchmarks["CTR"], BenchmarkOutcome::Found(Parsed::Parsed(_))));
        assert_eq!(benchmarks["ROI"].shortfall(), Some(Shortfall::Timeout));
    }

    #[tokio::test]
    async fn test_completion_failure_is_no_data() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search
            .expect_search()
            .returning(|_, _| Ok(vec![snippet("Average ROI is 3x")]));

        let mut completion = MockCompletionService::new();
        completion.expect_generate().returning(|_| {
            Err(CompletionError::Api {
                status: 500,
                message: "down".to_string(),
            })
        });

        let benchmarks = BenchmarkFetcher::new(fetcher(search), Arc::new(completion), 3)
            .benchmarks("", &["ROI".to_string()])
            .await;
        assert_eq!(benchmarks["ROI"].shortfall(), Some(Shortfall::CompletionFailed));
    }

    #[tokio::test]
    async fn test_concurrent_lookups_keep_name_order() {
        let mut search = MockSearchProvider::new();
        search.expect_name().return_const("mock".to_string());
        search
            .expect_search()
            .times(3)
            .returning(|q, _| Ok(vec![snippet(q)]));

        let mut completion = MockCompletionService::new();
        completion
            .expect_generate()
            .times(3)
            .returning(|_| Ok("Benchmarks vary widely.".to_string()));

        let names = vec!["Reach".to_string(), "CTR".to_string(), "ROI".to_string()];
        let benchmarks = BenchmarkFetcher::new(fetcher(search), Arc::new(completion), 3)
            .with_concurrency(3)
            .benchmarks("Retail", &names)
            .await;

        let keys: Vec<_> = benchmarks.keys().cloned().collect();
        assert_eq!(keys, vec!["CTR", "ROI", "Reach"]);
        assert!(benchmarks
            .values()
            .all(|o| matches!(o, BenchmarkOutcome::Found(Parsed::Unparsed { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_slow_lookups() {
        struct SlowSearch;

        #[async_trait::async_trait]
        impl crate::search::SearchProvider for SlowSearch {
            async fn search(
                &self,
                _query: &str,
                _max_results: usize,
            ) -> crate::error::SearchResult<Vec<SourceSnippet>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }

            fn name(&self) -> String {
                "slow".to_string()
            }
        }

        let fetcher = SnippetFetcher::new(
            Arc::new(SlowSearch),
            Arc::new(TokenBucket::unlimited("search")),
            RequestConfig::default(),
        );
        let mut completion = MockCompletionService::new();
        completion.expect_generate().never();

        let benchmarks = BenchmarkFetcher::new(fetcher, Arc::new(completion), 3)
            .with_concurrency(2)
            .with_deadline(Some(Duration::from_secs(1)))
            .benchmarks("Retail", &["CTR".to_string(), "ROI".to_string()])
            .await;

        assert!(benchmarks
            .values()
            .all(|o| o.shortfall() == Some(Shortfall::DeadlineExceeded)));
    }
}

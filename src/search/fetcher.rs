use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{SearchProvider, Shortfall, SourceSnippet};
use crate::config::RequestConfig;
use crate::rate_limit::{backoff_delay, TokenBucket};

/// Outcome of one snippet lookup. Always defined, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetBatch {
    /// The query that was issued.
    pub query: String,
    /// Snippets in provider order; duplicates across queries are tolerated.
    pub snippets: Vec<SourceSnippet>,
    /// Why the batch is empty, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Shortfall>,
    /// Number of provider calls made.
    pub attempts: u32,
}

impl SnippetBatch {
    /// An empty batch tagged with its reason.
    pub fn empty(query: impl Into<String>, shortfall: Shortfall, attempts: u32) -> Self {
        Self {
            query: query.into(),
            snippets: Vec::new(),
            shortfall: Some(shortfall),
            attempts,
        }
    }

    /// Whether the batch carries no snippets.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Snippet text joined for prompt embedding.
    pub fn joined_text(&self) -> String {
        self.snippets
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Rate-limited, retrying wrapper around a [`SearchProvider`].
#[derive(Clone)]
pub struct SnippetFetcher {
    provider: Arc<dyn SearchProvider>,
    limiter: Arc<TokenBucket>,
    request_config: RequestConfig,
}

impl SnippetFetcher {
    /// Create a fetcher sharing `limiter` with every other caller of `provider`
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        limiter: Arc<TokenBucket>,
        request_config: RequestConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            request_config,
        }
    }

    /// Fetch up to `max_results` snippets for `query`.
    ///
    /// Transient failures are retried with jittered backoff; exhausted retries
    /// and permanent failures produce an empty batch carrying the reason.
    pub async fn fetch(&self, query: &str, max_results: usize) -> SnippetBatch {
        let provider = self.provider.name();
        let mut attempts = 0;

        loop {
            if attempts > 0 {
                let delay = backoff_delay(&self.request_config, attempts);
                warn!(
                    provider = %provider,
                    query = %query,
                    retry = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying search request"
                );
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;
            let start = Instant::now();
            attempts += 1;

            match self.provider.search(query, max_results).await {
                Ok(snippets) if snippets.is_empty() => {
                    info!(provider = %provider, query = %query, "Search returned no results");
                    return SnippetBatch::empty(query, Shortfall::NoResults, attempts);
                }
                Ok(mut snippets) => {
                    snippets.truncate(max_results);
                    info!(
                        provider = %provider,
                        query = %query,
                        results = snippets.len(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Search succeeded"
                    );
                    return SnippetBatch {
                        query: query.to_string(),
                        snippets,
                        shortfall: None,
                        attempts,
                    };
                }
                Err(e) => {
                    let shortfall = Shortfall::from(&e);
                    warn!(
                        provider = %provider,
                        query = %query,
                        error = %e,
                        reason = %shortfall,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Search failed"
                    );

                    if !shortfall.is_transient() || attempts > self.request_config.max_retries {
                        return SnippetBatch::empty(query, shortfall, attempts);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::search::MockSearchProvider;

    fn request_config(max_retries: u32) -> RequestConfig {
        RequestConfig {
            timeout_ms: 1000,
            max_retries,
            retry_delay_ms: 1,
            retry_jitter_ms: 0,
        }
    }

    fn snippet(text: &str) -> SourceSnippet {
        SourceSnippet {
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            published_date: None,
            text: text.to_string(),
        }
    }

    fn fetcher(mock: MockSearchProvider, max_retries: u32) -> SnippetFetcher {
        SnippetFetcher::new(
            Arc::new(mock),
            Arc::new(TokenBucket::unlimited("search")),
            request_config(max_retries),
        )
    }

    #[tokio::test]
    async fn test_fetch_returns_snippets() {
        let mut mock = MockSearchProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_search()
            .times(1)
            .returning(|_, _| Ok(vec![snippet("a"), snippet("b"), snippet("c")]));

        let batch = fetcher(mock, 2).fetch("acme results", 2).await;
        assert_eq!(batch.snippets.len(), 2);
        assert!(batch.shortfall.is_none());
        assert_eq!(batch.attempts, 1);
        assert_eq!(batch.joined_text(), "a\nb");
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried_then_empty() {
        let mut mock = MockSearchProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_search()
            .times(3)
            .returning(|_, _| Err(SearchError::Timeout { timeout_ms: 10 }));

        let batch = fetcher(mock, 2).fetch("acme", 5).await;
        assert!(batch.is_empty());
        assert_eq!(batch.shortfall, Some(Shortfall::Timeout));
        assert_eq!(batch.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut mock = MockSearchProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_search().times(1).returning(|_, _| {
            Err(SearchError::Api {
                status: 403,
                message: "forbidden".to_string(),
            })
        });

        let batch = fetcher(mock, 3).fetch("acme", 5).await;
        assert_eq!(batch.shortfall, Some(Shortfall::Rejected));
        assert_eq!(batch.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let mut mock = MockSearchProvider::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(SearchError::Timeout { timeout_ms: 10 }));
        mock.expect_search()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![snippet("recovered")]));

        let batch = fetcher(mock, 2).fetch("acme", 5).await;
        assert_eq!(batch.snippets[0].text, "recovered");
        assert_eq!(batch.attempts, 2);
    }

    #[tokio::test]
    async fn test_empty_result_is_no_results() {
        let mut mock = MockSearchProvider::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_search().times(1).returning(|_, _| Ok(Vec::new()));

        let batch = fetcher(mock, 2).fetch("obscure", 5).await;
        assert_eq!(batch.shortfall, Some(Shortfall::NoResults));
    }
}

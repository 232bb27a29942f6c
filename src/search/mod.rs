//! Web search and page scraping.
//!
//! Providers implement [`SearchProvider`] and return raw results or a
//! [`SearchError`]. The [`SnippetFetcher`] wraps a provider with rate limiting
//! and bounded retries and never fails: exhausted lookups come back as an empty
//! [`SnippetBatch`] tagged with a [`Shortfall`] reason code.

mod custom_search;
mod fetcher;
mod page;
mod serper;

pub use custom_search::*;
pub use fetcher::*;
pub use page::*;
pub use serper::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{SearchConfig, SearchProviderKind};
use crate::error::{SearchError, SearchResult};

/// A short text excerpt with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnippet {
    /// Page or article title.
    pub title: String,
    /// Source link.
    pub url: String,
    /// Publication date as reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    /// Excerpt text.
    pub text: String,
}

impl SourceSnippet {
    /// Render as a provenance-prefixed evidence block.
    pub fn as_evidence(&self) -> String {
        match &self.published_date {
            Some(date) => format!("{} ({}, {}): {}", self.title, self.url, date, self.text),
            None => format!("{} ({}): {}", self.title, self.url, self.text),
        }
    }
}

/// Why a lookup produced no usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shortfall {
    /// The call succeeded but returned nothing.
    NoResults,
    /// The call timed out.
    Timeout,
    /// Connection or protocol failure.
    Transport,
    /// The provider answered with an error status.
    Rejected,
    /// The provider's reply could not be decoded.
    Malformed,
    /// No provider is configured.
    NotConfigured,
    /// The completion service failed.
    CompletionFailed,
    /// The aggregate pipeline deadline expired first.
    DeadlineExceeded,
}

impl Shortfall {
    /// Get the reason code as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Shortfall::NoResults => "no_results",
            Shortfall::Timeout => "timeout",
            Shortfall::Transport => "transport",
            Shortfall::Rejected => "rejected",
            Shortfall::Malformed => "malformed",
            Shortfall::NotConfigured => "not_configured",
            Shortfall::CompletionFailed => "completion_failed",
            Shortfall::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Shortfall::Timeout | Shortfall::Transport)
    }
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&SearchError> for Shortfall {
    fn from(err: &SearchError) -> Self {
        match err {
            SearchError::NotConfigured { .. } => Shortfall::NotConfigured,
            SearchError::Api { status: 429, .. } => Shortfall::Transport,
            SearchError::Api { status, .. } if *status >= 500 => Shortfall::Transport,
            SearchError::Api { .. } => Shortfall::Rejected,
            SearchError::InvalidResponse { .. } => Shortfall::Malformed,
            SearchError::Timeout { .. } => Shortfall::Timeout,
            SearchError::Http(e) if e.is_timeout() => Shortfall::Timeout,
            SearchError::Http(e) if e.is_decode() => Shortfall::Malformed,
            SearchError::Http(_) => Shortfall::Transport,
        }
    }
}

/// Query → snippet search backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query and return at most `max_results` snippets.
    async fn search(&self, query: &str, max_results: usize) -> SearchResult<Vec<SourceSnippet>>;

    /// Provider name used for logging.
    fn name(&self) -> String;
}

/// Provider used when search is switched off.
#[derive(Debug, Clone, Default)]
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> SearchResult<Vec<SourceSnippet>> {
        Err(SearchError::NotConfigured {
            provider: "none".to_string(),
        })
    }

    fn name(&self) -> String {
        "none".to_string()
    }
}

/// Build the configured search provider.
///
/// A provider selected without its credentials degrades to [`DisabledSearch`]
/// so every lookup reports `not_configured` instead of failing startup.
pub fn build_provider(config: &SearchConfig) -> SearchResult<Arc<dyn SearchProvider>> {
    match config.provider {
        SearchProviderKind::Serper => match &config.serper_api_key {
            Some(key) => Ok(Arc::new(SerperClient::new(
                &config.serper_base_url,
                key,
                config.timeout_ms,
            )?)),
            None => {
                tracing::warn!("SERPER_API_KEY not set, web search disabled");
                Ok(Arc::new(DisabledSearch))
            }
        },
        SearchProviderKind::CustomSearch => {
            match (&config.custom_search_api_key, &config.custom_search_engine_id) {
                (Some(key), Some(cx)) => {
                    let scraper = PageScraper::new(config.timeout_ms, config.scrape_char_budget)?;
                    Ok(Arc::new(CustomSearchClient::new(
                        &config.custom_search_base_url,
                        key,
                        cx,
                        config.timeout_ms,
                        scraper,
                    )?))
                }
                _ => {
                    tracing::warn!("GOOGLE_CSE_API_KEY/GOOGLE_CSE_ID not set, web search disabled");
                    Ok(Arc::new(DisabledSearch))
                }
            }
        }
        SearchProviderKind::Disabled => Ok(Arc::new(DisabledSearch)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_as_str() {
        assert_eq!(Shortfall::NoResults.as_str(), "no_results");
        assert_eq!(Shortfall::CompletionFailed.as_str(), "completion_failed");
        assert_eq!(format!("{}", Shortfall::DeadlineExceeded), "deadline_exceeded");
    }

    #[test]
    fn test_shortfall_serializes_snake_case() {
        let json = serde_json::to_string(&Shortfall::NotConfigured).unwrap();
        assert_eq!(json, "\"not_configured\"");
    }

    #[test]
    fn test_shortfall_from_search_error() {
        let cases = [
            (
                SearchError::NotConfigured {
                    provider: "serper".to_string(),
                },
                Shortfall::NotConfigured,
            ),
            (
                SearchError::Api {
                    status: 403,
                    message: String::new(),
                },
                Shortfall::Rejected,
            ),
            (
                SearchError::Api {
                    status: 502,
                    message: String::new(),
                },
                Shortfall::Transport,
            ),
            (
                SearchError::InvalidResponse {
                    message: String::new(),
                },
                Shortfall::Malformed,
            ),
            (SearchError::Timeout { timeout_ms: 10 }, Shortfall::Timeout),
        ];

        for (err, expected) in cases {
            assert_eq!(Shortfall::from(&err), expected, "{}", err);
        }
    }

    #[test]
    fn test_snippet_evidence_includes_provenance() {
        let snippet = SourceSnippet {
            title: "Acme lifts sales".to_string(),
            url: "https://news.example/acme".to_string(),
            published_date: Some("2024-03-01".to_string()),
            text: "Sales rose 20%.".to_string(),
        };
        assert_eq!(
            snippet.as_evidence(),
            "Acme lifts sales (https://news.example/acme, 2024-03-01): Sales rose 20%."
        );
    }

    #[tokio::test]
    async fn test_disabled_search_reports_not_configured() {
        let result = DisabledSearch.search("anything", 5).await;
        assert!(matches!(result, Err(SearchError::NotConfigured { .. })));
    }
}

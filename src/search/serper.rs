use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{SearchProvider, SourceSnippet};
use crate::error::{SearchError, SearchResult};

/// Request body for the POST search endpoint
#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

/// Response body: organic results plus optional news results
#[derive(Debug, Default, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
    #[serde(default)]
    news: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
    date: Option<String>,
}

impl From<SerperResult> for SourceSnippet {
    fn from(result: SerperResult) -> Self {
        Self {
            title: result.title,
            url: result.link,
            published_date: result.date,
            text: result.snippet,
        }
    }
}

/// POST-based JSON search API client
#[derive(Clone)]
pub struct SerperClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl SerperClient {
    /// Create a new search client
    pub fn new(base_url: &str, api_key: &str, timeout_ms: u64) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_ms,
        })
    }
}

#[async_trait]
impl SearchProvider for SerperClient {
    async fn search(&self, query: &str, max_results: usize) -> SearchResult<Vec<SourceSnippet>> {
        let url = format!("{}/search", self.base_url);
        debug!(query = %query, max_results, "Calling search API");

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&SerperRequest {
                q: query,
                num: max_results,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    SearchError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: SerperResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse {
                    message: format!("Failed to parse search response: {}", e),
                })?;

        Ok(body
            .organic
            .into_iter()
            .chain(body.news)
            .filter(|r| !r.snippet.trim().is_empty() || !r.link.is_empty())
            .take(max_results)
            .map(SourceSnippet::from)
            .collect())
    }

    fn name(&self) -> String {
        "serper".to_string()
    }
}

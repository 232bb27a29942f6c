use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{PageScraper, SearchProvider, SourceSnippet};
use crate::error::{SearchError, SearchResult};

/// The custom search API caps `num` at 10.
const MAX_PAGE_SIZE: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Vec<CustomSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CustomSearchItem {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// GET-based custom search client that scrapes each returned link.
#[derive(Clone)]
pub struct CustomSearchClient {
    client: Client,
    base_url: String,
    api_key: String,
    engine_id: String,
    timeout_ms: u64,
    scraper: PageScraper,
}

impl CustomSearchClient {
    /// Create a new custom search client
    pub fn new(
        base_url: &str,
        api_key: &str,
        engine_id: &str,
        timeout_ms: u64,
        scraper: PageScraper,
    ) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            timeout_ms,
            scraper,
        })
    }

    async fn search_links(&self, query: &str, max_results: usize) -> SearchResult<Vec<CustomSearchItem>> {
        let url = format!("{}/customsearch/v1", self.base_url);
        let num = max_results.clamp(1, MAX_PAGE_SIZE).to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
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

        let body: CustomSearchResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse {
                    message: format!("Failed to parse custom search response: {}", e),
                })?;

        Ok(body.items.into_iter().take(max_results).collect())
    }
}

#[async_trait]
impl SearchProvider for CustomSearchClient {
    async fn search(&self, query: &str, max_results: usize) -> SearchResult<Vec<SourceSnippet>> {
        let items = self.search_links(query, max_results).await?;
        debug!(query = %query, links = items.len(), "Custom search returned links");

        let mut snippets = Vec::with_capacity(items.len());
        for item in items {
            let scraped = self.scraper.fetch_text(&item.link).await;
            let text = if scraped.is_empty() { item.snippet } else { scraped };
            if text.trim().is_empty() {
                continue;
            }
            snippets.push(SourceSnippet {
                title: item.title,
                url: item.link,
                published_date: None,
                text,
            });
        }

        Ok(snippets)
    }

    fn name(&self) -> String {
        "custom_search".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_only_need_link() {
        let body: CustomSearchResponse = serde_json::from_value(json!({
            "items": [{"link": "https://example.com/a"}, {"link": "https://example.com/b", "title": "B"}]
        }))
        .unwrap();

        assert_eq!(body.items.len(), 2);
        assert_eq!(body.items[0].title, "");
        assert_eq!(body.items[1].title, "B");
    }

    #[test]
    fn test_missing_items_is_empty() {
        let body: CustomSearchResponse =
            serde_json::from_value(json!({"kind": "customsearch#search"})).unwrap();
        assert!(body.items.is_empty());
    }
}

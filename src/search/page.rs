use reqwest::Client;
use scraper::{Html, Node};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{SearchError, SearchResult};

/// Elements whose text never counts as visible page content.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "header", "footer", "noscript"];

/// Fetches a page and reduces it to visible text.
#[derive(Clone)]
pub struct PageScraper {
    client: Client,
    char_budget: usize,
}

impl PageScraper {
    /// Create a scraper with a per-request timeout and a character budget
    pub fn new(timeout_ms: u64, char_budget: usize) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(concat!("case-study-forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            char_budget,
        })
    }

    /// Visible text of the page at `url`, truncated to the budget.
    ///
    /// Transport, status and decoding failures all yield an empty string.
    pub async fn fetch_text(&self, url: &str) -> String {
        match self.fetch_html(url).await {
            Ok(html) => {
                let text = visible_text(&html, self.char_budget);
                debug!(url = %url, chars = text.chars().count(), "Scraped page text");
                text
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Page scrape failed");
                String::new()
            }
        }
    }

    async fn fetch_html(&self, url: &str) -> SearchResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: format!("GET {}", url),
            });
        }
        Ok(response.text().await?)
    }
}

/// Extract whitespace-normalized visible text from an HTML document.
pub fn visible_text(html: &str, char_budget: usize) -> String {
    let document = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });

        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    truncate_chars(&words.join(" "), char_budget).0
}

/// Truncate to at most `budget` characters; reports whether anything was cut.
pub fn truncate_chars(text: &str, budget: usize) -> (String, bool) {
    match text.char_indices().nth(budget) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text.to_string(), false),
    }
}

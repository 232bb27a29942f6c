use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{GenerateContentRequest, GenerateContentResponse};
use super::CompletionService;
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{CompletionError, CompletionResult};
use crate::rate_limit::{backoff_delay, TokenBucket};

/// Client for the Gemini `generateContent` API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_output_tokens: u32,
    request_config: RequestConfig,
    limiter: Arc<TokenBucket>,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(
        config: &LlmConfig,
        request_config: RequestConfig,
        limiter: Arc<TokenBucket>,
    ) -> CompletionResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(CompletionError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            request_config,
            limiter,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model identifier
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Call generateContent with retries
    pub async fn generate_content(
        &self,
        request: GenerateContentRequest,
    ) -> CompletionResult<GenerateContentResponse> {
        let url = self.endpoint();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = backoff_delay(&self.request_config, retries);
                warn!(
                    model = %self.model,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying completion request"
                );
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;
            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(response) => {
                    info!(
                        model = %self.model,
                        latency_ms = start.elapsed().as_millis() as u64,
                        total_tokens = ?response.usage_metadata.as_ref().and_then(|u| u.total_token_count),
                        "Completion call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        model = %self.model,
                        error = %e,
                        latency_ms = start.elapsed().as_millis() as u64,
                        retry = retries,
                        "Completion call failed"
                    );
                    let retryable = is_retryable(&e);
                    last_error = Some(e);
                    retries += 1;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(e) if !is_retryable(&e) => Err(e),
            other => Err(CompletionError::Unavailable {
                message: other
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string()),
                retries,
            }),
        }
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &GenerateContentRequest,
    ) -> CompletionResult<GenerateContentResponse> {
        debug!(model = %self.model, "Calling completion service");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    CompletionError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| CompletionError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

/// Client errors other than rate limiting will not improve on retry.
fn is_retryable(error: &CompletionError) -> bool {
    match error {
        CompletionError::Api { status, .. } => *status == 429 || *status >= 500,
        CompletionError::InvalidResponse { .. } => false,
        _ => true,
    }
}

#[async_trait]
impl CompletionService for GeminiClient {
    async fn generate(&self, prompt: &str) -> CompletionResult<String> {
        let request = GenerateContentRequest::from_prompt(prompt)
            .with_temperature(self.temperature)
            .with_max_output_tokens(self.max_output_tokens);

        let response = self.generate_content(request).await?;
        let text = response.text();

        if text.is_empty() {
            return Err(CompletionError::EmptyResponse {
                finish_reason: response.finish_reason().unwrap_or("unknown").to_string(),
            });
        }

        Ok(text)
    }
}

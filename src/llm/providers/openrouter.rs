//! OpenRouter provider.
//!
//! OpenRouter exposes many upstream models behind one OpenAI-compatible
//! endpoint; every judge call of the reviewer goes through it when an
//! `OPENROUTER_API_KEY` is configured.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::litellm::{post_chat_completion, ApiRequest};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};

/// Default OpenRouter API endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenRouter provider for LLM requests.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenRouterProvider {
    /// Create a provider with a specific default model.
    pub fn with_model(api_key: String, model: String) -> Result<Self, LlmError> {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL.to_string(), model)
    }

    /// Create a provider against an OpenRouter-compatible base URL.
    pub fn with_custom_url(
        api_key: String,
        base_url: String,
        model: String,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url,
            default_model: model,
        })
    }

    /// Masked API key for log output.
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn execute_with_retry(
        &self,
        request: &ApiRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let mut last_error = None;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms,
                    "Retrying OpenRouter request after transient failure"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match post_chat_completion(&self.client, &url, Some(&self.api_key), request).await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient_error(&err) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        error = %err,
                        "Transient error, will retry"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
        }))
    }
}

/// Whether an error is worth another attempt at the transport level.
pub(crate) fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("temporarily")
        }
        LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let api_request = ApiRequest::from_request(request, &self.default_model);
        self.execute_with_retry(&api_request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openrouter_provider_with_model() {
        let provider = OpenRouterProvider::with_model(
            "test-api-key".to_string(),
            "anthropic/claude-3".to_string(),
        )
        .expect("provider builds");

        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(provider.default_model(), "anthropic/claude-3");
        assert_eq!(provider.api_key_masked(), "test...-key");
    }

    #[test]
    fn test_api_key_masked_short() {
        let provider = OpenRouterProvider::with_model("abc".to_string(), DEFAULT_MODEL.to_string())
            .expect("provider builds");
        assert_eq!(provider.api_key_masked(), "***");
    }

    #[test]
    fn test_is_transient_error() {
        assert!(is_transient_error(&LlmError::RateLimited("slow down".into())));
        assert!(is_transient_error(&LlmError::ApiError {
            code: 503,
            message: "unavailable".into()
        }));
        assert!(is_transient_error(&LlmError::RequestFailed(
            "error sending request: Connection refused".into()
        )));
        assert!(!is_transient_error(&LlmError::ApiError {
            code: 401,
            message: "bad key".into()
        }));
        assert!(!is_transient_error(&LlmError::ParseError("bad json".into())));
    }
}

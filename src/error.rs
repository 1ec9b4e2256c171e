//! Error types for template-reviewer operations.
//!
//! Defines the error taxonomy shared by the review pipeline:
//! - Project validation (status, video URL, repository shorthand)
//! - Repository provisioning and target-server readiness
//! - Remote agent transport and acceptance-oracle failures
//! - LLM API interactions and structured-output validation
//! - Project store persistence
//! - Configuration loading

use thiserror::Error;

/// Errors that can occur while reviewing a submission.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Server at {url} did not respond within {timeout_ms} ms")]
    ReadinessTimeout { url: String, timeout_ms: u64 },

    #[error("Agent transport error: {0}")]
    Transport(String),

    #[error("Acceptance oracle failed: {0}")]
    Oracle(String),

    #[error("Transcript unavailable: {0}")]
    Transcript(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the review pipeline.
pub type ReviewResult<T> = Result<T, ReviewError>;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set OPENROUTER_API_KEY or LITELLM_API_KEY")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("LLM output rejected after {attempts} attempt(s): {reason}")]
    InvalidOutput { attempts: u32, reason: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by project store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt project record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// Errors raised while loading reviewer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_error_display() {
        let err = ReviewError::ReadinessTimeout {
            url: "http://localhost:4111/".to_string(),
            timeout_ms: 2000,
        };
        assert_eq!(
            err.to_string(),
            "Server at http://localhost:4111/ did not respond within 2000 ms"
        );

        let err = ReviewError::Validation("Invalid project status: done".to_string());
        assert!(err.to_string().contains("done"));
    }

    #[test]
    fn test_llm_error_converts_into_review_error() {
        let err: ReviewError = LlmError::InvalidOutput {
            attempts: 3,
            reason: "expected 3 plans".to_string(),
        }
        .into();
        assert!(matches!(err, ReviewError::Llm(_)));
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}

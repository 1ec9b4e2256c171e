//! Schema-shaped generation on top of [`LlmProvider`].
//!
//! The model is forced to call a single function whose parameter schema
//! describes the wanted output. Arguments are parsed into `T` and checked;
//! rejected output is sent back with the reason and the call is retried up
//! to `max_attempts` times.

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message, ToolDefinition};
use crate::utils::json_extraction::extract_json_from_response;

/// Default number of generation attempts per structured call.
pub const DEFAULT_GENERATION_ATTEMPTS: u32 = 3;

/// Post-parse checks for structured outputs.
pub trait Validate {
    /// Returns a human-readable reason when the value must be rejected.
    fn validate(&self) -> Result<(), String>;
}

/// Runs forced-tool generations and turns them into typed values.
#[derive(Clone)]
pub struct StructuredGenerator {
    llm: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_attempts: u32,
}

impl StructuredGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: 0.2,
            max_tokens: 4096,
            max_attempts: DEFAULT_GENERATION_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Generate a `T` validated by its own [`Validate`] impl.
    pub async fn generate<T>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tool: ToolDefinition,
    ) -> Result<T, LlmError>
    where
        T: DeserializeOwned + Validate,
    {
        self.generate_checked(system_prompt, user_prompt, tool, |value: &T| value.validate())
            .await
    }

    /// Generate a `T` and run `check` on it before accepting.
    ///
    /// Transport failures are returned immediately; parse and check failures
    /// consume an attempt.
    pub async fn generate_checked<T, F>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tool: ToolDefinition,
        check: F,
    ) -> Result<T, LlmError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> Result<(), String>,
    {
        let tool_name = tool.name().to_string();
        let mut messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            let request = GenerationRequest::new(self.model.clone(), messages.clone())
                .with_temperature(self.temperature)
                .with_max_tokens(self.max_tokens)
                .with_tool(tool.clone());

            let response = self.llm.generate(request).await?;

            let raw = match response.tool_arguments(&tool_name) {
                Some(args) => args.to_string(),
                None => {
                    let content = response.first_content().unwrap_or_default();
                    extract_json_from_response(content)
                }
            };

            let outcome = serde_json::from_str::<T>(&raw)
                .map_err(|e| format!("arguments are not valid for {}: {}", tool_name, e))
                .and_then(|value| check(&value).map(|()| value));

            match outcome {
                Ok(value) => {
                    tracing::debug!(tool = %tool_name, attempt, "Structured output accepted");
                    return Ok(value);
                }
                Err(reason) => {
                    tracing::warn!(
                        tool = %tool_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        reason = %reason,
                        "Structured output rejected"
                    );
                    messages.push(Message::assistant(raw));
                    messages.push(Message::user(format!(
                        "REJECTED: {}. Call {} again with corrected arguments.",
                        reason, tool_name
                    )));
                    last_reason = reason;
                }
            }
        }

        Err(LlmError::InvalidOutput {
            attempts: self.max_attempts,
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, ToolCallInfo, Usage};
    use crate::llm::litellm::FunctionCall;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;

    /// Replays canned tool arguments in order and records requests.
    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let tool = request.forced_tool().unwrap_or_default().to_string();
            self.requests.lock().unwrap().push(request);
            let args = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::RequestFailed("script exhausted".into()))?;
            Ok(GenerationResponse {
                id: "test".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant_with_tool_calls(
                        "",
                        vec![ToolCallInfo {
                            id: "call_1".to_string(),
                            kind: "function".to_string(),
                            function: FunctionCall {
                                name: tool,
                                arguments: args,
                            },
                        }],
                    ),
                    finish_reason: "tool_calls".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    #[derive(Debug, Deserialize)]
    struct Rating {
        score: i64,
    }

    impl Validate for Rating {
        fn validate(&self) -> Result<(), String> {
            if (1..=5).contains(&self.score) {
                Ok(())
            } else {
                Err(format!("score {} out of range", self.score))
            }
        }
    }

    fn rating_tool() -> ToolDefinition {
        ToolDefinition::function(
            "record_rating",
            "Record a rating",
            serde_json::json!({"type": "object", "properties": {"score": {"type": "integer"}}}),
        )
    }

    #[tokio::test]
    async fn test_accepts_first_valid_output() {
        let provider = Arc::new(ScriptedProvider::new(&[r#"{"score": 4}"#]));
        let generator = StructuredGenerator::new(provider.clone(), "m");

        let rating: Rating = generator
            .generate("sys", "rate it", rating_tool())
            .await
            .expect("valid output");
        assert_eq!(rating.score, 4);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].forced_tool(), Some("record_rating"));
    }

    #[tokio::test]
    async fn test_retries_with_feedback_after_rejection() {
        let provider = Arc::new(ScriptedProvider::new(&[
            r#"{"score": 9}"#,
            "not json",
            r#"{"score": 2}"#,
        ]));
        let generator = StructuredGenerator::new(provider.clone(), "m");

        let rating: Rating = generator
            .generate("sys", "rate it", rating_tool())
            .await
            .expect("third attempt is valid");
        assert_eq!(rating.score, 2);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        let last = requests[2].messages.last().unwrap();
        assert!(last.content.starts_with("REJECTED"));
        assert_eq!(requests[2].messages.len(), 6);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let provider = Arc::new(ScriptedProvider::new(&[r#"{"score": 0}"#, r#"{"score": 7}"#]));
        let generator = StructuredGenerator::new(provider, "m").with_max_attempts(2);

        let err = generator
            .generate::<Rating>("sys", "rate it", rating_tool())
            .await
            .unwrap_err();
        match err {
            LlmError::InvalidOutput { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("7"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_custom_check_is_applied() {
        let provider = Arc::new(ScriptedProvider::new(&[r#"{"score": 3}"#]));
        let generator = StructuredGenerator::new(provider, "m").with_max_attempts(1);

        let err = generator
            .generate_checked::<Rating, _>("sys", "rate it", rating_tool(), |r| {
                if r.score == 3 {
                    Err("three is not allowed".to_string())
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("three is not allowed"));
    }
}

//! OpenAI-compatible chat-completions client (LiteLLM proxy or OpenRouter).
//!
//! Holds the wire types shared by every provider: messages, tool
//! definitions used for structured output, requests and responses.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
    /// Tool calls requested by the assistant, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallInfo>>,
}

impl Message {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    /// Assistant message that carries tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallInfo>,
    ) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role("assistant", content)
        }
    }
}

/// A function the model may call. Used here to obtain schema-shaped output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

/// Name, description and JSON schema of a callable function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Build a `function` tool from a name, description and parameter schema.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// Name of the wrapped function.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// How the model should pick among the offered tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolChoice {
    /// "auto", "none" or "required".
    Mode(String),
    /// Force one specific function.
    Function {
        #[serde(rename = "type")]
        kind: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolChoiceFunction {
    pub name: String,
}

impl ToolChoice {
    /// Force the model to call `name`.
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function {
            kind: "function".to_string(),
            function: ToolChoiceFunction { name: name.into() },
        }
    }
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallInfo {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_kind() -> String {
    "function".to_string()
}

/// Function name and raw JSON arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation. Empty means provider default.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0). Higher values = more random.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tools offered to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool selection policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Offer a tool and force the model to call it.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tool_choice = Some(ToolChoice::function(tool.name()));
        self.tools.get_or_insert_with(Vec::new).push(tool);
        self
    }

    /// Name of the forced tool, if any.
    pub fn forced_tool(&self) -> Option<&str> {
        match &self.tool_choice {
            Some(ToolChoice::Function { function, .. }) => Some(function.name.as_str()),
            _ => None,
        }
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    /// Generated choices/completions.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Arguments of the first tool call named `name` in the first choice.
    pub fn tool_arguments(&self, name: &str) -> Option<&str> {
        self.choices
            .first()?
            .message
            .tool_calls
            .as_ref()?
            .iter()
            .find(|tc| tc.function.name == name)
            .map(|tc| tc.function.arguments.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice in the response.
    pub index: u32,
    /// Generated message.
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length", "tool_calls").
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Default request timeout for chat completions.
const REQUEST_TIMEOUT_SECS: u64 = 120;

fn build_http_client() -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {}", e)))
}

/// Client for LiteLLM-compatible APIs.
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl LiteLlmClient {
    /// Create a new client with explicit configuration.
    pub fn new(
        api_base: String,
        api_key: Option<String>,
        default_model: String,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            api_base,
            api_key,
            default_model,
            http_client: build_http_client()?,
        })
    }

    /// Create a new client from environment variables.
    ///
    /// - `LITELLM_API_BASE`: base URL (required)
    /// - `LITELLM_API_KEY`: API key (optional)
    /// - `LITELLM_DEFAULT_MODEL`: default model (defaults to "google/gemini-2.5-flash")
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LITELLM_API_KEY").ok();
        let default_model = env::var("LITELLM_DEFAULT_MODEL")
            .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string());
        Self::new(api_base, api_key, default_model)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

/// Request body for the OpenAI-compatible API.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApiRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl ApiRequest {
    pub(crate) fn from_request(request: GenerationRequest, default_model: &str) -> Self {
        let model = if request.model.is_empty() {
            default_model.to_string()
        } else {
            request.model
        };
        Self {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools,
            tool_choice: request.tool_choice,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    finish_reason: Option<String>,
}

/// `content` is null when the model answers with tool calls only.
#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallInfo>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub message: String,
}

impl From<ApiResponse> for GenerationResponse {
    fn from(api_response: ApiResponse) -> Self {
        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: choice.message.content.unwrap_or_default(),
                    tool_calls: choice.message.tool_calls,
                },
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            })
            .collect();

        GenerationResponse {
            id: api_response.id,
            model: api_response.model,
            choices,
            usage: api_response.usage.unwrap_or_default(),
        }
    }
}

/// POST a chat-completions request and map failures onto `LlmError`.
pub(crate) async fn post_chat_completion(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    request: &ApiRequest,
) -> Result<GenerationResponse, LlmError> {
    let mut http_request = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("HTTP-Referer", "https://template-reviewer.local")
        .header("X-Title", "template-reviewer");

    if let Some(key) = api_key {
        http_request = http_request.header("Authorization", format!("Bearer {}", key));
    }

    let http_response = http_request
        .json(request)
        .send()
        .await
        .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

    let status = http_response.status();
    if !status.is_success() {
        let status_code = status.as_u16();
        let error_text = http_response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
            if status_code == 429 {
                return Err(LlmError::RateLimited(error_response.error.message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message: error_response.error.message,
            });
        }

        return Err(LlmError::ApiError {
            code: status_code,
            message: error_text,
        });
    }

    let api_response: ApiResponse = http_response
        .json()
        .await
        .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

    Ok(api_response.into())
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let api_request = ApiRequest::from_request(request, &self.default_model);
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        post_chat_completion(
            &self.http_client,
            &url,
            self.api_key.as_deref(),
            &api_request,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are a judge.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content, "You are a judge.");
    }

    #[test]
    fn test_with_tool_forces_function_choice() {
        let tool = ToolDefinition::function(
            "record_claims",
            "Record claims",
            serde_json::json!({"type": "object"}),
        );
        let request = GenerationRequest::new("", vec![Message::user("hi")]).with_tool(tool);

        assert_eq!(request.forced_tool(), Some("record_claims"));
        let json = serde_json::to_value(&request).expect("serialization should succeed");
        assert_eq!(json["tool_choice"]["type"], "function");
        assert_eq!(json["tool_choice"]["function"]["name"], "record_claims");
        assert_eq!(json["tools"][0]["type"], "function");
    }

    #[test]
    fn test_api_response_with_null_content_and_tool_calls() {
        let raw = r#"{
            "id": "gen-1",
            "model": "google/gemini-2.5-flash",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "record_step_verdict", "arguments": "{\"met\":true,\"justification\":\"ok\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let api: ApiResponse = serde_json::from_str(raw).expect("valid response");
        let response: GenerationResponse = api.into();

        assert_eq!(response.first_content(), Some(""));
        assert_eq!(
            response.tool_arguments("record_step_verdict"),
            Some("{\"met\":true,\"justification\":\"ok\"}")
        );
        assert_eq!(response.tool_arguments("other"), None);
        assert_eq!(response.usage.total_tokens, 0);
    }

    #[test]
    fn test_api_request_uses_default_model_when_empty() {
        let request = GenerationRequest::new("", vec![Message::user("test")]).with_max_tokens(10);
        let api = ApiRequest::from_request(request, "default/model");
        assert_eq!(api.model, "default/model");

        let json = serde_json::to_string(&api).expect("serialization should succeed");
        assert!(json.contains("\"max_tokens\":10"));
        assert!(!json.contains("temperature"));
    }

    #[tokio::test]
    async fn test_litellm_client_generate_connection_error() {
        let client = LiteLlmClient::new(
            "http://localhost:65535".to_string(),
            None,
            "test-model".to_string(),
        )
        .expect("client builds");

        let request = GenerationRequest::new("", vec![Message::user("test")]);
        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }
}

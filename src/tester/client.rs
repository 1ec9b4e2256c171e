//! HTTP client for the agent server of a reviewed project.
//!
//! Speaks the Mastra server API: `GET /api/agents`, `GET /api/agents/:id`
//! and `POST /api/agents/:id/generate`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ReviewError, ReviewResult};

/// Per-request timeout; agent replies can involve several tool calls.
const AGENT_REQUEST_TIMEOUT_SECS: u64 = 180;

/// Agent as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub name: String,
    /// Tool count when the listing includes a `tools` object.
    pub inline_tools: Option<usize>,
}

/// One chat turn sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /api/agents/:id/generate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest<'a> {
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<&'a str>,
}

/// Access to the agents exposed by a running project.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Agents keyed by id.
    async fn list_agents(&self) -> ReviewResult<BTreeMap<String, AgentSummary>>;

    /// Number of tools registered on one agent.
    async fn tool_count(&self, agent_id: &str) -> ReviewResult<usize>;

    /// Send the conversation and return the raw reply document.
    async fn generate(&self, agent_id: &str, request: GenerateRequest<'_>) -> ReviewResult<Value>;
}

/// Number of entries in a `tools` value (object or array).
fn count_tools(tools: &Value) -> Option<usize> {
    match tools {
        Value::Object(map) => Some(map.len()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Mastra-compatible [`AgentClient`] over reqwest.
pub struct MastraClient {
    base_url: String,
    http: Client,
}

impl MastraClient {
    pub fn new(base_url: impl Into<String>) -> ReviewResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(AGENT_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ReviewError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn agent_url(&self, agent_id: &str) -> String {
        format!(
            "{}/api/agents/{}",
            self.base_url,
            urlencoding::encode(agent_id)
        )
    }

    async fn read_json(response: reqwest::Response) -> ReviewResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(500).collect::<String>()
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ReviewError::Transport(format!("failed to read body: {}", e)))?;
        // Plain-text bodies are kept as a JSON string.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl AgentClient for MastraClient {
    async fn list_agents(&self) -> ReviewResult<BTreeMap<String, AgentSummary>> {
        let response = self
            .http
            .get(format!("{}/api/agents", self.base_url))
            .send()
            .await
            .map_err(|e| ReviewError::Transport(e.to_string()))?;
        let body = Self::read_json(response).await?;

        let Value::Object(entries) = body else {
            return Err(ReviewError::Transport(
                "agent listing is not a JSON object".to_string(),
            ));
        };

        Ok(entries
            .into_iter()
            .map(|(id, details)| {
                let name = details
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| id.clone());
                let inline_tools = details.get("tools").and_then(count_tools);
                (id, AgentSummary { name, inline_tools })
            })
            .collect())
    }

    async fn tool_count(&self, agent_id: &str) -> ReviewResult<usize> {
        let response = self
            .http
            .get(self.agent_url(agent_id))
            .send()
            .await
            .map_err(|e| ReviewError::Transport(e.to_string()))?;
        let body = Self::read_json(response).await?;
        Ok(body.get("tools").and_then(count_tools).unwrap_or(0))
    }

    async fn generate(&self, agent_id: &str, request: GenerateRequest<'_>) -> ReviewResult<Value> {
        let response = self
            .http
            .post(format!("{}/generate", self.agent_url(agent_id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| ReviewError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }
}

/// Reduce an agent reply document to its text.
///
/// Strings are returned as is; objects yield the first string among `text`,
/// `message` and `content`, then the `content` of the last entry in
/// `messages`; null becomes empty; anything else is compact JSON.
pub fn normalize_reply(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            for key in ["text", "message", "content"] {
                if let Some(Value::String(text)) = map.get(key) {
                    return text.clone();
                }
            }
            if let Some(content) = map
                .get("messages")
                .and_then(Value::as_array)
                .and_then(|messages| messages.last())
                .and_then(|last| last.get("content"))
                .filter(|content| !is_empty_content(content))
            {
                return match content {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
            }
            raw.to_string()
        }
        other => other.to_string(),
    }
}

fn is_empty_content(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        _ => false,
    }
}

//! Claim extraction: documentation + demo transcript -> testable claims.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LlmError;
use crate::llm::{StructuredGenerator, ToolDefinition, Validate};

pub const RECORD_CLAIMS_TOOL: &str = "record_claims";

const SYSTEM_PROMPT: &str = r#"You analyse hackathon submissions built as Mastra agent templates.
Harvest every present-tense capability the team claims the project has today.
Skip roadmap items, future plans, performance numbers and implementation details that a chat conversation cannot verify.
Merge near-identical statements. Quote or faithfully paraphrase; do not judge truth.
Also name the primary entry-point agent in kebab-case, or "null" when no candidate is clear.
Report the result by calling record_claims."#;

/// A present-tense capability the submission claims to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub name: String,
    pub description: String,
}

/// Extractor output after normalisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsOutput {
    #[serde(default)]
    pub main_agent: Option<String>,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

impl Validate for ClaimsOutput {
    fn validate(&self) -> Result<(), String> {
        if let Some(claim) = self
            .claims
            .iter()
            .find(|c| !c.name.trim().is_empty() && c.description.trim().is_empty())
        {
            return Err(format!("claim '{}' has an empty description", claim.name));
        }
        Ok(())
    }
}

impl ClaimsOutput {
    pub fn claim_names(&self) -> impl Iterator<Item = &str> {
        self.claims.iter().map(|c| c.name.as_str())
    }
}

/// JSON schema of the `record_claims` tool.
pub fn claims_tool() -> ToolDefinition {
    ToolDefinition::function(
        RECORD_CLAIMS_TOOL,
        "Record the primary agent guess and the extracted claims",
        json!({
            "type": "object",
            "properties": {
                "mainAgent": {
                    "type": ["string", "null"],
                    "description": "kebab-case name of the primary agent, or \"null\""
                },
                "claims": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "description": "verb-first summary, at most 10 words"},
                            "description": {"type": "string", "description": "claim text with a short evidence snippet"}
                        },
                        "required": ["name", "description"]
                    }
                }
            },
            "required": ["mainAgent", "claims"]
        }),
    )
}

/// Turns project documentation and a demo transcript into claims.
pub struct ClaimExtractor {
    generator: StructuredGenerator,
}

impl ClaimExtractor {
    pub fn new(generator: StructuredGenerator) -> Self {
        Self { generator }
    }

    pub async fn extract(
        &self,
        documentation: &str,
        transcript: &str,
    ) -> Result<ClaimsOutput, LlmError> {
        let prompt = format!(
            "## Documentation\n{}\n\n## Video transcript\n{}",
            documentation, transcript
        );
        let raw: ClaimsOutput = self
            .generator
            .generate(SYSTEM_PROMPT, &prompt, claims_tool())
            .await?;

        let output = normalize_claims(raw);
        tracing::info!(
            claims = output.claims.len(),
            main_agent = output.main_agent.as_deref().unwrap_or("none"),
            "Claims extracted"
        );
        Ok(output)
    }
}

/// Applies agent-name normalisation and claim de-duplication.
pub fn normalize_claims(raw: ClaimsOutput) -> ClaimsOutput {
    ClaimsOutput {
        main_agent: raw.main_agent.as_deref().and_then(normalize_main_agent),
        claims: dedupe_claims(raw.claims),
    }
}

/// Lowercase kebab-case; `None` for "null", empty or symbol-only input.
pub fn normalize_main_agent(value: &str) -> Option<String> {
    let kebab = value
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-");

    if kebab.is_empty() || kebab == "null" {
        None
    } else {
        Some(kebab)
    }
}

fn claim_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Drops nameless claims and merges claims whose names differ only in case,
/// spacing or punctuation, keeping the longer description. First-seen order
/// is preserved.
pub fn dedupe_claims(claims: Vec<Claim>) -> Vec<Claim> {
    let mut merged: Vec<(String, Claim)> = Vec::new();

    for claim in claims {
        let name = claim.name.trim().to_string();
        let key = claim_key(&name);
        if key.is_empty() {
            continue;
        }
        let claim = Claim {
            name,
            description: claim.description.trim().to_string(),
        };

        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                if claim.description.len() > existing.description.len() {
                    existing.description = claim.description;
                }
            }
            None => merged.push((key, claim)),
        }
    }

    merged.into_iter().map(|(_, claim)| claim).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct MockLlmProvider {
        response: Mutex<String>,
    }

    impl MockLlmProvider {
        fn new(response: &str) -> Self {
            Self {
                response: Mutex::new(response.to_string()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let content = self.response.lock().unwrap().clone();
            Ok(GenerationResponse {
                id: "test".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn claim(name: &str, description: &str) -> Claim {
        Claim {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_normalize_main_agent() {
        assert_eq!(
            normalize_main_agent("Weather Agent"),
            Some("weather-agent".to_string())
        );
        assert_eq!(
            normalize_main_agent("travelPlanner_agent"),
            Some("travelplanner-agent".to_string())
        );
        assert_eq!(normalize_main_agent("null"), None);
        assert_eq!(normalize_main_agent("NULL"), None);
        assert_eq!(normalize_main_agent("  "), None);
        assert_eq!(normalize_main_agent("--!"), None);
    }

    #[test]
    fn test_dedupe_keeps_longer_description() {
        let claims = vec![
            claim("Searches the web", "short"),
            claim("", "nameless"),
            claim("searches the Web!", "a much longer description"),
            claim("Summarizes PDFs", "pdf"),
        ];
        let deduped = dedupe_claims(claims);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].name, "Searches the web");
        assert_eq!(deduped[0].description, "a much longer description");
        assert_eq!(deduped[1].name, "Summarizes PDFs");
    }

    #[tokio::test]
    async fn test_extract_normalizes_model_output() {
        let reply = r#"```json
{
  "mainAgent": "Research Agent",
  "claims": [
    {"name": "Summarizes PDF documents", "description": "Reads a PDF and summarizes it (0:42)"},
    {"name": "summarizes pdf documents", "description": "dup"}
  ]
}
```"#;
        let provider = Arc::new(MockLlmProvider::new(reply));
        let extractor = ClaimExtractor::new(StructuredGenerator::new(provider, "test-model"));

        let output = extractor.extract("# Docs", "transcript").await.unwrap();
        assert_eq!(output.main_agent.as_deref(), Some("research-agent"));
        assert_eq!(output.claims.len(), 1);
        assert_eq!(
            output.claims[0].description,
            "Reads a PDF and summarizes it (0:42)"
        );
    }

    #[tokio::test]
    async fn test_extract_null_agent_and_empty_claims() {
        let provider = Arc::new(MockLlmProvider::new(r#"{"mainAgent": "null", "claims": []}"#));
        let extractor = ClaimExtractor::new(StructuredGenerator::new(provider, "test-model"));

        let output = extractor.extract("", "").await.unwrap();
        assert_eq!(output, ClaimsOutput::default());
    }
}

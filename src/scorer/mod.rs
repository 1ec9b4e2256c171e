//! Final rubric scoring of a reviewed project.
//!
//! The model rates description quality, appeal and creativity and proposes
//! tags. Test results always come from the executed plans and architecture
//! counts from static analysis when it ran.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::analysis::{Architecture, Stats};
use crate::claims::ClaimsOutput;
use crate::error::LlmError;
use crate::llm::{StructuredGenerator, ToolDefinition, Validate};
use crate::plans::PlansOutput;
use crate::project::Project;
use crate::tester::TestResult;

pub const RECORD_SCORES_TOOL: &str = "record_scores";

const SYSTEM_PROMPT: &str = r#"You are an impartial senior judge for a Mastra agent-template hackathon.
Score with the rubric below and report by calling record_scores.
descriptionQuality (1-5): 5 = clear, complete README with obvious setup and usage; 3 = mostly clear with gaps; 1 = sparse or unclear.
appeal (1-5): usefulness for users or developers, fit with Mastra and with the prize tracks.
creativity (1-5): novelty of the approach, framing or integrations.
Scores are whole numbers. Explanations cite specifics in one to four sentences.
architecture: counts of agents, tools and workflows; use the measured counts when given, 0 when unknown.
tags: lowercase kebab-case. Include applicable prize-track tags such as eligible-best-overall, eligible-agentnetwork, eligible-productivity, eligible-coding-agent, eligible-browserbase (web browsing), eligible-smithery (MCP), eligible-arcade, eligible-workos (auth), eligible-chroma (RAG), eligible-recall (blockchain), eligible-confident-ai (evals), plus a few topical tags."#;

/// A 1-5 rating with its reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub explanation: String,
}

/// Final report for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub description_quality: Rating,
    pub tests: Vec<TestResult>,
    pub appeal: Rating,
    pub creativity: Rating,
    pub architecture: Architecture,
    pub tags: Vec<String>,
}

/// Rating as emitted by the model; scores may arrive as JSON floats.
#[derive(Debug, Clone, Deserialize)]
struct RatingDraft {
    score: f64,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoresDraft {
    description_quality: RatingDraft,
    appeal: RatingDraft,
    creativity: RatingDraft,
    #[serde(default)]
    architecture: Architecture,
    #[serde(default)]
    tags: Vec<String>,
}

fn check_score(field: &str, score: f64) -> Result<u8, String> {
    if score.fract() != 0.0 || !(1.0..=5.0).contains(&score) {
        return Err(format!("{}.score must be an integer from 1 to 5, got {}", field, score));
    }
    Ok(score as u8)
}

impl Validate for ScoresDraft {
    fn validate(&self) -> Result<(), String> {
        check_score("descriptionQuality", self.description_quality.score)?;
        check_score("appeal", self.appeal.score)?;
        check_score("creativity", self.creativity.score)?;
        Ok(())
    }
}

impl RatingDraft {
    fn into_rating(self, field: &str) -> Result<Rating, LlmError> {
        let score = check_score(field, self.score).map_err(LlmError::ParseError)?;
        Ok(Rating {
            score,
            explanation: self.explanation,
        })
    }
}

/// Lowercased, trimmed, de-duplicated tags in first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

fn rating_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "score": {"type": "integer", "minimum": 1, "maximum": 5},
            "explanation": {"type": "string"}
        },
        "required": ["score", "explanation"]
    })
}

fn count_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {"count": {"type": "integer", "minimum": 0}},
        "required": ["count"]
    })
}

/// JSON schema of the `record_scores` tool.
pub fn scores_tool() -> ToolDefinition {
    ToolDefinition::function(
        RECORD_SCORES_TOOL,
        "Record the rubric scores and tags for the project",
        json!({
            "type": "object",
            "properties": {
                "descriptionQuality": rating_schema(),
                "appeal": rating_schema(),
                "creativity": rating_schema(),
                "architecture": {
                    "type": "object",
                    "properties": {
                        "agents": count_schema(),
                        "tools": count_schema(),
                        "workflows": count_schema()
                    },
                    "required": ["agents", "tools", "workflows"]
                },
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["descriptionQuality", "appeal", "creativity", "architecture", "tags"]
        }),
    )
}

/// Produces the final [`Scores`] for a project.
pub struct Scorer {
    generator: StructuredGenerator,
}

impl Scorer {
    pub fn new(generator: StructuredGenerator) -> Self {
        Self { generator }
    }

    pub async fn score(
        &self,
        project: &Project,
        stats: Option<&Stats>,
        claims: &ClaimsOutput,
        plans: &PlansOutput,
        tests: Vec<TestResult>,
    ) -> Result<Scores, LlmError> {
        let prompt = format!(
            "## Project\n- name: {}\n- repoURL: {}\n- videoURL: {}\n- description:\n{}\n\n\
             ## Measured project stats\n{}\n\n\
             ## Extracted claims\n{}\n\n\
             ## Test plans\n{}\n\n\
             ## Test results\n{}",
            project.name,
            project.repo_url,
            project.video_url,
            project.description,
            stats.map(pretty).unwrap_or_else(|| "unavailable".to_string()),
            pretty(claims),
            pretty(plans),
            pretty(&tests),
        );

        let draft: ScoresDraft = self
            .generator
            .generate(SYSTEM_PROMPT, &prompt, scores_tool())
            .await?;

        let architecture = stats.map(|s| s.architecture).unwrap_or(draft.architecture);
        let scores = Scores {
            description_quality: draft.description_quality.into_rating("descriptionQuality")?,
            tests,
            appeal: draft.appeal.into_rating("appeal")?,
            creativity: draft.creativity.into_rating("creativity")?,
            architecture,
            tags: normalize_tags(draft.tags),
        };

        tracing::info!(
            project_id = %project.id(),
            description_quality = scores.description_quality.score,
            appeal = scores.appeal.score,
            creativity = scores.creativity.score,
            passed = scores.tests.iter().filter(|t| t.passed).count(),
            "Project scored"
        );
        Ok(scores)
    }
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Count;
    use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
    use crate::project::{NewProject, ProjectFactory};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    struct MockLlmProvider {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            let content = self.responses.lock().unwrap().remove(0);
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

    fn project() -> Project {
        ProjectFactory::new("/tmp/reviews")
            .create(NewProject {
                name: "Research Assistant".to_string(),
                repo_url_or_shorthand: "acme/research".to_string(),
                description: "Summarizes papers".to_string(),
                video_url: "https://youtu.be/abc123".to_string(),
                env_config: BTreeMap::new(),
                port: Some(4111),
            })
            .unwrap()
    }

    fn draft_json(score: &str, tests: &str) -> String {
        format!(
            r#"{{
                "descriptionQuality": {{"score": {score}, "explanation": "clear"}},
                "tests": {tests},
                "appeal": {{"score": 3, "explanation": "useful"}},
                "creativity": {{"score": 2.0, "explanation": "common idea"}},
                "architecture": {{"agents": {{"count": 9}}, "tools": {{"count": 9}}, "workflows": {{"count": 9}}}},
                "tags": [" Eligible-Chroma", "rag", "RAG", ""]
            }}"#
        )
    }

    fn executed() -> Vec<TestResult> {
        vec![TestResult {
            id: "plan-1".to_string(),
            passed: true,
            explanation: "worked".to_string(),
        }]
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            "Eligible-Chroma ".to_string(),
            "rag".to_string(),
            " RAG".to_string(),
            "   ".to_string(),
        ];
        assert_eq!(normalize_tags(tags), vec!["eligible-chroma", "rag"]);
    }

    #[test]
    fn test_check_score_bounds() {
        assert_eq!(check_score("appeal", 5.0), Ok(5));
        assert!(check_score("appeal", 0.0).is_err());
        assert!(check_score("appeal", 6.0).is_err());
        assert!(check_score("appeal", 3.5).is_err());
    }

    #[tokio::test]
    async fn test_tests_overwritten_and_stats_architecture_used() {
        let provider = Arc::new(MockLlmProvider {
            responses: Mutex::new(vec![draft_json(
                "4",
                r#"[{"id": "plan-1", "passed": false, "explanation": "invented"}]"#,
            )]),
        });
        let scorer = Scorer::new(StructuredGenerator::new(provider, "judge"));
        let stats = Stats {
            architecture: Architecture {
                agents: Count { count: 2 },
                tools: Count { count: 5 },
                workflows: Count { count: 1 },
            },
            detected_technologies: BTreeMap::new(),
        };

        let scores = scorer
            .score(&project(), Some(&stats), &ClaimsOutput::default(), &PlansOutput::default(), executed())
            .await
            .unwrap();

        assert_eq!(scores.tests, executed());
        assert_eq!(scores.architecture, stats.architecture);
        assert_eq!(scores.description_quality.score, 4);
        assert_eq!(scores.creativity.score, 2);
        assert_eq!(scores.tags, vec!["eligible-chroma", "rag"]);
    }

    #[tokio::test]
    async fn test_model_architecture_kept_without_stats_and_empty_tests_overwrite() {
        let provider = Arc::new(MockLlmProvider {
            responses: Mutex::new(vec![draft_json("5", "[]")]),
        });
        let scorer = Scorer::new(StructuredGenerator::new(provider, "judge"));

        let scores = scorer
            .score(&project(), None, &ClaimsOutput::default(), &PlansOutput::default(), Vec::new())
            .await
            .unwrap();

        assert!(scores.tests.is_empty());
        assert_eq!(scores.architecture.agents.count, 9);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_retried() {
        let provider = Arc::new(MockLlmProvider {
            responses: Mutex::new(vec![draft_json("7", "[]"), draft_json("1", "[]")]),
        });
        let scorer = Scorer::new(StructuredGenerator::new(provider, "judge"));

        let scores = scorer
            .score(&project(), None, &ClaimsOutput::default(), &PlansOutput::default(), executed())
            .await
            .unwrap();
        assert_eq!(scores.description_quality.score, 1);
    }

    #[test]
    fn test_scores_serialization_shape() {
        let scores = Scores {
            description_quality: Rating { score: 4, explanation: "ok".to_string() },
            tests: executed(),
            appeal: Rating { score: 3, explanation: "ok".to_string() },
            creativity: Rating { score: 2, explanation: "ok".to_string() },
            architecture: Architecture::default(),
            tags: vec!["rag".to_string()],
        };
        let json = serde_json::to_value(&scores).unwrap();
        assert_eq!(json["descriptionQuality"]["score"], 4);
        assert_eq!(json["tests"][0]["id"], "plan-1");
        assert_eq!(json["architecture"]["tools"]["count"], 0);
    }
}

//! Plan synthesis: claims -> exactly three chat-based test plans.
//!
//! Model output is checked against the claims it was generated from;
//! rejected output is fed back to the model for another attempt.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

use crate::claims::ClaimsOutput;
use crate::error::LlmError;
use crate::llm::{StructuredGenerator, ToolDefinition};

pub const RECORD_TEST_PLANS_TOOL: &str = "record_test_plans";

/// Ids every synthesis must produce, in order.
pub const PLAN_IDS: [&str; 3] = ["plan-1", "plan-2", "plan-3"];

const TITLE_CHARS: std::ops::RangeInclusive<usize> = 3..=120;

const PLACEHOLDERS: &[&str] = &["<url>", "<link>", "[url]", "[link]", "{url}"];

const SYSTEM_PROMPT: &str = r#"You design chat-based acceptance tests for Mastra agent templates.
Given the extracted claims and the primary agent guess, propose exactly three plans (plan-1, plan-2, plan-3).
Each plan targets at least one claim, using claim names exactly as given, and together the plans cover as many claims as reasonable.
Each step is one user message; the agent only sees that message, so any URL or data it needs must appear in full inside the message. Never write placeholders such as <URL> or [link].
Do not rely on private credentials, workflow suspension or performance measurements. Keep every plan runnable within ten minutes.
Public resources you may use: https://raw.githubusercontent.com/mwaskom/seaborn-data/master/iris.csv, https://news.ycombinator.com/, https://en.wikipedia.org/wiki/Python_(programming_language), https://sherlock-holm.es/stories/pdf/letter/1-sided/advs.pdf, and the cities Paris, New York and Delhi for weather-like use cases.
Report the plans by calling record_test_plans."#;

/// One user turn and what the agent should do with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub message: String,
    pub expected_agent_behavior: String,
}

/// External artifact a plan relies on. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResource {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A scripted multi-turn chat scenario validating claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub claims_targeted: Vec<String>,
    pub steps: Vec<PlanStep>,
    pub success_criteria: Vec<String>,
    #[serde(rename = "resourcesToUse", default)]
    pub resources: Vec<PlanResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlansOutput {
    pub plans: Vec<Plan>,
}

/// JSON schema of the `record_test_plans` tool.
pub fn plans_tool() -> ToolDefinition {
    ToolDefinition::function(
        RECORD_TEST_PLANS_TOOL,
        "Record exactly three chat test plans",
        json!({
            "type": "object",
            "properties": {
                "plans": {
                    "type": "array",
                    "minItems": 3,
                    "maxItems": 3,
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string", "enum": PLAN_IDS},
                            "title": {"type": "string", "minLength": 3, "maxLength": 120},
                            "claims_targeted": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                            "steps": {
                                "type": "array",
                                "minItems": 2,
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "message": {"type": "string", "minLength": 1},
                                        "expected_agent_behavior": {"type": "string", "minLength": 1}
                                    },
                                    "required": ["message", "expected_agent_behavior"]
                                }
                            },
                            "success_criteria": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                            "resourcesToUse": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "url": {"type": ["string", "null"]}
                                    },
                                    "required": ["name", "url"]
                                }
                            }
                        },
                        "required": ["id", "title", "claims_targeted", "steps", "success_criteria", "resourcesToUse"]
                    }
                }
            },
            "required": ["plans"]
        }),
    )
}

/// Checks a synthesis result against the claims it was generated from.
pub fn validate_plans(output: &PlansOutput, claims: &ClaimsOutput) -> Result<(), String> {
    if output.plans.len() != PLAN_IDS.len() {
        return Err(format!(
            "expected exactly 3 plans, got {}",
            output.plans.len()
        ));
    }

    let ids: BTreeSet<&str> = output.plans.iter().map(|p| p.id.as_str()).collect();
    if ids != PLAN_IDS.into_iter().collect::<BTreeSet<_>>() {
        return Err(format!(
            "plan ids must be exactly plan-1, plan-2 and plan-3, got {:?}",
            output.plans.iter().map(|p| &p.id).collect::<Vec<_>>()
        ));
    }

    let known_claims: BTreeSet<&str> = claims.claim_names().collect();
    for plan in &output.plans {
        validate_plan(plan, &known_claims)?;
    }
    Ok(())
}

fn validate_plan(plan: &Plan, known_claims: &BTreeSet<&str>) -> Result<(), String> {
    let id = &plan.id;

    if !TITLE_CHARS.contains(&plan.title.trim().chars().count()) {
        return Err(format!("{}: title must be 3-120 characters", id));
    }
    if plan.claims_targeted.is_empty() {
        return Err(format!("{}: must target at least one claim", id));
    }
    if !known_claims.is_empty() {
        if let Some(unknown) = plan
            .claims_targeted
            .iter()
            .find(|name| !known_claims.contains(name.as_str()))
        {
            return Err(format!(
                "{}: targeted claim '{}' is not one of the extracted claim names",
                id, unknown
            ));
        }
    }
    if plan.steps.len() < 2 {
        return Err(format!("{}: needs at least 2 steps", id));
    }
    for (i, step) in plan.steps.iter().enumerate() {
        if step.message.trim().is_empty() || step.expected_agent_behavior.trim().is_empty() {
            return Err(format!("{}: step {} has an empty field", id, i + 1));
        }
        if let Some(placeholder) = find_placeholder(&step.message) {
            return Err(format!(
                "{}: step {} message contains placeholder {}; inline the concrete URL",
                id,
                i + 1,
                placeholder
            ));
        }
    }
    if plan.success_criteria.iter().all(|c| c.trim().is_empty()) {
        return Err(format!("{}: needs at least one success criterion", id));
    }
    Ok(())
}

fn find_placeholder(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    PLACEHOLDERS.iter().copied().find(|p| lower.contains(p))
}

/// Generates validated test plans from extracted claims.
pub struct PlanSynthesizer {
    generator: StructuredGenerator,
}

impl PlanSynthesizer {
    pub fn new(generator: StructuredGenerator) -> Self {
        Self { generator }
    }

    /// Returns the three plans sorted by id.
    pub async fn synthesize(&self, claims: &ClaimsOutput) -> Result<PlansOutput, LlmError> {
        let input = serde_json::to_string_pretty(claims)
            .map_err(|e| LlmError::ParseError(format!("failed to encode claims: {}", e)))?;
        let prompt = format!("## Claims and primary agent\n{}", input);

        let mut output: PlansOutput = self
            .generator
            .generate_checked(SYSTEM_PROMPT, &prompt, plans_tool(), |plans| {
                validate_plans(plans, claims)
            })
            .await?;

        output.plans.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(
            plans = output.plans.len(),
            steps = output.plans.iter().map(|p| p.steps.len()).sum::<usize>(),
            "Test plans synthesized"
        );
        Ok(output)
    }
}

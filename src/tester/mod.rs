//! Plan execution against the live agent of a reviewed project.
//!
//! For every plan the tester holds one conversation with the selected agent,
//! asking an acceptance oracle after each turn whether the plan's success
//! criteria are met. Agent and oracle failures are recorded in the
//! transcript or justification and never abort the run.

pub mod client;

pub use client::{normalize_reply, AgentClient, AgentSummary, ChatMessage, GenerateRequest, MastraClient};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::llm::{StructuredGenerator, ToolDefinition, Validate};
use crate::metrics::MetricsCollector;
use crate::plans::Plan;

pub const RECORD_STEP_VERDICT_TOOL: &str = "record_step_verdict";
pub const RECORD_FINAL_VERDICT_TOOL: &str = "record_final_verdict";

/// Agent id used when the server lists no agents.
pub const FALLBACK_AGENT_ID: &str = "default";

/// Default cap on conversation turns per plan.
pub const DEFAULT_MAX_STEPS: usize = 5;

const STEP_SYSTEM_PROMPT: &str = "You judge whether a chat agent has satisfied a test plan so far. \
All success criteria must hold. Answer by calling record_step_verdict.";

const FINAL_SYSTEM_PROMPT: &str = "You give the final verdict on whether a chat agent satisfied a test plan. \
All success criteria must hold. Answer by calling record_final_verdict.";

/// Outcome of one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub passed: bool,
    pub explanation: String,
}

/// Oracle answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Verdict {
    pub met: bool,
    pub justification: String,
}

impl Validate for Verdict {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Agent found on the server with its tool count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAgent {
    pub id: String,
    pub name: String,
    pub tools: usize,
}

#[derive(Debug, Clone)]
struct TranscriptTurn {
    user: String,
    assistant: String,
}

fn verdict_tool(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition::function(
        name,
        description,
        json!({
            "type": "object",
            "properties": {
                "met": {"type": "boolean", "description": "true when every success criterion is satisfied"},
                "justification": {"type": "string", "description": "short reasoning citing the transcript"}
            },
            "required": ["met", "justification"]
        }),
    )
}

/// Lowercase letters only.
pub fn normalize_agent_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Pick the agent to test.
///
/// An agent whose normalized name or id equals the normalized guess wins.
/// Otherwise the agent with the most tools is chosen, the first one in
/// `agents` order on ties. No agents yields [`FALLBACK_AGENT_ID`].
pub fn select_agent(agents: &[DiscoveredAgent], main_agent: Option<&str>) -> String {
    if let Some(guess) = main_agent {
        let target = normalize_agent_name(guess);
        if !target.is_empty() {
            if let Some(agent) = agents.iter().find(|a| {
                normalize_agent_name(&a.name) == target || normalize_agent_name(&a.id) == target
            }) {
                return agent.id.clone();
            }
        }
    }

    let mut best: Option<&DiscoveredAgent> = None;
    for agent in agents {
        if best.map_or(true, |b| agent.tools > b.tools) {
            best = Some(agent);
        }
    }
    best.map(|a| a.id.clone())
        .unwrap_or_else(|| FALLBACK_AGENT_ID.to_string())
}

fn render_transcript(transcript: &[TranscriptTurn]) -> String {
    transcript
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            format!(
                "Step {}\nUser: {}\nAssistant: {}",
                i + 1,
                turn.user,
                turn.assistant
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn plan_header(plan: &Plan) -> String {
    format!(
        "Plan title: {}\nClaims targeted: {}\nSuccess criteria (all must hold):\n- {}",
        plan.title,
        plan.claims_targeted.join(", "),
        plan.success_criteria.join("\n- ")
    )
}

/// Runs test plans against a project's agent server.
pub struct PlanTester {
    client: Arc<dyn AgentClient>,
    oracle: StructuredGenerator,
    max_steps: usize,
    metrics: MetricsCollector,
}

impl PlanTester {
    /// The oracle is asked once per turn; pass a generator configured with
    /// the attempts wanted per verdict.
    pub fn new(client: Arc<dyn AgentClient>, oracle: StructuredGenerator) -> Self {
        Self {
            client,
            oracle,
            max_steps: DEFAULT_MAX_STEPS,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// List agents sorted by id with their tool counts.
    ///
    /// Detail lookups run concurrently; a failed lookup counts as zero tools
    /// and a failed listing as no agents.
    pub async fn discover_agents(&self) -> Vec<DiscoveredAgent> {
        let listing = match self.client.list_agents().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(error = %e, "Agent discovery failed, continuing without agents");
                self.metrics.record_transport_error("list_agents");
                return Vec::new();
            }
        };

        let lookups = listing.into_iter().map(|(id, summary)| {
            let client = Arc::clone(&self.client);
            let metrics = self.metrics;
            async move {
                let tools = match summary.inline_tools {
                    Some(count) => count,
                    None => match client.tool_count(&id).await {
                        Ok(count) => count,
                        Err(e) => {
                            tracing::debug!(agent_id = %id, error = %e, "Agent detail lookup failed");
                            metrics.record_transport_error("agent_details");
                            0
                        }
                    },
                };
                DiscoveredAgent {
                    id,
                    name: summary.name,
                    tools,
                }
            }
        });

        // BTreeMap iteration already yields ids in sorted order.
        join_all(lookups).await
    }

    /// Execute `plans` in order and return one result per plan.
    pub async fn run_plans(
        &self,
        plans: &[Plan],
        main_agent: Option<&str>,
        resource_id: &str,
    ) -> Vec<TestResult> {
        let agents = self.discover_agents().await;
        let agent_id = select_agent(&agents, main_agent);
        tracing::info!(
            agent_id = %agent_id,
            discovered = agents.len(),
            main_agent = main_agent.unwrap_or("none"),
            "Selected agent under test"
        );

        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            let result = self.run_plan(&agent_id, plan, resource_id).await;
            self.metrics.record_plan_outcome(result.passed);
            tracing::info!(plan_id = %result.id, passed = result.passed, "Plan finished");
            results.push(result);
        }
        results
    }

    async fn run_plan(&self, agent_id: &str, plan: &Plan, resource_id: &str) -> TestResult {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut transcript: Vec<TranscriptTurn> = Vec::new();
        let mut met = false;
        let mut justification = String::new();

        for step in plan.steps.iter().take(self.max_steps) {
            messages.push(ChatMessage::user(step.message.clone()));

            let request = GenerateRequest {
                messages: &messages,
                thread_id: Some(plan.id.as_str()),
                resource_id: Some(resource_id),
            };
            let reply = match self.client.generate(agent_id, request).await {
                Ok(raw) => normalize_reply(&raw),
                Err(e) => {
                    tracing::warn!(plan_id = %plan.id, agent_id, error = %e, "Agent call failed");
                    self.metrics.record_transport_error("generate");
                    format!("Error talking to agent: {}", e)
                }
            };

            messages.push(ChatMessage::assistant(reply.clone()));
            transcript.push(TranscriptTurn {
                user: step.message.clone(),
                assistant: reply,
            });

            let prompt = format!(
                "{}\n\nInteraction transcript up to step {} (latest last):\n{}\n\nAre all success criteria fully met so far?",
                plan_header(plan),
                transcript.len(),
                render_transcript(&transcript)
            );
            match self
                .oracle
                .generate::<Verdict>(
                    STEP_SYSTEM_PROMPT,
                    &prompt,
                    verdict_tool(RECORD_STEP_VERDICT_TOOL, "Record whether the criteria are met so far"),
                )
                .await
            {
                Ok(verdict) => {
                    justification = verdict.justification;
                    if verdict.met {
                        met = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(plan_id = %plan.id, error = %e, "Step evaluation failed");
                    self.metrics.record_oracle_error("step");
                    justification = format!("Evaluation error: {}", e);
                }
            }
        }

        if !met {
            let prompt = format!(
                "{}\n\nFull interaction transcript (latest last):\n{}\n\nGive the final verdict.",
                plan_header(plan),
                render_transcript(&transcript)
            );
            match self
                .oracle
                .generate::<Verdict>(
                    FINAL_SYSTEM_PROMPT,
                    &prompt,
                    verdict_tool(RECORD_FINAL_VERDICT_TOOL, "Record the final verdict for the plan"),
                )
                .await
            {
                Ok(verdict) => {
                    met = verdict.met;
                    justification = verdict.justification;
                }
                Err(e) => {
                    tracing::warn!(plan_id = %plan.id, error = %e, "Final evaluation failed");
                    self.metrics.record_oracle_error("final");
                    if justification.is_empty() {
                        justification = format!("Final evaluation error: {}", e);
                    }
                }
            }
        }

        TestResult {
            id: plan.id.clone(),
            passed: met,
            explanation: justification,
        }
    }
}

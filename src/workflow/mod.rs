//! End-to-end review orchestration.
//!
//! Stages:
//! 1. `clone-project`: create and persist the project.
//! 2. In parallel:
//!    - `setup-project-repo`: provision the repository and start its server.
//!    - `claims-extractor`: transcript, claims, then test plans.
//! 3. `executor-and-scorer`: run the plans against the live agent, analyze
//!    the sources and score. The server is stopped on every exit path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::analysis::{self, Stats};
use crate::claims::{ClaimExtractor, ClaimsOutput};
use crate::config::ReviewerConfig;
use crate::error::{ReviewError, ReviewResult};
use crate::llm::{LlmProvider, StructuredGenerator};
use crate::metrics::MetricsCollector;
use crate::plans::{PlanSynthesizer, PlansOutput};
use crate::project::{NewProject, Project, ProjectDto, ProjectFactory, ProjectStatus};
use crate::provision::{Provisioner, ServerHandle};
use crate::scorer::{Scorer, Scores};
use crate::storage::{artifact_kinds, ProjectStore};
use crate::tester::{AgentClient, MastraClient, PlanTester};
use crate::video::TranscriptSource;

/// Workflow input as submitted by a reviewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    pub name: String,
    #[serde(rename = "repoURLOrShorthand")]
    pub repo_url_or_shorthand: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "videoURL")]
    pub video_url: String,
    #[serde(default)]
    pub env_config: BTreeMap<String, String>,
    /// Fixed server port; random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Final project snapshot and its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub project: ProjectDto,
    pub scores: Scores,
}

/// Workflow stages, named as they appear in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clone,
    Setup,
    Claims,
    Execute,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clone => "clone-project",
            Stage::Setup => "setup-project-repo",
            Stage::Claims => "claims-extractor",
            Stage::Execute => "executor-and-scorer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A review aborted by a fatal stage error.
#[derive(Debug, Error)]
#[error("Review failed in stage {stage} (last status: {last_status}): {source}")]
pub struct StageFailure {
    pub stage: Stage,
    /// Status of the last persisted project snapshot.
    pub last_status: ProjectStatus,
    pub project_id: Option<uuid::Uuid>,
    #[source]
    pub source: ReviewError,
}

/// Opens an agent client for a running project.
pub trait AgentConnector: Send + Sync {
    fn connect(&self, base_url: &str) -> ReviewResult<Arc<dyn AgentClient>>;
}

/// Connects over the Mastra HTTP protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct MastraConnector;

impl AgentConnector for MastraConnector {
    fn connect(&self, base_url: &str) -> ReviewResult<Arc<dyn AgentClient>> {
        Ok(Arc::new(MastraClient::new(base_url)?))
    }
}

/// Tracks the last persisted status of a project while a stage runs.
struct StageScope {
    stage: Stage,
    project_id: uuid::Uuid,
    last_status: ProjectStatus,
}

impl StageScope {
    fn new(stage: Stage, project: &Project) -> Self {
        Self {
            stage,
            project_id: project.id(),
            last_status: project.status,
        }
    }

    fn fail(&self, source: impl Into<ReviewError>) -> StageFailure {
        StageFailure {
            stage: self.stage,
            last_status: self.last_status,
            project_id: Some(self.project_id),
            source: source.into(),
        }
    }
}

/// The review pipeline assembled from its collaborators.
pub struct ReviewWorkflow {
    config: ReviewerConfig,
    factory: ProjectFactory,
    store: Arc<dyn ProjectStore>,
    provisioner: Arc<dyn Provisioner>,
    transcripts: Arc<dyn TranscriptSource>,
    agents: Arc<dyn AgentConnector>,
    llm: Arc<dyn LlmProvider>,
    metrics: MetricsCollector,
}

impl ReviewWorkflow {
    pub fn new(
        config: ReviewerConfig,
        store: Arc<dyn ProjectStore>,
        provisioner: Arc<dyn Provisioner>,
        transcripts: Arc<dyn TranscriptSource>,
        agents: Arc<dyn AgentConnector>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            factory: ProjectFactory::new(config.work_root.clone()),
            config,
            store,
            provisioner,
            transcripts,
            agents,
            llm,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    fn generator(&self) -> StructuredGenerator {
        StructuredGenerator::new(Arc::clone(&self.llm), self.config.model.clone())
            .with_max_attempts(self.config.generation_attempts)
    }

    /// Run a full review.
    pub async fn run(&self, input: ReviewInput) -> Result<ReviewOutput, StageFailure> {
        let result = self.run_stages(input).await;
        match &result {
            Ok(output) => {
                self.metrics.record_review("evaluated");
                tracing::info!(project_id = %output.project.id, "Review completed");
            }
            Err(failure) => {
                self.metrics.record_review("failed");
                tracing::error!(
                    stage = %failure.stage,
                    last_status = %failure.last_status,
                    error = %failure.source,
                    "Review failed"
                );
            }
        }
        result
    }

    async fn run_stages(&self, input: ReviewInput) -> Result<ReviewOutput, StageFailure> {
        let project = self.timed(Stage::Clone, self.clone_stage(input)).await?;

        let (setup, plans) = tokio::join!(
            self.timed(Stage::Setup, self.setup_stage(project.clone())),
            self.timed(Stage::Claims, self.claims_stage(project.clone())),
        );

        match (setup, plans) {
            (Ok((project, server)), Ok((claims, plans))) => {
                self.timed(Stage::Execute, self.execute_stage(project, server, claims, plans))
                    .await
            }
            (Err(failure), _) => Err(failure),
            (Ok((project, mut server)), Err(failure)) => {
                server.stop().await;
                Err(StageFailure {
                    last_status: project.status,
                    ..failure
                })
            }
        }
    }

    async fn timed<T>(
        &self,
        stage: Stage,
        fut: impl std::future::Future<Output = Result<T, StageFailure>>,
    ) -> Result<T, StageFailure> {
        let started = Instant::now();
        tracing::info!(stage = %stage, "Stage started");
        let result = fut.await;
        let elapsed = started.elapsed();
        self.metrics.record_stage(stage.as_str(), elapsed.as_secs_f64());
        tracing::info!(
            stage = %stage,
            ok = result.is_ok(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage finished"
        );
        result
    }

    async fn clone_stage(&self, input: ReviewInput) -> Result<Project, StageFailure> {
        let failure = |source: ReviewError| StageFailure {
            stage: Stage::Clone,
            last_status: ProjectStatus::Initialized,
            project_id: None,
            source,
        };

        let project = self
            .factory
            .create(NewProject {
                name: input.name,
                repo_url_or_shorthand: input.repo_url_or_shorthand,
                description: input.description,
                video_url: input.video_url,
                env_config: self.config.merged_env(&input.env_config),
                port: input.port,
            })
            .map_err(failure)?;

        self.store
            .save(&project)
            .await
            .map_err(|e| failure(e.into()))?;

        tracing::info!(
            project_id = %project.id(),
            repo_url = %project.repo_url,
            port = project.port,
            "Project created"
        );
        Ok(project)
    }

    async fn setup_stage(&self, project: Project) -> Result<(Project, ServerHandle), StageFailure> {
        let mut scope = StageScope::new(Stage::Setup, &project);

        let project = project.start_setup();
        self.store.save(&project).await.map_err(|e| scope.fail(e))?;
        scope.last_status = project.status;

        self.provisioner
            .provision(&project.repo_url, &project.directory, &project.env_config)
            .await
            .map_err(|e| scope.fail(e))?;

        let project = project.mark_ready();
        self.store.save(&project).await.map_err(|e| scope.fail(e))?;
        scope.last_status = project.status;

        let server = self
            .provisioner
            .start_server(&project.directory, project.port)
            .await
            .map_err(|e| scope.fail(e))?;

        tracing::info!(project_id = %project.id(), port = project.port, "Project ready");
        Ok((project, server))
    }

    async fn claims_stage(
        &self,
        project: Project,
    ) -> Result<(ClaimsOutput, PlansOutput), StageFailure> {
        let scope = StageScope::new(Stage::Claims, &project);
        let project_id = project.id();

        let transcript = self
            .transcripts
            .transcript(&project.canonical_video_url())
            .await
            .map_err(|e| scope.fail(e))?;

        let claims = ClaimExtractor::new(self.generator())
            .extract(&project.description, &transcript)
            .await
            .map_err(|e| scope.fail(e))?;
        self.save_artifact(project_id, artifact_kinds::CLAIMS, &claims)
            .await
            .map_err(|e| scope.fail(e))?;

        let plans = PlanSynthesizer::new(self.generator())
            .synthesize(&claims)
            .await
            .map_err(|e| scope.fail(e))?;
        self.save_artifact(project_id, artifact_kinds::PLANS, &plans)
            .await
            .map_err(|e| scope.fail(e))?;

        tracing::info!(
            project_id = %project_id,
            claims = claims.claims.len(),
            main_agent = claims.main_agent.as_deref().unwrap_or("none"),
            "Claims and plans ready"
        );
        Ok((claims, plans))
    }

    async fn execute_stage(
        &self,
        project: Project,
        mut server: ServerHandle,
        claims: ClaimsOutput,
        plans: PlansOutput,
    ) -> Result<ReviewOutput, StageFailure> {
        let mut scope = StageScope::new(Stage::Execute, &project);
        let result = self.execute(project, &mut scope, &claims, &plans).await;
        server.stop().await;
        result
    }

    async fn execute(
        &self,
        project: Project,
        scope: &mut StageScope,
        claims: &ClaimsOutput,
        plans: &PlansOutput,
    ) -> Result<ReviewOutput, StageFailure> {
        let project = project.start_evaluation();
        self.store.save(&project).await.map_err(|e| scope.fail(e))?;
        scope.last_status = project.status;

        let base_url = project.base_url();
        self.provisioner
            .wait_until_ready(&base_url, self.config.ready_timeout)
            .await
            .map_err(|e| scope.fail(e))?;

        let client = self.agents.connect(&base_url).map_err(|e| scope.fail(e))?;
        let oracle = self.generator().with_max_attempts(1);
        let tests = PlanTester::new(client, oracle)
            .with_max_steps(self.config.max_plan_steps)
            .run_plans(
                &plans.plans,
                claims.main_agent.as_deref(),
                &project.id().to_string(),
            )
            .await;
        self.save_artifact(project.id(), artifact_kinds::TEST_RESULTS, &tests)
            .await
            .map_err(|e| scope.fail(e))?;

        let stats = self.analyze(&project).await;
        let project = match &stats {
            Some(stats) => project.with_stats(stats.clone()),
            None => project,
        };

        let scores = Scorer::new(self.generator())
            .score(&project, stats.as_ref(), claims, plans, tests)
            .await
            .map_err(|e| scope.fail(e))?;

        let project = project.complete_evaluation(scores.clone());
        self.store.save(&project).await.map_err(|e| scope.fail(e))?;

        Ok(ReviewOutput {
            project: project.to_dto(),
            scores,
        })
    }

    /// Static analysis off the async runtime; a crashed scan yields no stats.
    async fn analyze(&self, project: &Project) -> Option<Stats> {
        let root = project.directory.clone();
        match tokio::task::spawn_blocking(move || analysis::analyze(&root)).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(project_id = %project.id(), error = %e, "Static analysis aborted");
                None
            }
        }
    }

    async fn save_artifact<T: Serialize>(
        &self,
        project_id: uuid::Uuid,
        kind: &str,
        value: &T,
    ) -> ReviewResult<()> {
        let data = serde_json::to_value(value)?;
        self.store.save_artifact(project_id, kind, &data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_input_wire_names() {
        let input: ReviewInput = serde_json::from_value(serde_json::json!({
            "name": "Weather",
            "repoURLOrShorthand": "acme/weather",
            "description": "Forecasts",
            "videoURL": "https://youtu.be/dQw4w9WgXcQ",
            "envConfig": {"OPENAI_API_KEY": "sk"}
        }))
        .unwrap();
        assert_eq!(input.repo_url_or_shorthand, "acme/weather");
        assert_eq!(input.env_config.get("OPENAI_API_KEY").map(String::as_str), Some("sk"));
        assert_eq!(input.port, None);

        let minimal: ReviewInput = serde_json::from_str(
            r#"{"name":"x","repoURLOrShorthand":"a/b","videoURL":"https://youtu.be/abc"}"#,
        )
        .unwrap();
        assert!(minimal.description.is_empty());
        assert!(minimal.env_config.is_empty());
    }

    #[test]
    fn test_stage_failure_display() {
        let failure = StageFailure {
            stage: Stage::Setup,
            last_status: ProjectStatus::SettingUp,
            project_id: None,
            source: ReviewError::Provisioning("git clone failed".to_string()),
        };
        let text = failure.to_string();
        assert!(text.contains("setup-project-repo"));
        assert!(text.contains("setting-up"));
        assert!(text.contains("git clone failed"));
    }
}

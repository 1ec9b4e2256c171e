//! template-reviewer: automated judging of hackathon agent templates.
//!
//! A review clones the submitted repository, extracts the claims made in
//! its description and demo video, turns them into chat test plans, runs
//! those plans against the project's live agent and scores the result.

// Pipeline stages
pub mod analysis;
pub mod claims;
pub mod plans;
pub mod provision;
pub mod scorer;
pub mod tester;
pub mod workflow;

// Domain and infrastructure
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod project;
pub mod storage;
pub mod utils;
pub mod video;

// Re-export commonly used types
pub use error::{ConfigError, LlmError, ReviewError, ReviewResult, StoreError};
pub use project::{Project, ProjectDto, ProjectStatus};
pub use workflow::{ReviewInput, ReviewOutput, ReviewWorkflow, StageFailure};

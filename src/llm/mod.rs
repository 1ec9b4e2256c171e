//! LLM integration for the reviewer.
//!
//! Every judging step (claim extraction, plan synthesis, acceptance oracle,
//! scoring) is a forced tool call against an OpenAI-compatible chat endpoint.
//!
//! ```ignore
//! use template_reviewer::llm::{OpenRouterProvider, StructuredGenerator};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(OpenRouterProvider::with_model(key, model.clone())?);
//! let generator = StructuredGenerator::new(provider, model);
//! let claims: ClaimsOutput = generator.generate(SYSTEM, &prompt, claims_tool()).await?;
//! ```

pub mod litellm;
pub mod providers;
pub mod structured;

pub use litellm::{
    Choice, FunctionCall, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider,
    Message, ToolCallInfo, ToolChoice, ToolDefinition, Usage,
};
pub use providers::OpenRouterProvider;
pub use structured::{StructuredGenerator, Validate, DEFAULT_GENERATION_ATTEMPTS};

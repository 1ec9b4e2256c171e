//! Command-line interface for template-reviewer.
//!
//! Provides commands to review a submission, inspect stored projects, run
//! the static analyzer on a checkout and archive projects.

mod commands;

pub use commands::{build_llm_client, parse_cli, run, run_with_cli, Cli, Commands};

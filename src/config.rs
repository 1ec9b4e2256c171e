//! Reviewer configuration.
//!
//! Values come from the process environment with defaults suitable for a
//! local run. The CLI overrides individual fields from its flags.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::providers::openrouter::DEFAULT_MODEL;
use crate::llm::DEFAULT_GENERATION_ATTEMPTS;

/// Host API keys copied into every reviewed project's `.env`.
pub const AI_API_KEY_VARS: &[&str] = &[
    "OPENROUTER_API_KEY",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_GENERATIVE_AI_API_KEY",
];

/// Configuration shared by all review stages.
#[derive(Debug, Clone)]
pub struct ReviewerConfig {
    /// OpenRouter key; when absent a LiteLLM proxy is used.
    pub openrouter_api_key: Option<String>,
    /// Model used for every judging call.
    pub model: String,
    /// SQLite file holding project records.
    pub database_path: PathBuf,
    /// Parent directory of per-project working directories.
    pub work_root: PathBuf,
    /// Package manager executable.
    pub npm_path: String,
    /// Readiness probe deadline for the cloned server.
    pub ready_timeout: Duration,
    /// Upper bound for `npm install`, unbounded when `None`.
    pub install_timeout: Option<Duration>,
    /// Maximum conversation turns per test plan.
    pub max_plan_steps: usize,
    /// Attempts per structured generation (extractor, planner, scorer).
    pub generation_attempts: u32,
    /// AI provider keys found in the host environment.
    pub ai_api_keys: BTreeMap<String, String>,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            database_path: PathBuf::from("reviews.db"),
            work_root: std::env::temp_dir().join("template-reviewer"),
            npm_path: "npm".to_string(),
            ready_timeout: Duration::from_secs(120),
            install_timeout: None,
            max_plan_steps: 5,
            generation_attempts: DEFAULT_GENERATION_ATTEMPTS,
            ai_api_keys: BTreeMap::new(),
        }
    }
}

impl ReviewerConfig {
    /// Creates configuration from environment variables.
    ///
    /// - `OPENROUTER_API_KEY`: OpenRouter key (optional)
    /// - `REVIEWER_MODEL`: judging model (default: google/gemini-2.5-flash)
    /// - `REVIEWER_DATABASE_PATH`: SQLite file (default: reviews.db)
    /// - `REVIEWER_WORK_ROOT`: clone root (default: `<tmp>/template-reviewer`)
    /// - `REVIEWER_NPM_PATH`: package manager (default: npm)
    /// - `REVIEWER_READY_TIMEOUT_SECS`: readiness deadline (default: 120)
    /// - `REVIEWER_INSTALL_TIMEOUT_SECS`: install deadline (optional)
    /// - `REVIEWER_MAX_PLAN_STEPS`: turns per plan (default: 5)
    /// - `REVIEWER_GENERATION_ATTEMPTS`: structured-output attempts (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        config.openrouter_api_key = get("OPENROUTER_API_KEY");

        if let Some(val) = get("REVIEWER_MODEL") {
            config.model = val;
        }
        if let Some(val) = get("REVIEWER_DATABASE_PATH") {
            config.database_path = PathBuf::from(val);
        }
        if let Some(val) = get("REVIEWER_WORK_ROOT") {
            config.work_root = PathBuf::from(val);
        }
        if let Some(val) = get("REVIEWER_NPM_PATH") {
            config.npm_path = val;
        }
        if let Some(val) = get("REVIEWER_READY_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "REVIEWER_READY_TIMEOUT_SECS")?;
            config.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = get("REVIEWER_INSTALL_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "REVIEWER_INSTALL_TIMEOUT_SECS")?;
            config.install_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(val) = get("REVIEWER_MAX_PLAN_STEPS") {
            config.max_plan_steps = parse_env_value(&val, "REVIEWER_MAX_PLAN_STEPS")?;
        }
        if let Some(val) = get("REVIEWER_GENERATION_ATTEMPTS") {
            config.generation_attempts = parse_env_value(&val, "REVIEWER_GENERATION_ATTEMPTS")?;
        }

        config.ai_api_keys = AI_API_KEY_VARS
            .iter()
            .filter_map(|key| get(*key).map(|v| (key.to_string(), v)))
            .collect();

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }
        if self.npm_path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "npm_path cannot be empty".to_string(),
            ));
        }
        if self.ready_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "ready_timeout must be greater than 0".to_string(),
            ));
        }
        if matches!(self.install_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "install_timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_plan_steps == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_plan_steps must be greater than 0".to_string(),
            ));
        }
        if self.generation_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "generation_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Environment written to a project's `.env`: host AI keys, then user
    /// values on top.
    pub fn merged_env(&self, user_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = self.ai_api_keys.clone();
        merged.extend(user_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

fn parse_env_value<T: FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = ReviewerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.database_path, PathBuf::from("reviews.db"));
        assert_eq!(config.npm_path, "npm");
        assert_eq!(config.ready_timeout, Duration::from_secs(120));
        assert_eq!(config.install_timeout, None);
        assert_eq!(config.max_plan_steps, 5);
        assert_eq!(config.generation_attempts, 3);
        assert!(config.ai_api_keys.is_empty());
        assert!(config.openrouter_api_key.is_none());
    }

    #[test]
    fn test_overrides_and_ai_keys() {
        let config = ReviewerConfig::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "or-key"),
            ("ANTHROPIC_API_KEY", "an-key"),
            ("REVIEWER_MODEL", "openai/gpt-4o"),
            ("REVIEWER_READY_TIMEOUT_SECS", "30"),
            ("REVIEWER_INSTALL_TIMEOUT_SECS", "600"),
            ("REVIEWER_MAX_PLAN_STEPS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.openrouter_api_key.as_deref(), Some("or-key"));
        assert_eq!(config.model, "openai/gpt-4o");
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.install_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.max_plan_steps, 3);
        assert_eq!(
            config.ai_api_keys.keys().collect::<Vec<_>>(),
            vec!["ANTHROPIC_API_KEY", "OPENROUTER_API_KEY"]
        );
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ReviewerConfig::from_lookup(lookup_from(&[(
            "REVIEWER_READY_TIMEOUT_SECS",
            "soon",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "REVIEWER_READY_TIMEOUT_SECS"));
    }

    #[test]
    fn test_zero_steps_fails_validation() {
        let err =
            ReviewerConfig::from_lookup(lookup_from(&[("REVIEWER_MAX_PLAN_STEPS", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
    }

    #[test]
    fn test_user_env_overrides_host_keys() {
        let mut config = ReviewerConfig::default();
        config
            .ai_api_keys
            .insert("OPENAI_API_KEY".to_string(), "host".to_string());

        let mut user = BTreeMap::new();
        user.insert("OPENAI_API_KEY".to_string(), "user".to_string());
        user.insert("EXA_API_KEY".to_string(), "exa".to_string());

        let merged = config.merged_env(&user);
        assert_eq!(merged["OPENAI_API_KEY"], "user");
        assert_eq!(merged["EXA_API_KEY"], "exa");
        assert_eq!(merged.len(), 2);
    }
}

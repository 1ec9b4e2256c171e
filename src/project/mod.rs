//! The `Project` aggregate: one submission under review.
//!
//! Projects are created by [`ProjectFactory`], advanced through their
//! lifecycle by explicit transitions that return new snapshots, and
//! persisted through [`ProjectStore`](crate::storage::ProjectStore) as
//! [`ProjectDto`] records.

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::analysis::Stats;
use crate::error::{ReviewError, ReviewResult};
use crate::scorer::Scores;

/// Description used when a submission provides none.
pub const DEFAULT_DESCRIPTION: &str = "No description provided";

/// Inclusive range random ports are drawn from.
pub const PORT_RANGE: std::ops::RangeInclusive<u16> = 3000..=9000;

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    Initialized,
    SettingUp,
    Ready,
    Evaluating,
    Evaluated,
    Archived,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 6] = [
        ProjectStatus::Initialized,
        ProjectStatus::SettingUp,
        ProjectStatus::Ready,
        ProjectStatus::Evaluating,
        ProjectStatus::Evaluated,
        ProjectStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Initialized => "initialized",
            ProjectStatus::SettingUp => "setting-up",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Evaluating => "evaluating",
            ProjectStatus::Evaluated => "evaluated",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ReviewError::Validation(format!("Invalid project status: {}", s)))
    }
}

/// One submission under review.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    id: Uuid,
    pub name: String,
    pub repo_url: String,
    pub video_url: String,
    video_id: String,
    pub description: String,
    pub port: u16,
    pub status: ProjectStatus,
    pub directory: PathBuf,
    pub env_config: BTreeMap<String, String>,
    pub stats: Option<Stats>,
    pub scores: Option<Scores>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Canonical video identifier extracted at construction.
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// `https://www.youtube.com/watch?v=<id>`
    pub fn canonical_video_url(&self) -> String {
        canonical_video_url(&self.video_id)
    }

    /// Base URL of the project's server once started.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn start_setup(&self) -> Project {
        self.with_status(ProjectStatus::SettingUp)
    }

    pub fn mark_ready(&self) -> Project {
        self.with_status(ProjectStatus::Ready)
    }

    pub fn start_evaluation(&self) -> Project {
        self.with_status(ProjectStatus::Evaluating)
    }

    pub fn with_stats(&self, stats: Stats) -> Project {
        Project {
            stats: Some(stats),
            ..self.clone()
        }
    }

    pub fn complete_evaluation(&self, scores: Scores) -> Project {
        Project {
            scores: Some(scores),
            status: ProjectStatus::Evaluated,
            ..self.clone()
        }
    }

    /// Terminal transition, allowed from every status.
    pub fn archive(&self) -> Project {
        self.with_status(ProjectStatus::Archived)
    }

    fn with_status(&self, status: ProjectStatus) -> Project {
        Project {
            status,
            ..self.clone()
        }
    }

    pub fn to_dto(&self) -> ProjectDto {
        ProjectDto {
            name: self.name.clone(),
            id: self.id.to_string(),
            video_url: self.video_url.clone(),
            video_id: self.video_id.clone(),
            description: self.description.clone(),
            port: self.port.to_string(),
            repo_url: self.repo_url.clone(),
            status: self.status.as_str().to_string(),
            directory: self.directory.to_string_lossy().into_owned(),
            env_config: self.env_config.clone(),
            stats: self.stats.clone(),
            scores: self.scores.clone(),
            created_at: self.created_at,
        }
    }

    /// Rebuilds a project from its persisted form, re-validating the fields.
    pub fn from_dto(dto: ProjectDto) -> ReviewResult<Project> {
        let id = Uuid::parse_str(&dto.id)
            .map_err(|e| ReviewError::Validation(format!("Invalid project id '{}': {}", dto.id, e)))?;
        let port = dto
            .port
            .parse::<u16>()
            .map_err(|e| ReviewError::Validation(format!("Invalid port '{}': {}", dto.port, e)))?;
        let status = dto.status.parse::<ProjectStatus>()?;
        let video_id = extract_video_id(&dto.video_url)?;

        Ok(Project {
            id,
            name: dto.name,
            repo_url: dto.repo_url,
            video_url: dto.video_url,
            video_id,
            description: dto.description,
            port,
            status,
            directory: PathBuf::from(dto.directory),
            env_config: dto.env_config,
            stats: dto.stats,
            scores: dto.scores,
            created_at: dto.created_at,
        })
    }
}

/// External representation of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub name: String,
    pub id: String,
    #[serde(rename = "videoURL")]
    pub video_url: String,
    pub video_id: String,
    pub description: String,
    pub port: String,
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub status: String,
    pub directory: String,
    #[serde(default)]
    pub env_config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
    pub created_at: DateTime<Utc>,
}

/// Inputs for creating a project.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub repo_url_or_shorthand: String,
    pub description: String,
    pub video_url: String,
    pub env_config: BTreeMap<String, String>,
    /// Random port in [`PORT_RANGE`] when `None`.
    pub port: Option<u16>,
}

/// Builds validated projects rooted under a common work directory.
#[derive(Debug, Clone)]
pub struct ProjectFactory {
    work_root: PathBuf,
}

impl ProjectFactory {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn create(&self, input: NewProject) -> ReviewResult<Project> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ReviewError::Validation(
                "Project name cannot be empty".to_string(),
            ));
        }

        let repo_url = resolve_repo_url(&input.repo_url_or_shorthand)?;
        let video_id = extract_video_id(&input.video_url)?;
        let description = if input.description.trim().is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            input.description
        };
        let port = input
            .port
            .unwrap_or_else(|| rand::thread_rng().gen_range(PORT_RANGE));
        let id = Uuid::new_v4();

        Ok(Project {
            id,
            name,
            repo_url,
            video_url: input.video_url,
            video_id,
            description,
            port,
            status: ProjectStatus::Initialized,
            directory: self.work_root.join(id.to_string()),
            env_config: input.env_config,
            stats: None,
            scores: None,
            created_at: Utc::now(),
        })
    }
}

/// URLs starting with `http` are kept verbatim; anything else must be a
/// GitHub `owner/repo` shorthand.
pub fn resolve_repo_url(value: &str) -> ReviewResult<String> {
    let value = value.trim();
    if value.starts_with("http") {
        return Ok(value.to_string());
    }
    validate_repo_shorthand(value)?;
    Ok(format!("https://github.com/{}", value))
}

fn validate_repo_shorthand(value: &str) -> ReviewResult<()> {
    let segments: Vec<&str> = value.split('/').collect();
    let valid_segment = |s: &str| {
        !s.is_empty()
            && !s.starts_with('.')
            && !s.starts_with('-')
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    };

    if segments.len() == 2 && segments.iter().all(|s| valid_segment(s)) {
        Ok(())
    } else {
        Err(ReviewError::Validation(format!(
            "Invalid repository '{}': expected a URL or owner/repo",
            value
        )))
    }
}

fn video_id_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(
                r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/)([^&\n?#/]+)",
            )
            .expect("Invalid regex for video id"),
            Regex::new(r"youtube\.com/watch\?(?:[^#\n]*&)?v=([^&\n?#]+)")
                .expect("Invalid regex for video id query"),
        ]
    })
}

/// Canonical video identifier from any supported YouTube URL form.
pub fn extract_video_id(url: &str) -> ReviewResult<String> {
    video_id_patterns()
        .iter()
        .find_map(|re| re.captures(url).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ReviewError::Validation(format!("Could not extract video id from '{}'", url)))
}

pub fn canonical_video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

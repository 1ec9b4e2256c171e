//! Persistent storage of project records and review artifacts.
//!
//! - **SqliteProjectStore**: sqlx-backed store used by the CLI
//! - **InMemoryProjectStore**: process-local store for tests and dry runs
//!
//! ```rust,ignore
//! use template_reviewer::storage::{ProjectFilter, ProjectStore, SqliteProjectStore};
//!
//! let store = SqliteProjectStore::open("reviews.db").await?;
//! store.save(&project).await?;
//! let evaluated = store
//!     .list(&ProjectFilter::new().with_status(ProjectStatus::Evaluated))
//!     .await?;
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryProjectStore;
pub use sqlite::SqliteProjectStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::project::{Project, ProjectStatus};

/// Artifact kinds written by the review workflow.
pub mod artifact_kinds {
    pub const CLAIMS: &str = "claims";
    pub const PLANS: &str = "plans";
    pub const TEST_RESULTS: &str = "test-results";
}

/// Criteria for [`ProjectStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    pub id: Option<Uuid>,
    pub status: Option<ProjectStatus>,
    /// Case-insensitive substring of the project name.
    pub name: Option<String>,
    pub repo_url: Option<String>,
}

impl ProjectFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_repo_url(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = Some(repo_url.into());
        self
    }

    pub fn matches(&self, project: &Project) -> bool {
        self.id.map_or(true, |id| project.id() == id)
            && self.status.map_or(true, |status| project.status == status)
            && self.name.as_ref().map_or(true, |name| {
                project.name.to_lowercase().contains(&name.to_lowercase())
            })
            && self
                .repo_url
                .as_ref()
                .map_or(true, |url| &project.repo_url == url)
    }
}

/// A JSON document attached to a project by a review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub project_id: Uuid,
    pub kind: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Storage for project records, upserted by id.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Projects matching `filter`, oldest first.
    async fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError>;

    /// Insert or replace the record with the project's id.
    async fn save(&self, project: &Project) -> Result<(), StoreError>;

    /// Replace the artifact of `kind` for a project.
    async fn save_artifact(
        &self,
        project_id: Uuid,
        kind: &str,
        data: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// All artifacts of a project ordered by kind.
    async fn artifacts(&self, project_id: Uuid) -> Result<Vec<Artifact>, StoreError>;
}

//! SQLite-backed [`ProjectStore`].
//!
//! Each project is stored as its DTO JSON plus the columns used for
//! filtering. Artifacts live in a second table keyed by project and kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use super::{Artifact, ProjectFilter, ProjectStore};
use crate::error::StoreError;
use crate::project::{Project, ProjectDto};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    repo_url    TEXT NOT NULL,
    status      TEXT NOT NULL,
    data        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);

CREATE TABLE IF NOT EXISTS review_artifacts (
    project_id  TEXT NOT NULL,
    kind        TEXT NOT NULL,
    data        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (project_id, kind)
);
"#;

#[derive(Clone)]
pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self::with_pool(pool).await?;
        tracing::info!(path = path, "Project store opened");
        Ok(store)
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Result<Project, StoreError> {
        let id: String = row.get("id");
        let data: String = row.get("data");
        let dto: ProjectDto = serde_json::from_str(&data)?;
        Project::from_dto(dto).map_err(|e| StoreError::Corrupt {
            id,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, data FROM projects
             WHERE (?1 IS NULL OR id = ?1)
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR repo_url = ?3)
             ORDER BY created_at, id",
        )
        .bind(filter.id.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.repo_url.as_deref())
        .fetch_all(&self.pool)
        .await?;

        // SQLite's lower() only folds ASCII, so the name match runs here.
        let mut projects = Vec::with_capacity(rows.len());
        for row in &rows {
            let project = Self::row_to_project(row)?;
            if filter.matches(&project) {
                projects.push(project);
            }
        }
        Ok(projects)
    }

    async fn save(&self, project: &Project) -> Result<(), StoreError> {
        let dto = project.to_dto();
        let data = serde_json::to_string(&dto)?;

        sqlx::query(
            "INSERT INTO projects (id, name, repo_url, status, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                repo_url = excluded.repo_url,
                status = excluded.status,
                data = excluded.data,
                updated_at = datetime('now')",
        )
        .bind(&dto.id)
        .bind(&dto.name)
        .bind(&dto.repo_url)
        .bind(&dto.status)
        .bind(&data)
        .bind(dto.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(project_id = %dto.id, status = %dto.status, "Project saved");
        Ok(())
    }

    async fn save_artifact(
        &self,
        project_id: Uuid,
        kind: &str,
        data: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO review_artifacts (project_id, kind, data, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, kind) DO UPDATE SET
                data = excluded.data,
                created_at = excluded.created_at",
        )
        .bind(project_id.to_string())
        .bind(kind)
        .bind(serde_json::to_string(data)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn artifacts(&self, project_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        let rows = sqlx::query(
            "SELECT kind, data, created_at FROM review_artifacts
             WHERE project_id = ?1 ORDER BY kind",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Artifact, StoreError> {
                let data: String = row.get("data");
                let created_at: String = row.get("created_at");
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StoreError::Corrupt {
                        id: project_id.to_string(),
                        reason: format!("bad artifact timestamp: {}", e),
                    })?;
                Ok(Artifact {
                    project_id,
                    kind: row.get("kind"),
                    data: serde_json::from_str(&data)?,
                    created_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{NewProject, ProjectFactory, ProjectStatus};
    use crate::storage::artifact_kinds;
    use tempfile::TempDir;

    fn project(name: &str) -> Project {
        ProjectFactory::new("/tmp/reviews")
            .create(NewProject {
                name: name.to_string(),
                repo_url_or_shorthand: "acme/agent".to_string(),
                video_url: "https://www.youtube.com/watch?v=abc".to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_list_round_trip() {
        let store = SqliteProjectStore::open_in_memory().await.unwrap();
        let p = project("Weather Bot");

        store.save(&p).await.unwrap();
        store.save(&p.start_setup().mark_ready()).await.unwrap();

        let all = store.list(&ProjectFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ProjectStatus::Ready);
        assert_eq!(all[0].id(), p.id());
        assert_eq!(all[0].video_id(), "abc");
    }

    #[tokio::test]
    async fn test_filters() {
        let store = SqliteProjectStore::open_in_memory().await.unwrap();
        let weather = project("Weather Bot");
        let research = project("Deep Research");
        store.save(&weather).await.unwrap();
        store.save(&research.archive()).await.unwrap();

        let found = store
            .list(&ProjectFilter::new().with_name("WEATHER"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Weather Bot");

        let archived = store
            .list(&ProjectFilter::new().with_status(ProjectStatus::Archived))
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id(), research.id());

        let by_id = store
            .list(&ProjectFilter::new().with_id(weather.id()))
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);

        let none = store
            .list(&ProjectFilter::new().with_repo_url("https://github.com/other/repo"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_name_filter_folds_non_ascii_like_memory_store() {
        let sqlite = SqliteProjectStore::open_in_memory().await.unwrap();
        let memory = crate::storage::InMemoryProjectStore::new();
        for name in ["ÉCOLE Agent", "Straße Planner", "Weather Bot"] {
            let p = project(name);
            sqlite.save(&p).await.unwrap();
            memory.save(&p).await.unwrap();
        }

        let cases = [
            ("école", "ÉCOLE Agent"),
            ("STRASSE", ""),
            ("STRAẞE", "Straße Planner"),
        ];
        for (query, expected) in cases {
            let filter = ProjectFilter::new().with_name(query);
            let from_sqlite: Vec<String> = sqlite
                .list(&filter)
                .await
                .unwrap()
                .into_iter()
                .map(|p| p.name)
                .collect();
            let from_memory: Vec<String> = memory
                .list(&filter)
                .await
                .unwrap()
                .into_iter()
                .map(|p| p.name)
                .collect();
            assert_eq!(from_sqlite, from_memory, "query {}", query);
            if expected.is_empty() {
                assert!(from_sqlite.is_empty(), "query {}", query);
            } else {
                assert_eq!(from_sqlite, vec![expected.to_string()]);
            }
        }
    }

    #[tokio::test]
    async fn test_file_backed_store_persists_artifacts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.db");
        let path = path.to_string_lossy().to_string();
        let id = Uuid::new_v4();

        {
            let store = SqliteProjectStore::open(&path).await.unwrap();
            store
                .save_artifact(id, artifact_kinds::PLANS, &serde_json::json!({"plans": []}))
                .await
                .unwrap();
            store
                .save_artifact(id, artifact_kinds::CLAIMS, &serde_json::json!({"claims": [1]}))
                .await
                .unwrap();
        }

        let reopened = SqliteProjectStore::open(&path).await.unwrap();
        let artifacts = reopened.artifacts(id).await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].kind, artifact_kinds::CLAIMS);
        assert_eq!(artifacts[0].data["claims"][0], 1);
        assert_eq!(artifacts[1].kind, artifact_kinds::PLANS);
    }
}

//! In-memory [`ProjectStore`].

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Artifact, ProjectFilter, ProjectStore};
use crate::error::StoreError;
use crate::project::Project;

/// Process-local store; contents are lost on drop.
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<BTreeMap<Uuid, Project>>,
    artifacts: RwLock<BTreeMap<(Uuid, String), Artifact>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let projects = self.projects.read().await;
        let mut matching: Vec<Project> = projects
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.created_at);
        Ok(matching)
    }

    async fn save(&self, project: &Project) -> Result<(), StoreError> {
        self.projects
            .write()
            .await
            .insert(project.id(), project.clone());
        Ok(())
    }

    async fn save_artifact(
        &self,
        project_id: Uuid,
        kind: &str,
        data: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let artifact = Artifact {
            project_id,
            kind: kind.to_string(),
            data: data.clone(),
            created_at: Utc::now(),
        };
        self.artifacts
            .write()
            .await
            .insert((project_id, kind.to_string()), artifact);
        Ok(())
    }

    async fn artifacts(&self, project_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .artifacts
            .read()
            .await
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{NewProject, ProjectFactory, ProjectStatus};
    use crate::storage::artifact_kinds;

    fn project(name: &str, repo: &str) -> Project {
        ProjectFactory::new("/tmp/reviews")
            .create(NewProject {
                name: name.to_string(),
                repo_url_or_shorthand: repo.to_string(),
                video_url: "https://youtu.be/abc".to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_is_upsert_and_filters_apply() {
        let store = InMemoryProjectStore::new();
        let travel = project("Travel Planner", "acme/travel");
        let pdf = project("PDF Buddy", "acme/pdf");

        store.save(&travel).await.unwrap();
        store.save(&pdf).await.unwrap();
        store.save(&travel.start_setup()).await.unwrap();

        let all = store.list(&ProjectFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let by_name = store
            .list(&ProjectFilter::new().with_name("travel"))
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].status, ProjectStatus::SettingUp);

        let by_status = store
            .list(&ProjectFilter::new().with_status(ProjectStatus::Initialized))
            .await
            .unwrap();
        assert_eq!(by_status, vec![pdf.clone()]);

        let by_repo = store
            .list(&ProjectFilter::new().with_repo_url("https://github.com/acme/pdf"))
            .await
            .unwrap();
        assert_eq!(by_repo.len(), 1);

        let by_id = store
            .list(&ProjectFilter::new().with_id(travel.id()))
            .await
            .unwrap();
        assert_eq!(by_id[0].id(), travel.id());
    }

    #[tokio::test]
    async fn test_artifacts_replace_per_kind() {
        let store = InMemoryProjectStore::new();
        let id = Uuid::new_v4();

        store
            .save_artifact(id, artifact_kinds::CLAIMS, &serde_json::json!({"v": 1}))
            .await
            .unwrap();
        store
            .save_artifact(id, artifact_kinds::CLAIMS, &serde_json::json!({"v": 2}))
            .await
            .unwrap();
        store
            .save_artifact(Uuid::new_v4(), artifact_kinds::PLANS, &serde_json::json!([]))
            .await
            .unwrap();

        let artifacts = store.artifacts(id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].data["v"], 2);
    }
}

//! In-memory record store.
//!
//! Backs tests and single-process deployments. Jobs and experiences live in
//! separate maps behind separate locks, so job writes never contend with
//! experience reads. Listing is most-recent-first by creation time, the
//! convention dashboards expect.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Experience, Job, JobStore, StoreError};

/// In-memory `JobStore` implementation.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    experiences: RwLock<HashMap<Uuid, Experience>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).cloned().ok_or(StoreError::JobNotFound(id))
    }

    async fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all)
    }

    async fn get_experience(&self, id: Uuid) -> Result<Experience, StoreError> {
        let experiences = self.experiences.read().await;
        experiences
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExperienceNotFound(id))
    }

    async fn upsert_experience(&self, experience: &Experience) -> Result<(), StoreError> {
        let mut experiences = self.experiences.write().await;
        experiences.insert(experience.id, experience.clone());
        Ok(())
    }

    async fn list_experiences(&self) -> Result<Vec<Experience>, StoreError> {
        let experiences = self.experiences.read().await;
        let mut all: Vec<Experience> = experiences.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_job_is_not_found() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get_job(id).await,
            Err(StoreError::JobNotFound(found)) if found == id
        ));
    }

    #[tokio::test]
    async fn test_upsert_and_get_job() {
        let store = InMemoryStore::new();
        let job = Job::new(Uuid::new_v4(), "Studio Session");

        store.upsert_job(&job).await.unwrap();
        let loaded = store.get_job(job.id).await.unwrap();

        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.experience_title, "Studio Session");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_job() {
        let store = InMemoryStore::new();
        let mut job = Job::new(Uuid::new_v4(), "Studio Session");
        store.upsert_job(&job).await.unwrap();

        job.record_progress(crate::pipeline::Stage::Ingest, 60);
        store.upsert_job(&job).await.unwrap();

        let loaded = store.get_job(job.id).await.unwrap();
        assert_eq!(loaded.progress(crate::pipeline::Stage::Ingest), 60);
        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_jobs_most_recent_first() {
        let store = InMemoryStore::new();

        let mut older = Job::new(Uuid::new_v4(), "Older");
        older.started_at = chrono::Utc::now() - chrono::Duration::minutes(10);
        let newer = Job::new(Uuid::new_v4(), "Newer");

        store.upsert_job(&older).await.unwrap();
        store.upsert_job(&newer).await.unwrap();

        let listed = store.list_jobs().await.unwrap();
        assert_eq!(listed[0].experience_title, "Newer");
        assert_eq!(listed[1].experience_title, "Older");
    }
}

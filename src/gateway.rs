//! Control-plane operations at the boundary with external callers.
//!
//! The gateway owns everything that is not worker-driven: project creation
//! (experience + job + manifest + the first work item), read access for
//! dashboards, and the operator actions publish, retry and cancel. Each
//! action validates the current record state before mutating anything, so a
//! rejected call leaves no partial state behind.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::manifest::{ManifestError, ManifestWriter};
use crate::metrics;
use crate::pipeline::Stage;
use crate::queue::{QueueError, QueueStats, WorkItem, WorkQueue};
use crate::store::{
    Experience, ExperienceStatus, Interpolation, Job, JobStatus, JobStore, Manifest,
    ManifestAssets, Quality, StoreError,
};

/// Errors surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Record store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Work queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Manifest could not be written.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Creation input rejected before any record was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The job is not in a status that permits the requested action.
    #[error("Job {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: JobStatus,
        expected: &'static str,
    },
}

/// Parameters for creating a new volumetric project.
#[derive(Debug, Clone)]
pub struct ProjectRequest {
    /// Display title (required, non-empty).
    pub title: String,
    /// Long-form description.
    pub description: String,
    /// Free-form discovery tags.
    pub tags: Vec<String>,
    /// Target device identifiers (required, non-empty).
    pub devices: Vec<String>,
    /// Whether the experience supports mixed-reality passthrough.
    pub mr_ready: bool,
    /// Default playback quality tier.
    pub default_quality: Quality,
    /// Default frame interpolation setting.
    pub default_interpolation: Interpolation,
    /// Poster image location.
    pub poster_url: String,
    /// Optional trailer location.
    pub trailer_url: String,
}

impl ProjectRequest {
    /// Creates a request with the required title and sensible defaults.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            tags: Vec::new(),
            devices: vec!["android_xr".to_string()],
            mr_ready: false,
            default_quality: Quality::High,
            default_interpolation: Interpolation::Off,
            poster_url: String::new(),
            trailer_url: String::new(),
        }
    }

    /// Sets the discovery tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the target devices.
    pub fn with_devices(mut self, devices: Vec<String>) -> Self {
        self.devices = devices;
        self
    }

    /// Sets the mixed-reality flag.
    pub fn with_mr_ready(mut self, mr_ready: bool) -> Self {
        self.mr_ready = mr_ready;
        self
    }

    /// Sets the default quality tier.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.default_quality = quality;
        self
    }

    /// Sets the default interpolation setting.
    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.default_interpolation = interpolation;
        self
    }

    /// Sets the poster image location.
    pub fn with_poster_url(mut self, url: impl Into<String>) -> Self {
        self.poster_url = url.into();
        self
    }

    /// Sets the trailer location.
    pub fn with_trailer_url(mut self, url: impl Into<String>) -> Self {
        self.trailer_url = url.into();
        self
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.title.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "title must not be empty".to_string(),
            ));
        }
        if self.devices.is_empty() {
            return Err(GatewayError::InvalidInput(
                "at least one target device is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// The control plane over the record store, work queue and manifest writer.
pub struct Gateway {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    manifests: ManifestWriter,
}

impl Gateway {
    /// Creates a gateway over the given backends.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        manifests: ManifestWriter,
    ) -> Self {
        Self {
            store,
            queue,
            manifests,
        }
    }

    /// Creates a project: a draft experience, its manifest, a queued job at
    /// the first stage, and the initial work item.
    ///
    /// Input is validated before any record is created; a rejected request
    /// produces no partial state.
    pub async fn create_project(
        &self,
        request: ProjectRequest,
    ) -> Result<(Experience, Job), GatewayError> {
        request.validate()?;

        let experience_id = Uuid::new_v4();
        let manifest_path = self.manifests.path(experience_id);

        let experience = Experience {
            id: experience_id,
            title: request.title.trim().to_string(),
            description: request.description,
            tags: request.tags,
            devices: request.devices,
            mr_ready: request.mr_ready,
            default_quality: request.default_quality,
            default_interpolation: request.default_interpolation,
            version: 0,
            status: ExperienceStatus::Draft,
            manifest_url: manifest_path.display().to_string(),
            poster_url: request.poster_url,
            trailer_url: request.trailer_url,
            release_notes: None,
            created_at: chrono::Utc::now(),
        };

        let manifest = Manifest {
            id: experience_id,
            devices: experience.devices.clone(),
            mr_ready: experience.mr_ready,
            default_quality: experience.default_quality,
            default_interpolation: experience.default_interpolation,
            assets: ManifestAssets {
                primary: format!("gs://volusphere-assets/{}/model.splat", experience_id),
                poster: experience.poster_url.clone(),
                trailer: experience.trailer_url.clone(),
            },
        };

        let job = Job::new(experience_id, experience.title.clone());

        self.store.upsert_experience(&experience).await?;
        self.manifests.write(&manifest)?;
        self.store.upsert_job(&job).await?;
        self.queue
            .enqueue(WorkItem::new(job.id, Stage::first()))
            .await?;

        info!(
            experience_id = %experience.id,
            job_id = %job.id,
            title = %experience.title,
            "Project created"
        );

        Ok((experience, job))
    }

    /// Returns a job by id.
    pub async fn get_job(&self, id: Uuid) -> Result<Job, GatewayError> {
        Ok(self.store.get_job(id).await?)
    }

    /// Returns all jobs, most recent first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, GatewayError> {
        Ok(self.store.list_jobs().await?)
    }

    /// Returns an experience by id.
    pub async fn get_experience(&self, id: Uuid) -> Result<Experience, GatewayError> {
        Ok(self.store.get_experience(id).await?)
    }

    /// Returns all experiences, most recent first.
    pub async fn list_experiences(&self) -> Result<Vec<Experience>, GatewayError> {
        Ok(self.store.list_experiences().await?)
    }

    /// Publishes a job that finished the pipeline.
    ///
    /// Valid only when the job is `ReadyToPublish`: bumps the experience
    /// version by exactly one, stores the release notes verbatim and marks
    /// the job `Published`. Publishing an already published job is rejected,
    /// so the version can never double-increment.
    pub async fn publish(
        &self,
        job_id: Uuid,
        release_notes: impl Into<String>,
    ) -> Result<Experience, GatewayError> {
        let mut job = self.store.get_job(job_id).await?;

        if job.status != JobStatus::ReadyToPublish {
            return Err(GatewayError::InvalidState {
                id: job_id,
                status: job.status,
                expected: "ReadyToPublish",
            });
        }

        let mut experience = self.store.get_experience(job.experience_id).await?;
        experience.mark_published(release_notes);
        self.store.upsert_experience(&experience).await?;

        job.status = JobStatus::Published;
        job.append_log(format!("Published as v{}", experience.version));
        self.store.upsert_job(&job).await?;

        metrics::record_experience_published();
        info!(
            job_id = %job_id,
            experience_id = %experience.id,
            version = experience.version,
            "Experience published"
        );

        Ok(experience)
    }

    /// Retries a failed job from the stage it failed at.
    ///
    /// Valid only when the job is `Failed`: the status goes straight back
    /// to `Processing`, progress for the failing stage is reset to 0, a
    /// fresh work item re-enters the queue, and earlier stages keep their
    /// recorded completion.
    pub async fn retry(&self, job_id: Uuid) -> Result<Job, GatewayError> {
        let mut job = self.store.get_job(job_id).await?;

        if job.status != JobStatus::Failed {
            return Err(GatewayError::InvalidState {
                id: job_id,
                status: job.status,
                expected: "Failed",
            });
        }

        let stage = job.current_stage;
        job.status = JobStatus::Processing;
        job.finished_at = None;
        job.stage_progress.insert(stage, 0);
        job.append_log(format!("Retry requested, {} re-queued", stage));

        self.store.upsert_job(&job).await?;
        self.queue.enqueue(WorkItem::new(job_id, stage)).await?;

        info!(job_id = %job_id, stage = %stage, "Job retry enqueued");

        Ok(job)
    }

    /// Cancels a queued or processing job.
    ///
    /// The running worker notices the terminal status at its next progress
    /// report and abandons the stage; any outstanding work item is dropped
    /// on delivery.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, GatewayError> {
        let mut job = self.store.get_job(job_id).await?;

        if !matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
            return Err(GatewayError::InvalidState {
                id: job_id,
                status: job.status,
                expected: "Queued or Processing",
            });
        }

        job.mark_cancelled();
        self.store.upsert_job(&job).await?;

        warn!(job_id = %job_id, stage = %job.current_stage, "Job cancelled");

        Ok(job)
    }

    /// Returns current work queue statistics.
    pub async fn queue_stats(&self) -> Result<QueueStats, GatewayError> {
        Ok(self.queue.stats().await?)
    }

    /// Returns the manifest writer.
    pub fn manifests(&self) -> &ManifestWriter {
        &self.manifests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryWorkQueue;
    use crate::store::InMemoryStore;

    fn test_gateway() -> (Gateway, Arc<InMemoryStore>, Arc<InMemoryWorkQueue>) {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let manifests = ManifestWriter::new(dir.keep()).unwrap();
        let gateway = Gateway::new(store.clone(), queue.clone(), manifests);
        (gateway, store, queue)
    }

    fn test_request() -> ProjectRequest {
        ProjectRequest::new("Neon Parkour Run", "Volumetric capture of a rooftop run")
            .with_tags(vec!["sports".to_string()])
            .with_devices(vec!["android_xr".to_string(), "quest".to_string()])
            .with_mr_ready(true)
            .with_quality(Quality::Ultra)
            .with_interpolation(Interpolation::Fps120)
    }

    #[tokio::test]
    async fn test_create_project_produces_all_records() {
        let (gateway, _store, queue) = test_gateway();

        let (experience, job) = gateway.create_project(test_request()).await.unwrap();

        assert_eq!(experience.status, ExperienceStatus::Draft);
        assert_eq!(experience.version, 0);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.current_stage, Stage::Ingest);
        assert_eq!(job.progress(Stage::Ingest), 0);

        // Manifest exists and reflects the request.
        let manifest = gateway.manifests().read(experience.id).unwrap();
        assert!(manifest.mr_ready);
        assert_eq!(manifest.devices.len(), 2);
        assert_eq!(manifest.default_quality, Quality::Ultra);

        // Exactly one work item, for the first stage.
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.ready, 1);
    }

    #[tokio::test]
    async fn test_create_project_rejects_empty_title() {
        let (gateway, store, queue) = test_gateway();

        let request = ProjectRequest::new("   ", "desc");
        let result = gateway.create_project(request).await;
        assert!(matches!(result, Err(GatewayError::InvalidInput(_))));

        // Fail fast: no partial state.
        assert!(store.list_experiences().await.unwrap().is_empty());
        assert!(store.list_jobs().await.unwrap().is_empty());
        assert_eq!(queue.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_create_project_rejects_empty_devices() {
        let (gateway, _store, _queue) = test_gateway();

        let request = ProjectRequest::new("Title", "desc").with_devices(Vec::new());
        let result = gateway.create_project(request).await;
        assert!(matches!(result, Err(GatewayError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_publish_requires_ready_to_publish() {
        let (gateway, _store, _queue) = test_gateway();
        let (_, job) = gateway.create_project(test_request()).await.unwrap();

        // Still queued; publish must be rejected.
        let result = gateway.publish(job.id, "v1").await;
        assert!(matches!(result, Err(GatewayError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_publish_increments_version_exactly_once() {
        let (gateway, store, _queue) = test_gateway();
        let (experience, mut job) = gateway.create_project(test_request()).await.unwrap();

        job.mark_complete();
        store.upsert_job(&job).await.unwrap();

        let published = gateway.publish(job.id, "v2 fixes").await.unwrap();
        assert_eq!(published.status, ExperienceStatus::Published);
        assert_eq!(published.version, experience.version + 1);
        assert_eq!(published.release_notes.as_deref(), Some("v2 fixes"));

        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Published);

        // Second publish is rejected; the version stays put.
        let result = gateway.publish(job.id, "again").await;
        assert!(matches!(result, Err(GatewayError::InvalidState { .. })));
        let experience = store.get_experience(experience.id).await.unwrap();
        assert_eq!(experience.version, published.version);
    }

    #[tokio::test]
    async fn test_retry_resets_failing_stage_and_enqueues() {
        let (gateway, store, queue) = test_gateway();
        let (_, mut job) = gateway.create_project(test_request()).await.unwrap();

        // Fail midway through LOD baking.
        job.status = JobStatus::Processing;
        job.advance_to(Stage::LodBaking);
        job.record_progress(Stage::LodBaking, 40);
        job.mark_failed("simulated fault");
        store.upsert_job(&job).await.unwrap();

        let retried = gateway.retry(job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Processing);
        assert_eq!(retried.current_stage, Stage::LodBaking);
        assert_eq!(retried.progress(Stage::LodBaking), 0);
        assert!(retried.finished_at.is_none());

        // One item from creation plus the retry item.
        assert_eq!(queue.stats().await.unwrap().ready, 2);
    }

    #[tokio::test]
    async fn test_retry_requires_failed_status() {
        let (gateway, _store, _queue) = test_gateway();
        let (_, job) = gateway.create_project(test_request()).await.unwrap();

        let result = gateway.retry(job.id).await;
        assert!(matches!(result, Err(GatewayError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let (gateway, store, _queue) = test_gateway();
        let (_, job) = gateway.create_project(test_request()).await.unwrap();

        let cancelled = gateway.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);

        // A terminal job cannot be cancelled again.
        let result = gateway.cancel(job.id).await;
        assert!(matches!(result, Err(GatewayError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let (gateway, _store, _queue) = test_gateway();

        let result = gateway.get_job(Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(GatewayError::Store(StoreError::JobNotFound(_)))
        ));
    }
}

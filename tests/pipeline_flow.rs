//! End-to-end pipeline tests over the in-memory backends.
//!
//! These tests run a real worker pool against the in-memory queue and store
//! with a fast simulated executor, driving jobs through the full stage order.

use std::sync::Arc;
use std::time::Duration;

use volusphere::gateway::{Gateway, ProjectRequest};
use volusphere::manifest::ManifestWriter;
use volusphere::pipeline::{
    SimulatedExecutor, Stage, WorkerPool, WorkerPoolConfig, WORK_STAGES,
};
use volusphere::queue::{InMemoryWorkQueue, WorkQueue};
use volusphere::store::{InMemoryStore, Interpolation, Job, JobStatus, JobStore, Quality};

struct Harness {
    store: Arc<InMemoryStore>,
    queue: Arc<InMemoryWorkQueue>,
    gateway: Gateway,
    _manifest_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with_queue(Arc::new(InMemoryWorkQueue::new()))
}

fn harness_with_queue(queue: Arc<InMemoryWorkQueue>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let manifest_dir = tempfile::tempdir().unwrap();
    let manifests = ManifestWriter::new(manifest_dir.path()).unwrap();
    let gateway = Gateway::new(store.clone(), queue.clone(), manifests);
    Harness {
        store,
        queue,
        gateway,
        _manifest_dir: manifest_dir,
    }
}

fn fast_executor() -> SimulatedExecutor {
    SimulatedExecutor::new()
        .with_step_delay(Duration::from_millis(1))
        .with_step_size(50)
}

fn pool(h: &Harness, executor: SimulatedExecutor) -> WorkerPool {
    WorkerPool::new(
        WorkerPoolConfig::new(2)
            .with_poll_interval(Duration::from_millis(20))
            .with_sweep_interval(Duration::from_millis(100)),
        h.queue.clone(),
        h.store.clone(),
        Arc::new(executor),
    )
}

fn request() -> ProjectRequest {
    ProjectRequest::new("Neon Parkour Run", "Rooftop volumetric capture")
        .with_devices(vec!["android_xr".to_string(), "quest".to_string()])
        .with_mr_ready(true)
        .with_quality(Quality::Ultra)
        .with_interpolation(Interpolation::Fps120)
}

/// Polls the store until the job satisfies `pred` or the timeout elapses.
async fn wait_for_job(
    store: &Arc<InMemoryStore>,
    id: uuid::Uuid,
    pred: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = store.get_job(id).await.unwrap();
        if pred(&job) {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "timed out waiting for job {}; status {} at {} ({}%)",
                id,
                job.status,
                job.current_stage,
                job.progress(job.current_stage)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn full_pipeline_reaches_ready_to_publish() {
    let h = harness();
    let (_, job) = h.gateway.create_project(request()).await.unwrap();

    let mut pool = pool(&h, fast_executor());
    pool.start().await.unwrap();

    let finished = wait_for_job(&h.store, job.id, |j| j.status.is_terminal()).await;
    pool.shutdown().await.unwrap();

    assert_eq!(finished.status, JobStatus::ReadyToPublish);
    assert_eq!(finished.current_stage, Stage::Complete);
    assert!(finished.finished_at.is_some());

    // Every one of the 7 work stages recorded full progress.
    for stage in WORK_STAGES {
        assert_eq!(finished.progress(stage), 100, "stage {} incomplete", stage);
    }
    assert!(finished.all_stages_complete());

    // The queue drained: nothing ready, nothing leased.
    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.total(), 0);

    // Transition log entries name both stages.
    assert!(finished
        .logs
        .iter()
        .any(|l| l.contains("Ingest complete") && l.contains("Reconstruct")));
    assert!(finished
        .logs
        .iter()
        .any(|l| l.contains("Pipeline complete")));

    let completed = pool.stats();
    assert_eq!(completed.stages_completed, WORK_STAGES.len() as u64);
    assert_eq!(completed.jobs_completed, 1);
}

#[tokio::test]
async fn stage_failure_is_terminal_at_the_failing_stage() {
    let h = harness();
    let (_, job) = h.gateway.create_project(request()).await.unwrap();

    let mut pool = pool(&h, fast_executor().with_failure_at(Stage::LodBaking));
    pool.start().await.unwrap();

    let failed = wait_for_job(&h.store, job.id, |j| j.status.is_terminal()).await;
    pool.shutdown().await.unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.current_stage, Stage::LodBaking);
    assert!(failed.finished_at.is_some());

    // Stages before the failure completed; nothing after it ran.
    assert_eq!(failed.progress(Stage::Interpolation), 100);
    assert_eq!(failed.progress(Stage::Packaging), 0);
    assert_eq!(failed.progress(Stage::CdnPublish), 0);

    // No further work item was enqueued for this job.
    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.total(), 0);

    assert!(failed.logs.iter().any(|l| l.contains("LOD Baking failed")));
}

#[tokio::test]
async fn retry_resumes_at_the_failing_stage() {
    let h = harness();
    let (_, job) = h.gateway.create_project(request()).await.unwrap();

    // First run fails at packaging.
    let mut failing_pool = pool(&h, fast_executor().with_failure_at(Stage::Packaging));
    failing_pool.start().await.unwrap();
    wait_for_job(&h.store, job.id, |j| j.status == JobStatus::Failed).await;
    failing_pool.shutdown().await.unwrap();

    // Retry with a healthy executor.
    let retried = h.gateway.retry(job.id).await.unwrap();
    assert_eq!(retried.status, JobStatus::Processing);
    assert_eq!(retried.current_stage, Stage::Packaging);
    assert_eq!(retried.progress(Stage::Packaging), 0);

    let mut healthy_pool = pool(&h, fast_executor());
    healthy_pool.start().await.unwrap();
    let finished = wait_for_job(&h.store, job.id, |j| j.status.is_terminal()).await;
    healthy_pool.shutdown().await.unwrap();

    assert_eq!(finished.status, JobStatus::ReadyToPublish);
    assert!(finished.all_stages_complete());
}

#[tokio::test]
async fn publish_increments_version_once_and_stores_notes() {
    let h = harness();
    let (experience, job) = h.gateway.create_project(request()).await.unwrap();
    assert_eq!(experience.version, 0);

    let mut pool = pool(&h, fast_executor());
    pool.start().await.unwrap();
    wait_for_job(&h.store, job.id, |j| j.status == JobStatus::ReadyToPublish).await;
    pool.shutdown().await.unwrap();

    let published = h.gateway.publish(job.id, "v2 fixes").await.unwrap();
    assert_eq!(published.version, 1);
    assert_eq!(published.release_notes.as_deref(), Some("v2 fixes"));

    let job_after = h.store.get_job(job.id).await.unwrap();
    assert_eq!(job_after.status, JobStatus::Published);

    // A second publish is rejected and must not double-increment.
    assert!(h.gateway.publish(job.id, "again").await.is_err());
    let experience_after = h.store.get_experience(experience.id).await.unwrap();
    assert_eq!(experience_after.version, 1);
}

#[tokio::test]
async fn cancellation_stops_a_processing_job() {
    let h = harness();
    let (_, job) = h.gateway.create_project(request()).await.unwrap();

    // Slow enough that the job is still mid-stage when we cancel.
    let slow = SimulatedExecutor::new()
        .with_step_delay(Duration::from_millis(30))
        .with_step_size(10);
    let mut pool = pool(&h, slow);
    pool.start().await.unwrap();

    wait_for_job(&h.store, job.id, |j| j.status == JobStatus::Processing).await;
    let cancelled = h.gateway.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    // The worker notices at its next progress report and abandons the
    // stage; the job must stay cancelled and the queue must drain.
    tokio::time::sleep(Duration::from_millis(300)).await;
    pool.shutdown().await.unwrap();

    let after = h.store.get_job(job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert!(!after.all_stages_complete());

    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.total(), 0);
}

#[tokio::test]
async fn stage_order_is_a_strict_prefix_of_the_fixed_order() {
    let h = harness();
    let (_, job) = h.gateway.create_project(request()).await.unwrap();

    let mut pool = pool(&h, fast_executor());
    pool.start().await.unwrap();

    // Sample the current stage until terminal; indices must never regress.
    let mut last_index = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = h.store.get_job(job.id).await.unwrap();
        if let Some(index) = current.current_stage.index() {
            assert!(index >= last_index, "stage order regressed");
            last_index = index;
        }
        if current.status.is_terminal() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn expired_lease_redelivery_advances_each_stage_once() {
    // Leases expire instantly and the sweeper runs constantly, so every
    // in-flight item is redelivered to other workers while the first one
    // is still executing. Only the first finisher may advance the job;
    // late duplicates retire without touching the transition record.
    let h = harness_with_queue(Arc::new(InMemoryWorkQueue::with_lease_ttl(
        Duration::from_millis(0),
    )));
    let (_, job) = h.gateway.create_project(request()).await.unwrap();

    // Slow enough that duplicates pile up on every stage.
    let executor = SimulatedExecutor::new()
        .with_step_delay(Duration::from_millis(5))
        .with_step_size(25);
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(4)
            .with_poll_interval(Duration::from_millis(5))
            .with_sweep_interval(Duration::from_millis(2)),
        h.queue.clone(),
        h.store.clone(),
        Arc::new(executor),
    );
    pool.start().await.unwrap();

    let finished = wait_for_job(&h.store, job.id, |j| j.status.is_terminal()).await;
    // Let the trailing duplicates drain against the terminal record.
    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.shutdown().await.unwrap();

    assert_eq!(finished.status, JobStatus::ReadyToPublish);
    assert!(finished.all_stages_complete());

    // Exactly one transition per consecutive stage pair, and exactly one
    // finalization; a duplicate advance would log a second copy.
    for pair in WORK_STAGES.windows(2) {
        let transition = format!("{} complete, {} queued", pair[0], pair[1]);
        let seen = finished
            .logs
            .iter()
            .filter(|l| l.contains(&transition))
            .count();
        assert_eq!(seen, 1, "stage {} advanced {} times", pair[0], seen);
    }
    let finalized = finished
        .logs
        .iter()
        .filter(|l| l.contains("Pipeline complete"))
        .count();
    assert_eq!(finalized, 1);
}

#[tokio::test]
async fn concurrent_jobs_interleave_without_interference() {
    let h = harness();
    let (_, job_a) = h.gateway.create_project(request()).await.unwrap();
    let (_, job_b) = h
        .gateway
        .create_project(
            ProjectRequest::new("Orchestra Hall", "Concert capture")
                .with_devices(vec!["quest".to_string()]),
        )
        .await
        .unwrap();

    let mut pool = pool(&h, fast_executor());
    pool.start().await.unwrap();

    let done_a = wait_for_job(&h.store, job_a.id, |j| j.status.is_terminal()).await;
    let done_b = wait_for_job(&h.store, job_b.id, |j| j.status.is_terminal()).await;
    pool.shutdown().await.unwrap();

    assert_eq!(done_a.status, JobStatus::ReadyToPublish);
    assert_eq!(done_b.status, JobStatus::ReadyToPublish);
    assert_eq!(pool.stats().jobs_completed, 2);
}

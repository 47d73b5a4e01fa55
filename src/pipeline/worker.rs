//! Worker pool turning queued work items into job progress.
//!
//! A pool of workers pulls `(job_id, stage)` items from the shared work
//! queue. Each worker runs as an independent async task: it looks up the
//! job record, runs the stage executor while persisting progress updates,
//! and on completion either advances the job one stage and enqueues the
//! successor, or finalizes the job. A separate sweeper task periodically
//! returns expired leases to the queue so crashed workers cannot strand a
//! job at partial progress.
//!
//! # Guarantees
//!
//! - A job never has two stages in flight: the successor item is enqueued
//!   only after the current stage's completion is durably recorded.
//! - Stage failures are terminal for the job, never for the worker: the
//!   worker records the failure and moves on to unrelated jobs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::queue::{LeasedItem, QueueError, WorkItem, WorkQueue};
use crate::store::{JobStore, StoreError};

use super::executor::{ProgressReporter, StageAborted, StageError, StageExecutor};
use super::stage::Stage;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a dequeue waits before re-checking for shutdown.
    pub poll_interval: Duration,
    /// How often the sweeper redelivers expired leases.
    pub sweep_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the lease sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently executing a stage.
    pub active_workers: usize,
    /// Total stage executions that succeeded.
    pub stages_completed: u64,
    /// Total stage executions that failed.
    pub stages_failed: u64,
    /// Jobs driven to the end of the pipeline by this pool.
    pub jobs_completed: u64,
    /// Average stage execution duration.
    pub average_stage_duration: Duration,
}

impl PoolStats {
    /// Total stage executions (completed + failed).
    pub fn total_stages(&self) -> u64 {
        self.stages_completed + self.stages_failed
    }
}

/// Shared atomic counters behind [`PoolStats`].
struct SharedPoolStats {
    stages_completed: AtomicU64,
    stages_failed: AtomicU64,
    jobs_completed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            stages_completed: AtomicU64::new(0),
            stages_failed: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_stage_completed(&self, duration: Duration) {
        self.stages_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_stage_failed(&self, duration: Duration) {
        self.stages_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        metrics::set_active_workers(self.active_workers.load(Ordering::SeqCst) as i64);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        metrics::set_active_workers(self.active_workers.load(Ordering::SeqCst) as i64);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.stages_completed.load(Ordering::SeqCst);
        let failed = self.stages_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let total = completed + failed;

        let average = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            stages_completed: completed,
            stages_failed: failed,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            average_stage_duration: average,
        }
    }
}

/// Worker pool managing N workers and the lease sweeper.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn StageExecutor>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool over the given queue, store and executor.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn StageExecutor>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            store,
            executor,
            shutdown_tx,
            handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts the workers and the lease sweeper.
    ///
    /// Any leases left over from a previous crashed run are redelivered
    /// before workers begin polling.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.queue.redeliver_expired().await {
            Ok(redelivered) if redelivered > 0 => {
                info!(redelivered, "Redelivered expired leases at startup");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to redeliver expired leases at startup");
            }
        }

        // Lease sweeper
        {
            let queue = Arc::clone(&self.queue);
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let sweep_interval = self.config.sweep_interval;

            self.handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match queue.redeliver_expired().await {
                                Ok(n) if n > 0 => info!(redelivered = n, "Lease sweep redelivered items"),
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "Lease sweep failed"),
                            }
                            if let Ok(stats) = queue.stats().await {
                                metrics::set_queue_depth(stats.ready as i64, stats.in_flight as i64);
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                store: Arc::clone(&self.store),
                executor: Arc::clone(&self.executor),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
            };

            self.handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down the pool, waiting for in-flight stages.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers do not stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped; a send error is fine.
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// Persists executor progress updates onto the job record.
///
/// Also the cancellation checkpoint: when the job left `Processing`
/// (cancelled, or failed through another path), the next report aborts the
/// executor.
struct StoreProgress {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    stage: Stage,
}

#[async_trait]
impl ProgressReporter for StoreProgress {
    async fn report(&self, percent: u8) -> Result<(), StageAborted> {
        let mut job = match self.store.get_job(self.job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Progress persist failed, aborting stage");
                return Err(StageAborted);
            }
        };

        if job.status != crate::store::JobStatus::Processing {
            debug!(
                job_id = %self.job_id,
                status = %job.status,
                "Job left Processing, aborting stage"
            );
            return Err(StageAborted);
        }

        job.record_progress(self.stage, percent);
        if let Err(e) = self.store.upsert_job(&job).await {
            warn!(job_id = %self.job_id, error = %e, "Progress persist failed, aborting stage");
            return Err(StageAborted);
        }

        Ok(())
    }
}

/// A single worker processing items from the queue.
struct Worker {
    id: String,
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn StageExecutor>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop: poll, process, repeat until shutdown.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(leased)) => {
                    self.process_item(leased).await;
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No work available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue work item");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes one leased work item.
    async fn process_item(&self, leased: LeasedItem) {
        let WorkItem { job_id, stage } = leased.item;

        let job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(StoreError::JobNotFound(_)) => {
                // No job to report progress on; there is no requester to
                // notify asynchronously, so the item is dead-lettered.
                warn!(worker_id = %self.id, job_id = %job_id, "Work item references missing job");
                if let Err(e) = self.queue.fail(&leased, "job record missing").await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to dead-letter item");
                }
                return;
            }
            Err(e) => {
                // Store unavailable: leave the lease unacked so the item is
                // redelivered once the store recovers.
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to load job record");
                return;
            }
        };

        if job.status.is_terminal() {
            debug!(
                worker_id = %self.id,
                job_id = %job_id,
                status = %job.status,
                "Dropping work item for terminal job"
            );
            self.ack(&leased).await;
            return;
        }

        if job.current_stage != stage {
            self.handle_stale_item(&leased, &job).await;
            return;
        }

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            stage = %stage,
            "Executing stage"
        );

        // First delivery for a queued job flips it to Processing.
        if job.status == crate::store::JobStatus::Queued {
            let mut job = job;
            job.status = crate::store::JobStatus::Processing;
            job.append_log(format!("{} started", stage));
            if let Err(e) = self.store.upsert_job(&job).await {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to start job");
                return;
            }
        }

        self.stats.increment_active();
        let start = Instant::now();

        let reporter = StoreProgress {
            store: Arc::clone(&self.store),
            job_id,
            stage,
        };
        let result = self.executor.execute(job_id, stage, &reporter).await;

        let duration = start.elapsed();
        self.stats.decrement_active();

        match result {
            Ok(()) => {
                self.stats.record_stage_completed(duration);
                metrics::record_stage(stage, "completed", duration.as_secs_f64());
                self.complete_stage(&leased, job_id, stage).await;
            }
            Err(StageError::Failed(msg)) => {
                self.stats.record_stage_failed(duration);
                metrics::record_stage(stage, "failed", duration.as_secs_f64());
                self.fail_stage(&leased, job_id, stage, &msg).await;
            }
            Err(StageError::Aborted(_)) => {
                self.handle_abort(&leased, job_id, stage).await;
            }
        }
    }

    /// Records stage completion and either advances the job or finalizes it.
    ///
    /// The successor item is enqueued only after the advanced job record is
    /// persisted, preserving at-most-one-active-stage-per-job; the lease is
    /// acked last so a crash anywhere in between redelivers rather than
    /// loses the item.
    async fn complete_stage(&self, leased: &LeasedItem, job_id: Uuid, stage: Stage) {
        let mut job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to load job for completion");
                return;
            }
        };

        // Cancelled between the last progress report and completion; the
        // terminal status wins.
        if job.status.is_terminal() {
            self.ack(leased).await;
            return;
        }

        // A redelivered duplicate can finish after another delivery of the
        // same item already advanced the job. Advancing again would reset
        // the in-flight successor's progress and enqueue a duplicate item,
        // so the late finisher retires its lease through the stale path.
        if job.current_stage != stage {
            self.handle_stale_item(leased, &job).await;
            return;
        }

        job.record_progress(stage, 100);

        match stage.next() {
            Some(next) => {
                job.advance_to(next);
                if let Err(e) = self.store.upsert_job(&job).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to persist stage completion");
                    return;
                }

                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    from = %stage,
                    to = %next,
                    "Stage complete, enqueueing successor"
                );

                if let Err(e) = self.queue.enqueue(WorkItem::new(job_id, next)).await {
                    // Completion is recorded; the stale-item path recovers
                    // the missing successor on redelivery.
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to enqueue successor stage");
                    return;
                }
            }
            None => {
                job.mark_complete();
                if let Err(e) = self.store.upsert_job(&job).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to persist job completion");
                    return;
                }

                self.stats.record_job_completed();
                metrics::record_pipeline_completed();
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    "Pipeline complete, job ready to publish"
                );
            }
        }

        self.ack(leased).await;
    }

    /// Records a stage failure. The job becomes terminal at the failing
    /// stage; nothing further is enqueued.
    async fn fail_stage(&self, leased: &LeasedItem, job_id: Uuid, stage: Stage, message: &str) {
        let mut job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to load job for failure");
                return;
            }
        };

        if job.status.is_terminal() {
            self.ack(leased).await;
            return;
        }

        // Same stale-duplicate window as completion: the job already moved
        // past this stage, so the failure belongs to a superseded delivery.
        if job.current_stage != stage {
            self.handle_stale_item(leased, &job).await;
            return;
        }

        job.mark_failed(message);
        if let Err(e) = self.store.upsert_job(&job).await {
            error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to persist job failure");
            return;
        }

        warn!(
            worker_id = %self.id,
            job_id = %job_id,
            stage = %stage,
            error = message,
            "Stage failed, job terminal"
        );

        self.ack(leased).await;
    }

    /// An aborted execution is either an external cancellation (ack and
    /// move on) or store trouble (leave the lease to expire and redeliver).
    async fn handle_abort(&self, leased: &LeasedItem, job_id: Uuid, stage: Stage) {
        match self.store.get_job(job_id).await {
            Ok(job) if job.status.is_terminal() => {
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    stage = %stage,
                    status = %job.status,
                    "Stage abandoned after external termination"
                );
                self.ack(leased).await;
            }
            Ok(_) | Err(_) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    stage = %stage,
                    "Stage aborted without terminal status, leaving lease for redelivery"
                );
            }
        }
    }

    /// A delivered item whose stage no longer matches the job record.
    ///
    /// This happens when a lease expired after the stage completed (before
    /// the successor enqueue or the ack), or when a redelivered duplicate
    /// outlived the delivery that advanced the job. The recorded 100% tells
    /// us completion happened, so re-enqueue the authoritative current
    /// stage in case its item was lost, and retire the stale item. The
    /// queue tolerates duplicate items; advancing twice is what must never
    /// happen.
    async fn handle_stale_item(&self, leased: &LeasedItem, job: &crate::store::Job) {
        let stage = leased.item.stage;

        if job.status == crate::store::JobStatus::Processing && job.progress(stage) == 100 {
            debug!(
                worker_id = %self.id,
                job_id = %job.id,
                stale_stage = %stage,
                current_stage = %job.current_stage,
                "Recovering possibly lost successor item"
            );
            if let Err(e) = self
                .queue
                .enqueue(WorkItem::new(job.id, job.current_stage))
                .await
            {
                error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to re-enqueue current stage");
                return;
            }
        } else {
            warn!(
                worker_id = %self.id,
                job_id = %job.id,
                stale_stage = %stage,
                current_stage = %job.current_stage,
                "Dropping stale work item"
            );
        }

        self.ack(leased).await;
    }

    async fn ack(&self, leased: &LeasedItem) {
        if let Err(e) = self.queue.ack(leased).await {
            error!(worker_id = %self.id, job_id = %leased.item.job_id, error = %e, "Failed to ack work item");
        }
    }
}

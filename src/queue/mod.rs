//! Durable work queue carrying `(job_id, stage)` items to workers.
//!
//! The queue decouples job submission from execution. Each item is delivered
//! to exactly one worker at a time under a time-bounded lease; a worker that
//! crashes before acking loses its lease and the item is redelivered by the
//! lease sweep, giving at-least-once delivery.
//!
//! No cross-job ordering is guaranteed. Intra-job stage order is preserved
//! by construction: stage N+1 is only enqueued after stage N's completion is
//! durably recorded on the job.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::Stage;

pub use memory::InMemoryWorkQueue;
pub use redis::RedisWorkQueue;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the queue backend.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Backend operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Failed to serialize or deserialize an item.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lease being acked or failed is not held.
    #[error("Lease {0} not found")]
    LeaseNotFound(Uuid),
}

/// A queue message requesting execution of one stage of one job.
///
/// Ephemeral: its existence means "this job's stage is pending execution or
/// in flight". The job record's `current_stage` stays authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// The job to progress.
    pub job_id: Uuid,
    /// The stage to execute.
    pub stage: Stage,
}

impl WorkItem {
    /// Creates a new work item.
    pub fn new(job_id: Uuid, stage: Stage) -> Self {
        Self { job_id, stage }
    }
}

/// A work item held by a worker under a time-bounded lease.
///
/// The lease id identifies this delivery; acking or failing requires it.
/// Once `deadline` passes without an ack the sweep makes the item
/// redeliverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeasedItem {
    /// The delivered work item.
    pub item: WorkItem,
    /// Unique id for this delivery.
    pub lease_id: Uuid,
    /// When the lease expires and the item becomes redeliverable.
    pub deadline: DateTime<Utc>,
}

/// Queue depth snapshot for dashboards and metrics.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Items waiting for delivery.
    pub ready: usize,
    /// Items delivered and not yet acked.
    pub in_flight: usize,
    /// Items dead-lettered by `fail`.
    pub dead_letter: usize,
}

impl QueueStats {
    /// Total items across all queue sections.
    pub fn total(&self) -> usize {
        self.ready + self.in_flight + self.dead_letter
    }
}

/// Durable, at-least-once delivery channel for work items.
///
/// Implementations must deliver each item to exactly one worker at a time
/// and support redelivery of items whose lease expired before an ack.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Adds a work item. Succeeds or reports failure atomically with respect
    /// to the caller: once `enqueue` returns `Ok`, the stage will eventually
    /// be attempted at least once.
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Pulls the next item, waiting up to `timeout` when the queue is empty.
    ///
    /// Returns `None` if the timeout elapsed with no item available. The
    /// returned lease must be acked or failed when the work concludes.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<LeasedItem>, QueueError>;

    /// Signals successful completion of a leased item, releasing the lease.
    async fn ack(&self, leased: &LeasedItem) -> Result<(), QueueError>;

    /// Dead-letters a leased item that must not be redelivered.
    async fn fail(&self, leased: &LeasedItem, error: &str) -> Result<(), QueueError>;

    /// Returns expired in-flight items to the ready queue.
    ///
    /// Called periodically by the lease sweeper and once at worker startup.
    /// Returns the number of items redelivered.
    async fn redeliver_expired(&self) -> Result<usize, QueueError>;

    /// Returns the current queue depth snapshot.
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

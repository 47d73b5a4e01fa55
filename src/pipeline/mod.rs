//! The volumetric processing pipeline.
//!
//! This module provides the stage model and the execution machinery that
//! drives a capture job through it.
//!
//! # Architecture
//!
//! The pipeline consists of several components:
//!
//! - **Stage**: The ordered seven-stage model a job moves through
//! - **Executor**: The pluggable unit of work behind each stage
//! - **WorkerPool**: N worker tasks pulling stage items from the queue
//! - **Config**: Configuration for workers, queue timing and backends
//!
//! # Pipeline Flow
//!
//! 1. **Creation**: The gateway creates an experience, a job at the first
//!    stage, and the initial work item
//! 2. **Dequeue**: A worker leases the item and loads the job record
//! 3. **Execution**: The stage executor runs, streaming progress updates
//!    that are persisted onto the job record
//! 4. **Advance**: On success the job moves to the next stage and a new
//!    item is enqueued; after the final stage the job is ready to publish
//! 5. **Failure**: A failed stage terminates the job in place; operators
//!    retry it later from the failing stage
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use volusphere::pipeline::{PipelineConfig, SimulatedExecutor, WorkerPool, WorkerPoolConfig};
//! use volusphere::queue::InMemoryWorkQueue;
//! use volusphere::store::InMemoryStore;
//!
//! let queue = Arc::new(InMemoryWorkQueue::new());
//! let store = Arc::new(InMemoryStore::new());
//! let executor = Arc::new(SimulatedExecutor::new());
//!
//! let mut pool = WorkerPool::new(
//!     WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(250)),
//!     queue,
//!     store,
//!     executor,
//! );
//! pool.start().await?;
//! ```

pub mod config;
pub mod executor;
pub mod stage;
pub mod worker;

pub use config::{ConfigError, PipelineConfig};
pub use executor::{ProgressReporter, SimulatedExecutor, StageAborted, StageError, StageExecutor};
pub use stage::{Stage, WORK_STAGES};
pub use worker::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};

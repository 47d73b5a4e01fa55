//! Durable keyed storage for job and experience records.
//!
//! The store is the leaf dependency of the pipeline: the gateway creates
//! records here, the worker mutates job records as stages progress, and
//! dashboards read them back.
//!
//! # Concurrency contract
//!
//! A job's record is conceptually single-writer: only the worker holding the
//! job's active work-item lease mutates it, which the pipeline's
//! at-most-one-active-stage-per-job guarantee enforces. Implementations must
//! still serialize concurrent access across different jobs without
//! serializing unrelated jobs against each other.

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod records;
pub mod schema;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use postgres::PostgresStore;
pub use records::{
    Experience, ExperienceStatus, Interpolation, Job, JobStatus, Manifest, ManifestAssets, Quality,
};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the backing store failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Referenced record does not exist.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// Referenced experience does not exist.
    #[error("Experience {0} not found")]
    ExperienceNotFound(Uuid),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Durable read/modify/write access to job and experience records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Retrieves a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;

    /// Inserts or replaces a job record.
    async fn upsert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Lists all jobs, most recent first.
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Retrieves an experience by id.
    async fn get_experience(&self, id: Uuid) -> Result<Experience, StoreError>;

    /// Inserts or replaces an experience record.
    async fn upsert_experience(&self, experience: &Experience) -> Result<(), StoreError>;

    /// Lists all experiences, most recent first.
    async fn list_experiences(&self) -> Result<Vec<Experience>, StoreError>;
}

//! volusphere: volumetric video processing pipeline.
//!
//! This library drives volumetric captures through a fixed seven-stage
//! pipeline (ingest through CDN publish) and manages the resulting
//! experiences, their jobs, and the viewer-facing manifests.

// Core modules
pub mod cli;
pub mod gateway;
pub mod manifest;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod store;

// Re-export commonly used types
pub use gateway::{Gateway, GatewayError, ProjectRequest};
pub use manifest::{ManifestError, ManifestWriter};
pub use pipeline::{
    PipelineConfig, SimulatedExecutor, Stage, StageExecutor, WorkerPool, WorkerPoolConfig,
};
pub use queue::{QueueError, WorkItem, WorkQueue};
pub use store::{Experience, Job, JobStatus, JobStore, StoreError};

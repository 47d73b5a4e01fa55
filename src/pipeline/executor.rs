//! Pluggable stage execution.
//!
//! A `StageExecutor` is the unit-of-work capability behind each pipeline
//! stage: given `(job_id, stage)` it performs the transformation, reporting
//! progress along the way, and ends in success or failure. The shipped
//! [`SimulatedExecutor`] stands in for real reconstruction/encoding tooling,
//! which is out of scope for the processing core; production deployments
//! supply their own implementation at pool construction time.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::stage::Stage;

/// Signalled by a [`ProgressReporter`] when the job was cancelled or
/// otherwise terminated externally; the executor must stop work.
#[derive(Debug, Error)]
#[error("Stage aborted: job terminated externally")]
pub struct StageAborted;

/// Outcome errors for a stage execution.
#[derive(Debug, Error)]
pub enum StageError {
    /// The unit of work reported failure; terminal for the job.
    #[error("Stage execution failed: {0}")]
    Failed(String),

    /// The job was cancelled while the stage was running.
    #[error("Stage aborted")]
    Aborted(#[from] StageAborted),
}

/// Receives progress updates from an executor.
///
/// Updates are advisory: correctness depends only on monotonicity and on
/// eventually reaching 100 or failing, not on granularity.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Reports progress in percent (0–100).
    ///
    /// Returns `Err(StageAborted)` when the executor must stop because the
    /// job no longer accepts progress (e.g. it was cancelled).
    async fn report(&self, percent: u8) -> Result<(), StageAborted>;
}

/// The unit of work associated with one pipeline stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Executes `stage` for `job_id`, reporting progress through `progress`.
    async fn execute(
        &self,
        job_id: Uuid,
        stage: Stage,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError>;
}

/// Simulated executor: steps progress from 0 to 100 on a timer.
///
/// Mirrors the behavior of real transformation tooling closely enough to
/// exercise every pipeline path, including failure, without GPU workloads.
/// Fault injection (`fail_at`) drives the failure path in tests and
/// staging environments.
pub struct SimulatedExecutor {
    /// Delay between progress steps.
    step_delay: Duration,
    /// Progress increment per step.
    step_size: u8,
    /// When set, executions of this stage report failure at 40%.
    fail_at: Option<Stage>,
}

impl SimulatedExecutor {
    /// Creates a simulated executor with the production-like default pace
    /// (steps of 20 every 350 ms, roughly 2 seconds per stage).
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_millis(350),
            step_size: 20,
            fail_at: None,
        }
    }

    /// Sets the delay between progress steps.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Sets the progress increment per step (clamped to 1–100).
    pub fn with_step_size(mut self, size: u8) -> Self {
        self.step_size = size.clamp(1, 100);
        self
    }

    /// Injects a failure: executions of `stage` will report failure.
    pub fn with_failure_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        job_id: Uuid,
        stage: Stage,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        let mut percent: u8 = 0;
        loop {
            tokio::time::sleep(self.step_delay).await;

            if self.fail_at == Some(stage) && percent >= 40 {
                return Err(StageError::Failed(format!(
                    "simulated fault injected at {}",
                    stage
                )));
            }

            progress.report(percent).await?;
            debug!(job_id = %job_id, stage = %stage, percent, "Simulated stage progress");

            if percent == 100 {
                return Ok(());
            }
            percent = percent.saturating_add(self.step_size).min(100);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Mutex;

    struct RecordingReporter {
        seen: Mutex<Vec<u8>>,
        abort_at: Option<u8>,
    }

    impl RecordingReporter {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                abort_at: None,
            }
        }

        fn aborting_at(percent: u8) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                abort_at: Some(percent),
            }
        }
    }

    #[async_trait]
    impl ProgressReporter for RecordingReporter {
        async fn report(&self, percent: u8) -> Result<(), StageAborted> {
            if self.abort_at.is_some_and(|at| percent >= at) {
                return Err(StageAborted);
            }
            self.seen.lock().unwrap().push(percent);
            Ok(())
        }
    }

    fn fast_executor() -> SimulatedExecutor {
        SimulatedExecutor::new()
            .with_step_delay(Duration::from_millis(1))
            .with_step_size(25)
    }

    #[tokio::test]
    async fn test_progress_is_monotone_and_reaches_100() {
        let reporter = RecordingReporter::new();
        fast_executor()
            .execute(Uuid::new_v4(), Stage::Ingest, &reporter)
            .await
            .unwrap();

        let seen = reporter.seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let reporter = RecordingReporter::new();
        let result = fast_executor()
            .with_failure_at(Stage::LodBaking)
            .execute(Uuid::new_v4(), Stage::LodBaking, &reporter)
            .await;

        match result {
            Err(StageError::Failed(msg)) => assert!(msg.contains("LOD Baking")),
            other => panic!("expected failure, got {:?}", other.map(|_| ())),
        }

        // Other stages are unaffected by the injection.
        let reporter = RecordingReporter::new();
        fast_executor()
            .with_failure_at(Stage::LodBaking)
            .execute(Uuid::new_v4(), Stage::Packaging, &reporter)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_abort_stops_execution() {
        let reporter = RecordingReporter::aborting_at(50);
        let result = fast_executor()
            .execute(Uuid::new_v4(), Stage::Reconstruct, &reporter)
            .await;

        assert!(matches!(result, Err(StageError::Aborted(_))));
        let seen = reporter.seen.lock().unwrap().clone();
        assert!(seen.iter().all(|p| *p < 50));
    }

    #[tokio::test]
    async fn test_step_size_is_clamped() {
        let counter = AtomicU8::new(0);

        struct CountingReporter<'a>(&'a AtomicU8);

        #[async_trait]
        impl ProgressReporter for CountingReporter<'_> {
            async fn report(&self, _percent: u8) -> Result<(), StageAborted> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let reporter = CountingReporter(&counter);
        SimulatedExecutor::new()
            .with_step_delay(Duration::from_millis(1))
            .with_step_size(0)
            .execute(Uuid::new_v4(), Stage::Ingest, &reporter)
            .await
            .unwrap();

        // Clamped to 1, so 0..=100 reports exactly 101 updates.
        assert_eq!(counter.load(Ordering::SeqCst), 101);
    }
}

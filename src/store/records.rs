//! Record types for experiences, jobs and manifests.
//!
//! This module defines the durable data model of the platform:
//!
//! - `Experience`: a draft or published piece of volumetric content
//! - `Job`: one execution of the processing pipeline against an experience
//! - `Manifest`: the viewer-facing descriptor of an experience's assets
//!
//! Jobs are append-only history: they are never destroyed, only moved
//! through their status lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::Stage;

/// Playback quality tier for an experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Base,
    High,
    Ultra,
}

/// Frame interpolation setting for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Off,
    #[serde(rename = "120fps")]
    Fps120,
    #[serde(rename = "240fps")]
    Fps240,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Base => write!(f, "Base"),
            Quality::High => write!(f, "High"),
            Quality::Ultra => write!(f, "Ultra"),
        }
    }
}

impl std::fmt::Display for Interpolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interpolation::Off => write!(f, "Off"),
            Interpolation::Fps120 => write!(f, "120fps"),
            Interpolation::Fps240 => write!(f, "240fps"),
        }
    }
}

/// Publication status of an experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperienceStatus {
    /// Created at job submission; not visible to viewers.
    Draft,
    /// Published and consumable by viewers.
    Published,
    /// Taken down by moderation (external action).
    Archived,
}

/// A draft or published unit of volumetric content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    /// Unique identifier.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Long-form description.
    pub description: String,
    /// Free-form discovery tags.
    pub tags: Vec<String>,
    /// Target device identifiers (e.g. "android_xr", "quest").
    pub devices: Vec<String>,
    /// Whether the experience supports mixed-reality passthrough.
    pub mr_ready: bool,
    /// Default playback quality tier.
    pub default_quality: Quality,
    /// Default frame interpolation setting.
    pub default_interpolation: Interpolation,
    /// Increases by exactly 1 on each successful publish.
    pub version: u32,
    /// Publication status.
    pub status: ExperienceStatus,
    /// Location of the viewer manifest document.
    pub manifest_url: String,
    /// Poster image location.
    pub poster_url: String,
    /// Optional trailer location (empty when absent).
    pub trailer_url: String,
    /// Release notes recorded at the most recent publish.
    #[serde(default)]
    pub release_notes: Option<String>,
    /// When the experience was created.
    pub created_at: DateTime<Utc>,
}

impl Experience {
    /// Marks the experience published, bumping the version by exactly one
    /// and storing the release notes verbatim.
    pub fn mark_published(&mut self, release_notes: impl Into<String>) {
        self.status = ExperienceStatus::Published;
        self.version += 1;
        self.release_notes = Some(release_notes.into());
    }
}

/// Status of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, waiting for the first stage to begin execution.
    Queued,
    /// A work stage is executing or pending between stages.
    Processing,
    /// A stage reported failure; requires an explicit retry to resume.
    Failed,
    /// Cancelled by an external actor; never resumes.
    Cancelled,
    /// All stages completed; awaiting the publish action.
    ReadyToPublish,
    /// Published; the owning experience is live.
    Published,
}

impl JobStatus {
    /// Returns whether a worker must not make further progress on a job in
    /// this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::ReadyToPublish | JobStatus::Published
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Processing => write!(f, "Processing"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
            JobStatus::ReadyToPublish => write!(f, "ReadyToPublish"),
            JobStatus::Published => write!(f, "Published"),
        }
    }
}

/// One execution of the pipeline against one experience.
///
/// The job record is the single source of truth for pipeline progress. A
/// `WorkItem` on the queue is only a request to progress the job's current
/// stage; `current_stage` here is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning experience.
    pub experience_id: Uuid,
    /// Title snapshot for dashboards.
    pub experience_title: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// The stage currently pending or executing, or a terminal state.
    pub current_stage: Stage,
    /// Per-stage progress percentage, 0–100. Monotone per stage while the
    /// job is `Processing`.
    pub stage_progress: BTreeMap<Stage, u8>,
    /// Ordered human-readable event log.
    pub logs: Vec<String>,
    /// When the job was created.
    pub started_at: DateTime<Utc>,
    /// Set when the job reaches a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Advisory completion estimate; not authoritative.
    #[serde(default)]
    pub eta: Option<String>,
}

impl Job {
    /// Creates a new queued job at the first stage with zero progress.
    pub fn new(experience_id: Uuid, experience_title: impl Into<String>) -> Self {
        let mut stage_progress = BTreeMap::new();
        stage_progress.insert(Stage::first(), 0);

        Self {
            id: Uuid::new_v4(),
            experience_id,
            experience_title: experience_title.into(),
            status: JobStatus::Queued,
            current_stage: Stage::first(),
            stage_progress,
            logs: vec!["Job created and queued for processing".to_string()],
            started_at: Utc::now(),
            finished_at: None,
            eta: Some("15 minutes".to_string()),
        }
    }

    /// Appends a timestamped line to the job log.
    pub fn append_log(&mut self, line: impl Into<String>) {
        self.logs
            .push(format!("[{}] {}", Utc::now().format("%H:%M:%S"), line.into()));
    }

    /// Records a progress update for a stage, clamped to 0–100.
    ///
    /// Progress is monotone within a stage: a value lower than what is
    /// already recorded is ignored rather than applied.
    pub fn record_progress(&mut self, stage: Stage, percent: u8) {
        let percent = percent.min(100);
        let entry = self.stage_progress.entry(stage).or_insert(0);
        if percent > *entry {
            *entry = percent;
        }
    }

    /// Returns the recorded progress for a stage, defaulting to 0.
    pub fn progress(&self, stage: Stage) -> u8 {
        self.stage_progress.get(&stage).copied().unwrap_or(0)
    }

    /// Advances the job exactly one position to `next`, resetting the new
    /// stage's progress to 0. The previous stage keeps its 100%.
    pub fn advance_to(&mut self, next: Stage) {
        let from = self.current_stage;
        self.current_stage = next;
        self.stage_progress.insert(next, 0);
        self.status = JobStatus::Processing;
        self.append_log(format!("{} complete, {} queued", from, next));
    }

    /// Marks the pipeline complete: all stages done, awaiting publish.
    pub fn mark_complete(&mut self) {
        self.current_stage = Stage::Complete;
        self.status = JobStatus::ReadyToPublish;
        self.finished_at = Some(Utc::now());
        self.eta = None;
        self.append_log("Pipeline complete, ready to publish");
    }

    /// Marks the job failed at its current stage. The stage is preserved so
    /// operators can see where it died.
    pub fn mark_failed(&mut self, error: impl std::fmt::Display) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.eta = None;
        let stage = self.current_stage;
        self.append_log(format!("{} failed: {}", stage, error));
    }

    /// Marks the job cancelled by an external actor.
    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.eta = None;
        self.append_log("Job cancelled");
    }

    /// Returns whether every work stage has recorded 100% progress.
    pub fn all_stages_complete(&self) -> bool {
        crate::pipeline::WORK_STAGES
            .iter()
            .all(|stage| self.progress(*stage) == 100)
    }
}

/// Asset locations referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAssets {
    /// Primary volumetric asset (splat archive).
    pub primary: String,
    /// Poster image.
    pub poster: String,
    /// Optional trailer (empty when absent).
    pub trailer: String,
}

/// The static descriptor consumed by viewer clients.
///
/// Written once at experience creation; overwrite is the only write path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Owning experience id.
    pub id: Uuid,
    /// Device capability list.
    pub devices: Vec<String>,
    /// Mixed-reality readiness flag.
    pub mr_ready: bool,
    /// Default playback quality.
    pub default_quality: Quality,
    /// Default interpolation setting.
    pub default_interpolation: Interpolation,
    /// Asset locations.
    pub assets: ManifestAssets,
}

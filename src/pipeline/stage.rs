//! The pipeline stage state machine.
//!
//! Every job walks the same fixed seven-stage order:
//!
//! `Ingest → Reconstruct → TemporalStabilization → Interpolation →
//! LodBaking → Packaging → CdnPublish`
//!
//! followed by the terminal `Complete` state, with `Failed` reachable from
//! any work stage. The order is static and identical for every job; there is
//! no per-job skipping or branching, so a stage's index doubles as a
//! comparable progress indicator.

use serde::{Deserialize, Serialize};

/// One step of the processing pipeline, or a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Upload intake and validation of the raw capture.
    Ingest,
    /// Volumetric reconstruction (Gaussian splats).
    Reconstruct,
    /// Temporal stabilization across frames.
    TemporalStabilization,
    /// Frame interpolation for high-refresh playback.
    Interpolation,
    /// Level-of-detail baking.
    LodBaking,
    /// Asset packaging.
    Packaging,
    /// Publication to the CDN.
    CdnPublish,
    /// All work stages finished successfully.
    Complete,
    /// A work stage reported failure; the job stopped there.
    Failed,
}

/// The seven work stages in execution order.
///
/// Terminal states (`Complete`, `Failed`) are deliberately absent: they are
/// never enqueued and never executed.
pub const WORK_STAGES: [Stage; 7] = [
    Stage::Ingest,
    Stage::Reconstruct,
    Stage::TemporalStabilization,
    Stage::Interpolation,
    Stage::LodBaking,
    Stage::Packaging,
    Stage::CdnPublish,
];

impl Stage {
    /// Returns the stage immediately following this one in the fixed order.
    ///
    /// Returns `None` for the last work stage (`CdnPublish`) and for the
    /// terminal states, which have no successor.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Ingest => Some(Stage::Reconstruct),
            Stage::Reconstruct => Some(Stage::TemporalStabilization),
            Stage::TemporalStabilization => Some(Stage::Interpolation),
            Stage::Interpolation => Some(Stage::LodBaking),
            Stage::LodBaking => Some(Stage::Packaging),
            Stage::Packaging => Some(Stage::CdnPublish),
            Stage::CdnPublish | Stage::Complete | Stage::Failed => None,
        }
    }

    /// Returns whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// Returns whether this is one of the seven executable work stages.
    pub fn is_work_stage(self) -> bool {
        !self.is_terminal()
    }

    /// Returns the zero-based position of a work stage in the fixed order.
    ///
    /// Terminal states have no position. Useful for "is stage A before
    /// stage B" comparisons in dashboards.
    pub fn index(self) -> Option<usize> {
        WORK_STAGES.iter().position(|s| *s == self)
    }

    /// The first stage every new job starts at.
    pub fn first() -> Stage {
        Stage::Ingest
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Ingest => "Ingest",
            Stage::Reconstruct => "Reconstruct (Gaussian Splats)",
            Stage::TemporalStabilization => "Temporal Stabilization",
            Stage::Interpolation => "Interpolation",
            Stage::LodBaking => "LOD Baking",
            Stage::Packaging => "Packaging",
            Stage::CdnPublish => "CDN Publish",
            Stage::Complete => "Complete",
            Stage::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_stage_order() {
        // Walking `next` from Ingest visits exactly WORK_STAGES in order.
        let mut visited = vec![Stage::first()];
        while let Some(next) = visited.last().copied().and_then(Stage::next) {
            visited.push(next);
        }
        assert_eq!(visited, WORK_STAGES.to_vec());
    }

    #[test]
    fn test_last_work_stage_has_no_successor() {
        assert_eq!(Stage::CdnPublish.next(), None);
    }

    #[test]
    fn test_terminal_states_have_no_successor() {
        assert_eq!(Stage::Complete.next(), None);
        assert_eq!(Stage::Failed.next(), None);
    }

    #[test]
    fn test_is_terminal() {
        assert!(Stage::Complete.is_terminal());
        assert!(Stage::Failed.is_terminal());
        for stage in WORK_STAGES {
            assert!(!stage.is_terminal());
            assert!(stage.is_work_stage());
        }
    }

    #[test]
    fn test_index_is_comparable_progress() {
        assert_eq!(Stage::Ingest.index(), Some(0));
        assert_eq!(Stage::CdnPublish.index(), Some(6));
        assert!(Stage::Reconstruct.index() < Stage::LodBaking.index());
        assert_eq!(Stage::Complete.index(), None);
        assert_eq!(Stage::Failed.index(), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Stage::Reconstruct.to_string(), "Reconstruct (Gaussian Splats)");
        assert_eq!(Stage::LodBaking.to_string(), "LOD Baking");
        assert_eq!(Stage::CdnPublish.to_string(), "CDN Publish");
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Stage::TemporalStabilization).unwrap();
        assert_eq!(json, "\"temporal_stabilization\"");
        let parsed: Stage = serde_json::from_str("\"lod_baking\"").unwrap();
        assert_eq!(parsed, Stage::LodBaking);
    }
}

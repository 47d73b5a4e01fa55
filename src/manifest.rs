//! Viewer-facing manifest documents.
//!
//! A manifest is the static per-experience descriptor consumed by XR viewer
//! clients: device capabilities, playback defaults and asset locations. It
//! is produced once at experience creation and is only ever replaced whole;
//! there are no partial or streaming updates.

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::store::Manifest;

/// Errors that can occur while reading or writing manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest document could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No manifest exists for the experience.
    #[error("Manifest for experience {0} not found")]
    NotFound(Uuid),
}

/// Writes and reads manifest documents under a root directory.
///
/// Documents are stored as `<root>/<experience-id>.json`, pretty-printed for
/// the static-file boundary that serves them to viewers.
pub struct ManifestWriter {
    root: PathBuf,
}

impl ManifestWriter {
    /// Creates a writer rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the path a manifest for `id` is stored at.
    pub fn path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Writes a manifest, replacing any prior document for the same id.
    pub fn write(&self, manifest: &Manifest) -> Result<PathBuf, ManifestError> {
        let path = self.path(manifest.id);
        let json = serde_json::to_string_pretty(manifest)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Reads the manifest for an experience.
    pub fn read(&self, id: Uuid) -> Result<Manifest, ManifestError> {
        let path = self.path(id);
        if !path.exists() {
            return Err(ManifestError::NotFound(id));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

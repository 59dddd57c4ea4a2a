//! # Staging Files
//!
//! The transient text file that carries a serialized configuration to the
//! uploader and back from the downloader.
//!
//! - UTF-8, no byte-order mark, no header
//! - `<uuid>.<extension>` inside the staging directory
//! - Owned by one export or import; removed by the same orchestrator
//!
//! Cleanup failures are logged and swallowed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StagingSettings;
use crate::error::{SyncError, SyncResult};

const BOM: char = '\u{feff}';

/// Directory where staging files are created.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    extension: String,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        StagingArea {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn from_settings(settings: &StagingSettings) -> Self {
        StagingArea::new(settings.directory(), settings.extension.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh, unused path for a staging file.
    pub fn next_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Uuid::new_v4(), self.extension))
    }

    /// Writes `content` into a new staging file and returns its path.
    pub async fn write(&self, content: &str) -> SyncResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SyncError::StagingFailed(format!("{}: {}", self.dir.display(), e)))?;

        let path = self.next_path();
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| SyncError::StagingFailed(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), bytes = content.len(), "Staging file written");
        Ok(path)
    }

    /// Reads a staging file as UTF-8 text. A leading byte-order mark is
    /// dropped.
    pub async fn read(path: &Path) -> SyncResult<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::StagingFailed(format!("{}: {}", path.display(), e)))?;

        let text = String::from_utf8(bytes)
            .map_err(|e| SyncError::DeserializationFailed(format!("{} is not UTF-8: {}", path.display(), e)))?;

        Ok(match text.strip_prefix(BOM) {
            Some(rest) => rest.to_string(),
            None => text,
        })
    }

    /// Removes a staging file. Returns false (and logs) on failure.
    pub async fn remove(path: &Path) -> bool {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Staging file removed");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove staging file");
                false
            }
        }
    }
}

//! # Sync Error Types
//!
//! Error types for export, import and cloud catalog operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Precondition   │  │  Collaborator   │  │     Data Format         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NothingToExport│  │  StagingFailed  │  │  EmptyContent           │ │
//! │  │  NoActiveMachine│  │  UploadFailed   │  │  NoCompatibleSettings   │ │
//! │  │  ImportRunning  │  │  DownloadFailed │  │  InvalidEnvelope        │ │
//! │  │  InvalidUrl     │  │  CatalogFailed  │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Configuration  │  │     Engine      │                              │
//! │  │                 │  │                 │                              │
//! │  │  InvalidConfig  │  │  Core(CoreError)│                              │
//! │  │  ConfigLoad/Save│  │  Internal       │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-key failures never reach this type; the engine logs and counts them.

use forge_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all orchestrator failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Precondition Errors (no partial state created)
    // =========================================================================
    /// The global component has no durable layer.
    #[error("Nothing to export: no custom profile exists for the machine")]
    NothingToExport,

    /// The active machine is not the supported definition.
    #[error("No supported machine is active (found '{0}')")]
    NoActiveMachine(String),

    /// An import batch is already in flight.
    #[error("An import is already running ({processed}/{total} settings applied)")]
    ImportRunning { processed: usize, total: usize },

    /// No import batch is in flight.
    #[error("No import is running")]
    NoImportRunning,

    /// Empty or malformed download URL.
    #[error("Invalid profile URL: {0}")]
    InvalidUrl(String),

    /// Profile name rejected.
    #[error("Invalid profile name: {0}")]
    InvalidName(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Staging file could not be written or read.
    #[error("Staging file error: {0}")]
    StagingFailed(String),

    /// Upload collaborator reported a failure (including aborts).
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Download collaborator reported a failure.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Catalog endpoint failed (credentials, list fetch, or record).
    #[error("Cloud catalog error: {0}")]
    CatalogFailed(String),

    /// Edit barrier could not flush pending edits.
    #[error("Could not flush pending edits: {0}")]
    BarrierFailed(String),

    // =========================================================================
    // Data Format Errors (reported before any layer mutation)
    // =========================================================================
    /// Import content was empty or whitespace.
    #[error("Profile content is empty")]
    EmptyContent,

    /// Nothing in the content survived filtering.
    #[error("No compatible settings found ({reserved} reserved, {unknown} unknown keys dropped)")]
    NoCompatibleSettings { reserved: usize, unknown: usize },

    /// Catalog response envelope reported failure.
    #[error("Catalog rejected the request (code {code}): {message}")]
    InvalidEnvelope { code: i64, message: String },

    /// JSON could not be decoded.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Error raised by the settings engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal orchestrator error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::DeserializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::StagingFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true for failures reported before anything was changed.
    pub fn is_precondition(&self) -> bool {
        match self {
            SyncError::NothingToExport
            | SyncError::NoActiveMachine(_)
            | SyncError::ImportRunning { .. }
            | SyncError::NoImportRunning
            | SyncError::InvalidUrl(_)
            | SyncError::InvalidName(_) => true,
            SyncError::Core(core) => matches!(
                core,
                CoreError::NoDurableLayer(_)
                    | CoreError::BatchAlreadyRunning { .. }
                    | CoreError::NoBatchRunning
                    | CoreError::Validation(_)
            ),
            _ => false,
        }
    }

    /// Returns true if an external collaborator failed.
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            SyncError::StagingFailed(_)
                | SyncError::UploadFailed(_)
                | SyncError::DownloadFailed(_)
                | SyncError::CatalogFailed(_)
                | SyncError::BarrierFailed(_)
        )
    }

    /// Returns true if the input content or payload was unusable.
    pub fn is_data_format(&self) -> bool {
        matches!(
            self,
            SyncError::EmptyContent
                | SyncError::NoCompatibleSettings { .. }
                | SyncError::InvalidEnvelope { .. }
                | SyncError::DeserializationFailed(_)
        )
    }

    /// Returns true if retrying the same request may succeed.
    ///
    /// Transfer failures are retryable; precondition and data format
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::UploadFailed(_)
                | SyncError::DownloadFailed(_)
                | SyncError::CatalogFailed(_)
                | SyncError::StagingFailed(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::ComponentId;

    #[test]
    fn test_categories_are_disjoint() {
        let errors = vec![
            SyncError::NothingToExport,
            SyncError::UploadFailed("aborted".into()),
            SyncError::EmptyContent,
            SyncError::InvalidConfig("chunk".into()),
        ];
        for err in &errors {
            let hits = [err.is_precondition(), err.is_collaborator(), err.is_data_format(), err.is_config_error()]
                .iter()
                .filter(|b| **b)
                .count();
            assert_eq!(hits, 1, "{err}");
        }
    }

    #[test]
    fn test_core_errors_map_to_precondition() {
        let err: SyncError = CoreError::NoDurableLayer(ComponentId::Global).into();
        assert!(err.is_precondition());

        let err: SyncError = ValidationError::Required { field: "url".into() }.into();
        assert!(err.is_precondition());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::DownloadFailed("timeout".into()).is_retryable());
        assert!(!SyncError::NoCompatibleSettings { reserved: 2, unknown: 1 }.is_retryable());
        assert!(!SyncError::NothingToExport.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::NoCompatibleSettings { reserved: 3, unknown: 4 };
        assert!(err.to_string().contains("3 reserved"));

        let err = SyncError::ImportRunning { processed: 30, total: 65 };
        assert!(err.to_string().contains("30/65"));
    }
}

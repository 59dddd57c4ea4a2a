//! # Error Types
//!
//! Domain-specific error types for forge-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  forge-core errors (this file)                                         │
//! │  ├── CoreError        - Engine preconditions and layer failures        │
//! │  └── ValidationError  - Keys, names and values that cannot be used     │
//! │                                                                         │
//! │  forge-sync errors (separate crate)                                    │
//! │  └── SyncError        - Staging, collaborator and sequencing failures  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → SyncEvent → UI        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (key, component, layer name)
//! 3. Errors are enum variants, never String
//! 4. Per-key failures are recovered by the caller; only preconditions bubble up

use thiserror::Error;

use crate::types::{ComponentId, SettingKey};

// =============================================================================
// Core Error
// =============================================================================

/// Core engine errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Component does not exist in the component set.
    #[error("Unknown component: {0}")]
    UnknownComponent(ComponentId),

    /// The component has no durable custom layer to write into.
    ///
    /// ## When This Occurs
    /// - Export requested while the machine still uses the base profile only
    /// - Sub-component fill with no global custom layer
    #[error("No durable custom layer for {0}")]
    NoDurableLayer(ComponentId),

    /// A write was attempted against the empty (no-op) layer.
    #[error("Cannot write {key} into the empty {layer} layer")]
    EmptyLayerWrite { layer: String, key: SettingKey },

    /// A batch is already running; it must finish or be discarded first.
    #[error("An import batch is already running ({cursor}/{total})")]
    BatchAlreadyRunning { cursor: usize, total: usize },

    /// A step or finalize was requested with no batch in flight.
    #[error("No import batch is running")]
    NoBatchRunning,

    /// Finalize was requested before every chunk was applied.
    #[error("Import batch is not ready to finalize ({cursor}/{total} applied)")]
    BatchNotFinalizing { cursor: usize, total: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used while filtering imported settings and checking profile names,
/// before any layer is mutated.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g. a key with whitespace).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Key belongs to the host machine identity and is never imported.
    #[error("{key} is reserved for the machine definition")]
    Reserved { key: SettingKey },

    /// Value cannot be carried into the target setting.
    #[error("{key} cannot be imported: {reason}")]
    NotImportable { key: SettingKey, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

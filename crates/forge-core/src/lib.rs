//! # forge-core: Pure Settings Engine for Forge Profile Sync
//!
//! This crate is the **heart** of Forge Profile Sync. It decides which
//! layer holds the authoritative value of every setting, merges edits into
//! durable layers, and converts configurations to and from the settings
//! text format. Zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Forge Profile Sync Architecture                     │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Host slicer / forge-cli                         │   │
//! │  │    Save dialog ──► Cloud list ──► Import progress ──► Messages  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ SyncEvent                              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    forge-sync (orchestrator)                    │   │
//! │  │    export_profile, import_from_url, fetch_cloud_profiles        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ forge-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   layer   │  │   merge   │  │   codec   │  │   batch   │  │   │
//! │  │   │ Resolver  │  │ promote   │  │ -s k="v"  │  │  chunked  │  │   │
//! │  │   │ Component │  │ forceSave │  │ parse     │  │  import   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • DETERMINISTIC               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Keys, typed values, component ids, layer roles
//! - [`schema`] - Setting definitions per component
//! - [`layer`] - Layers, components and the resolver
//! - [`merge`] - Promotion, forced save and extruder fill
//! - [`codec`] - Settings text serializer and parser
//! - [`batch`] - Chunked import state machine
//! - [`validation`] - Import filters and name checks
//! - [`diagnostics`] - Per-key traces
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use forge_core::{codec, Component, ComponentId, ComponentSet, Layer, LayerRole};
//! use forge_core::{SettingDefinition, SettingSchema, SettingType, SettingValue};
//!
//! let schema = SettingSchema::new(
//!     "explorer_3",
//!     vec![SettingDefinition::new("layer_height", SettingType::Float, SettingValue::Float(0.2))],
//! );
//! let set = ComponentSet::new(
//!     Component::new(ComponentId::Global, schema)
//!         .with_custom(Layer::named("fine", LayerRole::Custom).with_value("layer_height", 0.1)),
//! );
//!
//! let text = codec::serialize(&set, &[]);
//! assert_eq!(text, r#"-s layer_height="0.1""#);
//! assert_eq!(codec::parse(&text).get("layer_height"), Some(&SettingValue::Float(0.1)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod batch;
pub mod codec;
pub mod diagnostics;
pub mod error;
pub mod layer;
pub mod merge;
pub mod schema;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use batch::{BatchApplier, BatchPhase, BatchReport, ChunkOutcome};
pub use codec::{ObjectOverride, ParsedConfig, ParsedSettings};
pub use error::{CoreError, CoreResult, ValidationError};
pub use layer::{Component, ComponentSet, ExclusionSet, Layer, LayerIdentity};
pub use merge::{ForceSaveReport, MergeEngine, Promotion, PromotionReport};
pub use schema::{SettingDefinition, SettingSchema};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Keys persisted to the global durable layer before every export.
///
/// Formula-driven values are often only computed, never stored; saving
/// these keys makes the exported file match what the user sees.
pub const MUST_PERSIST: &[&str] = &[
    // Layer height and walls
    "layer_height",
    "wall_thickness",
    "xy_offset",
    "horizontal_expansion",
    // Top and bottom
    "roofing_layer_count",
    "flooring_layer_count",
    "top_layers",
    "bottom_layers",
    "top_thickness",
    "bottom_thickness",
    "top_bottom_thickness",
    // Infill
    "infill_sparse_density",
    "infill_pattern",
    "infill_line_distance",
    "infill_sparse_thickness",
    // Temperature
    "material_print_temperature",
    "material_bed_temperature",
    // Speed
    "speed_print",
    "skirt_brim_speed",
    "jerk_enabled",
    // Retraction and z-hop (per extruder)
    "retraction_enable",
    "retraction_amount",
    "retraction_speed",
    "retraction_combing",
    "retraction_hop_enabled",
    "retraction_hop",
    "retraction_hop_only_when_collides",
    // Cooling (per extruder)
    "cool_fan_enabled",
    "cool_fan_speed",
    "cool_fan_speed_min",
    "cool_fan_speed_max",
    // Support
    "support_infill_rate",
    "support_material_flow",
    "speed_support_interface",
    "support_enable",
    "support_type",
];

/// Keys that are inherently per-extruder. Default contents of
/// [`ExclusionSet::standard`].
pub const PER_COMPONENT: &[&str] = &[
    "cool_fan_speed",
    "cool_fan_speed_min",
    "cool_fan_speed_max",
    "cool_fan_enabled",
    "retraction_enable",
    "retraction_amount",
    "retraction_speed",
    "retraction_combing",
    "retraction_hop_enabled",
    "retraction_hop",
    "retraction_hop_only_when_collides",
];

/// Keys traced at debug level when debug mode is on.
pub const KEY_MONITORING_PARAMS: &[&str] = &[
    "layer_height",
    "wall_thickness",
    "wall_line_count",
    "xy_offset",
    "horizontal_expansion",
    "infill_sparse_density",
    "infill_pattern",
];

/// Settings applied per import chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 30;

/// Prefix of keys owned by the machine definition; never imported.
pub const RESERVED_KEY_PREFIX: &str = "machine_";

/// Maximum profile name length, in characters.
pub const MAX_PROFILE_NAME_LEN: usize = 100;

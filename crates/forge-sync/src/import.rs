//! # Import Planning
//!
//! Everything an import does before the first setting is written: parse,
//! filter against the machine schema, and make sure durable layers exist.
//!
//! ```text
//! content ──► parse_sections ──► flatten ──► filter_importable
//!   │                                             │
//!   └─ empty: EmptyContent                        └─ nothing left: NoCompatibleSettings
//!
//! ImportPlan ──► prepare_target (creates missing custom layers) ──► BatchApplier
//! ```
//!
//! Parsing and filtering are all-or-nothing: a failure there leaves every
//! layer untouched.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use forge_core::validation::filter_importable;
use forge_core::{codec, ComponentId, ComponentSet, LayerRole, ParsedSettings};

use crate::error::{SyncError, SyncResult};

/// Settings accepted for import, with what was dropped on the way.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub settings: ParsedSettings,
    /// Per-extruder values of exclusion-set keys, by extruder index.
    pub per_component: BTreeMap<usize, ParsedSettings>,
    /// `machine_*` keys dropped.
    pub reserved: usize,
    /// Keys unknown to the machine schema.
    pub unknown: usize,
    /// `-g` object tokens ignored; object overrides are not imported.
    pub skipped_object_tokens: usize,
}

impl ImportPlan {
    pub fn total(&self) -> usize {
        self.settings.len()
    }
}

/// Parses and filters import content against the global schema.
///
/// Global-section values win over extruder sections for the same key,
/// except for exclusion-set keys: each extruder keeps its own section's
/// value for those.
///
/// ## Errors
/// - [`SyncError::EmptyContent`] for blank content
/// - [`SyncError::NoCompatibleSettings`] when filtering leaves nothing
pub fn plan_import(content: &str, set: &ComponentSet) -> SyncResult<ImportPlan> {
    if content.trim().is_empty() {
        return Err(SyncError::EmptyContent);
    }

    let parsed = codec::parse_sections(content);
    let skipped_object_tokens = parsed.skipped_object_tokens;
    let per_component: BTreeMap<usize, ParsedSettings> = parsed
        .components
        .iter()
        .map(|(&index, section)| {
            let own: ParsedSettings = section
                .iter()
                .filter(|(key, _)| set.exclusions().contains(key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            (index, own)
        })
        .filter(|(_, own)| !own.is_empty())
        .collect();
    let flat = parsed.flatten();
    debug!(parsed = flat.len(), skipped_object_tokens, "Import content parsed");

    let report = filter_importable(flat, set.global().schema());
    if !report.reserved.is_empty() {
        debug!(count = report.reserved.len(), "Dropped machine settings");
    }
    if !report.unknown.is_empty() {
        debug!(count = report.unknown.len(), "Dropped settings unknown to this machine");
    }

    if report.accepted.is_empty() {
        warn!(
            reserved = report.reserved.len(),
            unknown = report.unknown.len(),
            "No compatible settings in import"
        );
        return Err(SyncError::NoCompatibleSettings {
            reserved: report.reserved.len(),
            unknown: report.unknown.len(),
        });
    }

    info!(accepted = report.accepted.len(), "Import planned");
    Ok(ImportPlan {
        settings: report.accepted,
        per_component,
        reserved: report.reserved.len(),
        unknown: report.unknown.len(),
        skipped_object_tokens,
    })
}

/// Durable layers the import will write into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    /// Name of the global durable layer.
    pub profile_name: String,
    /// Components that received a new durable layer.
    pub created: Vec<ComponentId>,
}

/// Creates a durable layer named after `name` on every component that
/// lacks one.
pub fn prepare_target(set: &mut ComponentSet, name: &str) -> ImportTarget {
    let created = set.ensure_custom_layers(name);
    if !created.is_empty() {
        info!(created = created.len(), name, "Created durable layers for import");
    }

    let profile_name = set
        .global()
        .layer(LayerRole::Custom)
        .and_then(|layer| layer.name())
        .unwrap_or(name)
        .to_string();

    ImportTarget { profile_name, created }
}

//! # Export Pipeline
//!
//! The synchronous part of an export: everything between flushing the
//! user's pending edits and handing a staging file to the uploader.
//!
//! ```text
//! promote user edits (global, then each extruder)
//!        │
//!        ▼
//! forced save of must-persist keys ──► unsaved-key check (debug mode)
//!        │
//!        ▼
//! extruder → global fill (exclusion set skipped)
//!        │
//!        ▼
//! serialize global + extruders (+ object overrides)
//! ```
//!
//! Durable layer writes made here are kept even if the upload later fails.

use serde::Serialize;
use tracing::{debug, info};

use forge_core::diagnostics::{log_monitored_keys, unsaved_keys};
use forge_core::{
    codec, ComponentId, ComponentSet, ForceSaveReport, MergeEngine, ObjectOverride, Promotion,
    PromotionReport, SettingKey,
};

use crate::error::{SyncError, SyncResult};

/// What the export pipeline did to the layers, plus the serialized text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    /// Totals over every component that had a durable layer.
    pub promoted: PromotionReport,
    /// Components whose user edits had nowhere to go.
    pub without_destination: Vec<ComponentId>,
    pub force_save: ForceSaveReport,
    /// Extruder values copied into the global durable layer.
    pub filled_from_extruders: usize,
    /// Must-persist keys not held by a saved layer (debug mode only).
    pub unsaved: Vec<SettingKey>,
    #[serde(skip)]
    pub text: String,
}

/// Runs the merge passes and serializes the result.
///
/// ## Errors
/// [`SyncError::NothingToExport`] when the global component has no durable
/// layer. Nothing is modified in that case.
pub fn prepare_export(
    set: &mut ComponentSet,
    merge: &MergeEngine,
    objects: &[ObjectOverride],
    debug_mode: bool,
) -> SyncResult<ExportReport> {
    if !set.global().has_durable_layer() {
        return Err(SyncError::NothingToExport);
    }

    if debug_mode {
        log_monitored_keys(set, ComponentId::Global, "before export");
    }

    let mut report = ExportReport::default();
    for id in set.component_ids() {
        match merge.promote_user_edits(set, id)? {
            Promotion::Promoted(p) => {
                report.promoted.written += p.written;
                report.promoted.unchanged += p.unchanged;
                report.promoted.failed += p.failed;
            }
            Promotion::NoDestination => report.without_destination.push(id),
        }
    }

    report.force_save = merge.force_save(set)?;
    if debug_mode {
        report.unsaved = unsaved_keys(set, merge.must_persist());
    }

    report.filled_from_extruders = merge.fill_global_from_subs(set)?;

    if debug_mode {
        log_monitored_keys(set, ComponentId::Global, "after export merge");
    }

    report.text = codec::serialize(set, objects);
    debug!(bytes = report.text.len(), "Configuration serialized");
    info!(
        promoted = report.promoted.written,
        saved = report.force_save.saved,
        filled = report.filled_from_extruders,
        "Export prepared"
    );
    Ok(report)
}

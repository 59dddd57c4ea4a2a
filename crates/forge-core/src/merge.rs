//! # Merge Engine
//!
//! Moves values between layers before an export so that the durable custom
//! layer holds everything the user currently sees.
//!
//! ## Export-time merge passes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. promote_user_edits     user ──────────────► custom   (per component)│
//! │     every user key, written on mismatch, user layer left intact        │
//! │                                                                         │
//! │  2. force_save             resolve(global) ───► global custom           │
//! │     must-persist keys, pending edit wins, verified by read-back,        │
//! │     user entry removed once saved                                       │
//! │                                                                         │
//! │  3. fill_global_from_subs  extruder custom ───► global custom           │
//! │     must-persist keys minus the exclusion set, copied on mismatch       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every pass is idempotent: running it again with no new edits performs
//! zero writes. "Different" always means typed inequality of
//! [`SettingValue`]s, never string comparison.
//!
//! Per-key write failures are logged and counted; they never abort a pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::layer::ComponentSet;
use crate::types::{ComponentId, LayerRole, SettingKey, SettingValue};
use crate::MUST_PERSIST;

// =============================================================================
// Reports
// =============================================================================

/// Counts from a user-edit promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionReport {
    /// Keys whose durable value changed.
    pub written: usize,
    /// Keys already equal (or dropped by a read-only key).
    pub unchanged: usize,
    /// Keys that could not be written.
    pub failed: usize,
}

/// Outcome of promoting user edits on one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// The component has no durable layer; nothing was written.
    NoDestination,
    Promoted(PromotionReport),
}

/// Counts from the forced-save pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceSaveReport {
    /// Written and confirmed by read-back.
    pub saved: usize,
    /// Written but the read-back disagreed (read-only key).
    pub skipped: usize,
    /// Durable layer already held the value.
    pub up_to_date: usize,
}

// =============================================================================
// Merge Engine
// =============================================================================

/// Merge rules over a [`ComponentSet`], parameterized by the must-persist
/// key list.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    must_persist: Vec<SettingKey>,
}

impl Default for MergeEngine {
    fn default() -> Self {
        MergeEngine::new(MUST_PERSIST.iter().copied())
    }
}

impl MergeEngine {
    pub fn new<I, K>(must_persist: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<SettingKey>,
    {
        MergeEngine {
            must_persist: must_persist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn must_persist(&self) -> &[SettingKey] {
        &self.must_persist
    }

    /// Copies every user-edit entry of a component into its durable layer.
    ///
    /// Overwrites on mismatch. The user layer is not cleared.
    ///
    /// ## Errors
    /// [`CoreError::UnknownComponent`] for an id outside the set.
    pub fn promote_user_edits(&self, set: &mut ComponentSet, id: ComponentId) -> CoreResult<Promotion> {
        let component = set.component_mut(id)?;
        if !component.has_durable_layer() {
            warn!(component = %id, "No durable layer, user edits stay pending");
            return Ok(Promotion::NoDestination);
        }

        let edits: Vec<(SettingKey, SettingValue)> = component
            .layer(LayerRole::User)
            .map(|user| user.entries().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let mut report = PromotionReport::default();
        let Some(custom) = component.layer_mut(LayerRole::Custom) else {
            return Ok(Promotion::NoDestination);
        };

        for (key, value) in edits {
            match custom.set_value(&key, value) {
                Ok(true) => report.written += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not promote user edit");
                    report.failed += 1;
                }
            }
        }

        if report.written > 0 {
            info!(component = %id, written = report.written, "Promoted user edits to durable layer");
        }
        Ok(Promotion::Promoted(report))
    }

    /// Writes every must-persist key's current value into the global
    /// durable layer.
    ///
    /// For each key the value to save is the pending user edit when one
    /// exists, otherwise the resolved value. It is written only when it
    /// differs from the durable layer, then read back: a match counts as
    /// saved (and a user-sourced entry is removed from the user layer), a
    /// mismatch counts as skipped.
    ///
    /// ## Errors
    /// [`CoreError::NoDurableLayer`] when the global component has no
    /// durable layer.
    pub fn force_save(&self, set: &mut ComponentSet) -> CoreResult<ForceSaveReport> {
        let global = ComponentId::Global;
        if !set.global().has_durable_layer() {
            return Err(CoreError::NoDurableLayer(global));
        }

        let mut report = ForceSaveReport::default();
        for key in &self.must_persist {
            let user_value = set.layer_value(global, LayerRole::User, key.as_str()).cloned();
            let from_user = user_value.is_some();
            let Some(to_save) = user_value.or_else(|| set.resolve(global, key.as_str()).cloned()) else {
                continue;
            };

            let durable = set.layer_value(global, LayerRole::Custom, key.as_str());
            if durable == Some(&to_save) {
                report.up_to_date += 1;
                continue;
            }

            if let Err(e) = set.set_value(global, LayerRole::Custom, key, to_save.clone()) {
                warn!(key = %key, error = %e, "Could not save setting");
                continue;
            }

            if set.layer_value(global, LayerRole::Custom, key.as_str()) == Some(&to_save) {
                report.saved += 1;
                debug!(key = %key, value = %to_save, from_user, "Saved to durable layer");
                if from_user {
                    set.remove_value(global, LayerRole::User, key.as_str())?;
                }
            } else {
                report.skipped += 1;
                debug!(key = %key, "Save ignored, key is read-only");
            }
        }

        info!(
            saved = report.saved,
            skipped = report.skipped,
            up_to_date = report.up_to_date,
            "Forced save finished"
        );
        Ok(report)
    }

    /// Copies must-persist values from each extruder's durable layer into
    /// the global durable layer when they differ.
    ///
    /// Keys in the exclusion set are always skipped. Extruders without a
    /// durable layer are ignored. Later extruders win over earlier ones.
    ///
    /// ## Errors
    /// [`CoreError::NoDurableLayer`] when the global component has no
    /// durable layer.
    pub fn fill_global_from_subs(&self, set: &mut ComponentSet) -> CoreResult<usize> {
        let global = ComponentId::Global;
        if !set.global().has_durable_layer() {
            return Err(CoreError::NoDurableLayer(global));
        }

        // One value per key, so repeated runs compare against the final winner.
        let mut copies: BTreeMap<SettingKey, SettingValue> = BTreeMap::new();
        for sub in set.subs().iter().filter(|s| s.has_durable_layer()) {
            for key in &self.must_persist {
                if set.exclusions().contains(key.as_str()) {
                    continue;
                }
                if let Some(value) = sub.layer_value(LayerRole::Custom, key.as_str()) {
                    copies.insert(key.clone(), value.clone());
                }
            }
        }

        let mut merged = 0;
        for (key, value) in copies {
            if set.layer_value(global, LayerRole::Custom, key.as_str()) == Some(&value) {
                continue;
            }
            match set.set_value(global, LayerRole::Custom, &key, value) {
                Ok(true) => {
                    merged += 1;
                    debug!(key = %key, "Copied extruder value to global durable layer");
                }
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "Could not merge extruder value"),
            }
        }

        if merged > 0 {
            info!(merged, "Merged extruder settings into global durable layer");
        }
        Ok(merged)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Component, Layer};
    use crate::schema::{SettingDefinition, SettingSchema};
    use crate::types::SettingType;

    fn schema(id: &str) -> SettingSchema {
        SettingSchema::new(
            id,
            vec![
                SettingDefinition::new("layer_height", SettingType::Float, SettingValue::Float(0.2)),
                SettingDefinition::new("wall_thickness", SettingType::Float, SettingValue::Float(0.8)),
                SettingDefinition::new("cool_fan_speed", SettingType::Float, SettingValue::Float(100.0)),
                SettingDefinition::new("speed_print", SettingType::Int, SettingValue::Int(50)),
            ],
        )
    }

    fn set_with_durable() -> ComponentSet {
        let mut set = ComponentSet::new(Component::new(ComponentId::Global, schema("explorer_3")))
            .with_sub(Component::new(ComponentId::Sub(0), schema("explorer_3_extruder_0")));
        set.ensure_custom_layers("test");
        set
    }

    fn user_edit(set: &mut ComponentSet, key: &str, value: SettingValue) {
        set.set_value(ComponentId::Global, LayerRole::User, &SettingKey::from(key), value)
            .unwrap();
    }

    #[test]
    fn test_promotion_without_durable_layer() {
        let mut set = ComponentSet::new(Component::new(ComponentId::Global, schema("explorer_3")));
        user_edit(&mut set, "layer_height", SettingValue::Float(0.3));

        let outcome = MergeEngine::default()
            .promote_user_edits(&mut set, ComponentId::Global)
            .unwrap();
        assert_eq!(outcome, Promotion::NoDestination);
    }

    #[test]
    fn test_promotion_is_idempotent() {
        let mut set = set_with_durable();
        user_edit(&mut set, "layer_height", SettingValue::Float(0.3));
        user_edit(&mut set, "speed_print", SettingValue::Int(80));
        let engine = MergeEngine::default();

        let first = engine.promote_user_edits(&mut set, ComponentId::Global).unwrap();
        let second = engine.promote_user_edits(&mut set, ComponentId::Global).unwrap();

        assert!(matches!(first, Promotion::Promoted(r) if r.written == 2));
        assert!(matches!(second, Promotion::Promoted(r) if r.written == 0 && r.unchanged == 2));
        // User layer is left in place.
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::User, "speed_print"),
            Some(&SettingValue::Int(80))
        );
    }

    #[test]
    fn test_force_save_requires_durable_layer() {
        let mut set = ComponentSet::new(Component::new(ComponentId::Global, schema("explorer_3")));
        let err = MergeEngine::default().force_save(&mut set).unwrap_err();
        assert!(matches!(err, CoreError::NoDurableLayer(ComponentId::Global)));
    }

    #[test]
    fn test_force_save_prefers_pending_edit_and_removes_it() {
        let mut set = set_with_durable();
        user_edit(&mut set, "layer_height", SettingValue::Float(0.12));
        let engine = MergeEngine::new(["layer_height", "wall_thickness"]);

        let report = engine.force_save(&mut set).unwrap();

        assert_eq!(report.saved, 2);
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::Custom, "layer_height"),
            Some(&SettingValue::Float(0.12))
        );
        // Resolved default was persisted too.
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::Custom, "wall_thickness"),
            Some(&SettingValue::Float(0.8))
        );
        assert_eq!(set.layer_value(ComponentId::Global, LayerRole::User, "layer_height"), None);

        let again = engine.force_save(&mut set).unwrap();
        assert_eq!(again, ForceSaveReport { saved: 0, skipped: 0, up_to_date: 2 });
    }

    #[test]
    fn test_force_save_counts_read_only_as_skipped() {
        let mut set = ComponentSet::new(
            Component::new(ComponentId::Global, schema("explorer_3"))
                .with_custom(Layer::named("c", LayerRole::Custom).with_read_only("layer_height")),
        );
        user_edit(&mut set, "layer_height", SettingValue::Float(0.12));

        let report = MergeEngine::new(["layer_height"]).force_save(&mut set).unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.saved, 0);
        // Edit stays pending because it never made it to the durable layer.
        assert!(set.layer_value(ComponentId::Global, LayerRole::User, "layer_height").is_some());
    }

    #[test]
    fn test_fill_never_touches_excluded_keys() {
        let mut set = set_with_durable();
        set.set_value(
            ComponentId::Sub(0),
            LayerRole::Custom,
            &SettingKey::from("cool_fan_speed"),
            SettingValue::Float(40.0),
        )
        .unwrap();

        let merged = MergeEngine::default().fill_global_from_subs(&mut set).unwrap();

        assert_eq!(merged, 0);
        assert_eq!(set.layer_value(ComponentId::Global, LayerRole::Custom, "cool_fan_speed"), None);
    }

    #[test]
    fn test_fill_copies_differing_values() {
        let mut set = set_with_durable();
        set.set_value(
            ComponentId::Sub(0),
            LayerRole::Custom,
            &SettingKey::from("wall_thickness"),
            SettingValue::Float(1.2),
        )
        .unwrap();
        let engine = MergeEngine::default();

        assert_eq!(engine.fill_global_from_subs(&mut set).unwrap(), 1);
        assert_eq!(engine.fill_global_from_subs(&mut set).unwrap(), 0);
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::Custom, "wall_thickness"),
            Some(&SettingValue::Float(1.2))
        );
    }

    #[test]
    fn test_fill_with_disagreeing_extruders_settles_on_last() {
        let mut set = ComponentSet::new(Component::new(ComponentId::Global, schema("explorer_3")))
            .with_sub(Component::new(ComponentId::Sub(0), schema("explorer_3_extruder_0")))
            .with_sub(Component::new(ComponentId::Sub(1), schema("explorer_3_extruder_1")));
        set.ensure_custom_layers("test");
        for (index, thickness) in [(0, 1.2), (1, 1.6)] {
            set.set_value(
                ComponentId::Sub(index),
                LayerRole::Custom,
                &SettingKey::from("wall_thickness"),
                SettingValue::Float(thickness),
            )
            .unwrap();
        }
        let engine = MergeEngine::default();

        assert_eq!(engine.fill_global_from_subs(&mut set).unwrap(), 1);
        assert_eq!(engine.fill_global_from_subs(&mut set).unwrap(), 0);
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::Custom, "wall_thickness"),
            Some(&SettingValue::Float(1.6))
        );
    }
}

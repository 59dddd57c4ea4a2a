//! # Layers, Components and Resolution
//!
//! Every component (the global machine stack and one stack per extruder)
//! owns a fixed set of override layers on top of its schema defaults.
//!
//! ## Precedence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Resolution for one key                              │
//! │                                                                         │
//! │   Sub-component (extruder N)            Global                          │
//! │   ┌──────────────┐                      ┌──────────────┐                │
//! │   │ 1. user      │                      │ 4. user      │                │
//! │   │ 2. custom    │   not excluded ───►  │ 5. custom    │                │
//! │   │ 3. base      │                      │ 6. base      │                │
//! │   ├──────────────┤                      ├──────────────┤                │
//! │   │ 7. default   │   not excluded ───►  │ 8. default   │                │
//! │   └──────────────┘                      └──────────────┘                │
//! │                                                                         │
//! │   Global alone walks user → custom → base → default.                   │
//! │   First defined value wins; nothing found means Undefined (None).       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A sub-component falls back to the global stack for keys it does not
//! override itself. Keys in the [`ExclusionSet`] never fall back: they are
//! per-extruder by nature.
//!
//! ## Layer identity
//! A component without a durable custom profile holds the *empty* layer in
//! its custom slot. The empty layer never defines a key and refuses writes;
//! [`ComponentSet::ensure_custom_layers`] is the only way to replace it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::schema::SettingSchema;
use crate::types::{ComponentId, LayerRole, SettingKey, SettingValue};
use crate::PER_COMPONENT;

// =============================================================================
// Layer
// =============================================================================

/// Identity of a layer slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerIdentity {
    /// The no-op layer: defines nothing, accepts nothing.
    Empty,
    /// A real, named layer.
    Named(String),
}

/// Named, mutable mapping from key to value at a fixed precedence position.
///
/// A layer never holds an entry for a key it does not override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    identity: LayerIdentity,
    role: LayerRole,

    #[serde(default)]
    values: BTreeMap<SettingKey, SettingValue>,

    /// Keys the host refuses to change in this layer. Writes to them are
    /// accepted and dropped, so a read-back shows the old value.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    read_only: BTreeSet<SettingKey>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl Layer {
    /// Creates the empty layer for a slot.
    pub fn empty(role: LayerRole) -> Self {
        Layer {
            identity: LayerIdentity::Empty,
            role,
            values: BTreeMap::new(),
            read_only: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a real layer with no entries.
    pub fn named(name: impl Into<String>, role: LayerRole) -> Self {
        Layer {
            identity: LayerIdentity::Named(name.into()),
            ..Layer::empty(role)
        }
    }

    /// Builder-style insert, for fixtures and snapshots.
    pub fn with_value(mut self, key: impl Into<SettingKey>, value: impl Into<SettingValue>) -> Self {
        if !self.is_empty_layer() {
            self.values.insert(key.into(), value.into());
        }
        self
    }

    /// Marks a key as read-only in this layer.
    pub fn with_read_only(mut self, key: impl Into<SettingKey>) -> Self {
        self.read_only.insert(key.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn identity(&self) -> &LayerIdentity {
        &self.identity
    }

    /// Layer name, or `None` for the empty layer.
    pub fn name(&self) -> Option<&str> {
        match &self.identity {
            LayerIdentity::Empty => None,
            LayerIdentity::Named(name) => Some(name),
        }
    }

    pub fn role(&self) -> LayerRole {
        self.role
    }

    #[inline]
    pub fn is_empty_layer(&self) -> bool {
        self.identity == LayerIdentity::Empty
    }

    /// Does this layer define the key?
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Writes a value.
    ///
    /// Returns `Ok(true)` when the stored value changed, `Ok(false)` when it
    /// was already equal or the key is read-only.
    ///
    /// ## Errors
    /// [`CoreError::EmptyLayerWrite`] if this is the empty layer.
    pub fn set_value(&mut self, key: &SettingKey, value: SettingValue) -> CoreResult<bool> {
        if self.is_empty_layer() {
            return Err(CoreError::EmptyLayerWrite {
                layer: self.role.to_string(),
                key: key.clone(),
            });
        }

        if self.read_only.contains(key) {
            debug!(key = %key, layer = ?self.name(), "Ignoring write to read-only key");
            return Ok(false);
        }

        if self.values.get(key) == Some(&value) {
            return Ok(false);
        }

        self.values.insert(key.clone(), value);
        Ok(true)
    }

    /// Removes a key, returning the value it held.
    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.values.len();
        self.values.clear();
        count
    }

    /// Keys defined in this layer, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &SettingKey> + '_ {
        self.values.keys()
    }

    /// Entries defined in this layer, sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&SettingKey, &SettingValue)> + '_ {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

// =============================================================================
// Exclusion Set
// =============================================================================

/// Keys that are inherently per-sub-component.
///
/// Never copied from an extruder into the global layer, and never filled
/// into an extruder from the global stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet(BTreeSet<SettingKey>);

impl ExclusionSet {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<SettingKey>,
    {
        ExclusionSet(keys.into_iter().map(Into::into).collect())
    }

    /// Cooling and retraction controls, see [`PER_COMPONENT`].
    pub fn standard() -> Self {
        ExclusionSet::new(PER_COMPONENT.iter().copied())
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SettingKey> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        ExclusionSet::standard()
    }
}

// =============================================================================
// Component
// =============================================================================

/// One layer stack: schema defaults plus base, custom and user slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    id: ComponentId,
    schema: SettingSchema,
    base: Layer,
    custom: Layer,
    user: Layer,
}

impl Component {
    /// Creates a component with empty base and custom slots and an empty
    /// user-edit layer.
    pub fn new(id: ComponentId, schema: SettingSchema) -> Self {
        Component {
            id,
            schema,
            base: Layer::empty(LayerRole::Base),
            custom: Layer::empty(LayerRole::Custom),
            user: Layer::named("user", LayerRole::User),
        }
    }

    pub fn with_base(mut self, layer: Layer) -> Self {
        self.base = Layer { role: LayerRole::Base, ..layer };
        self
    }

    pub fn with_custom(mut self, layer: Layer) -> Self {
        self.custom = Layer { role: LayerRole::Custom, ..layer };
        self
    }

    pub fn with_user(mut self, layer: Layer) -> Self {
        self.user = Layer { role: LayerRole::User, ..layer };
        self
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn schema(&self) -> &SettingSchema {
        &self.schema
    }

    /// Layer in a slot; `None` for [`LayerRole::Default`], which lives in
    /// the schema.
    pub fn layer(&self, role: LayerRole) -> Option<&Layer> {
        match role {
            LayerRole::Default => None,
            LayerRole::Base => Some(&self.base),
            LayerRole::Custom => Some(&self.custom),
            LayerRole::User => Some(&self.user),
        }
    }

    pub fn layer_mut(&mut self, role: LayerRole) -> Option<&mut Layer> {
        match role {
            LayerRole::Default => None,
            LayerRole::Base => Some(&mut self.base),
            LayerRole::Custom => Some(&mut self.custom),
            LayerRole::User => Some(&mut self.user),
        }
    }

    /// True when the custom slot holds a real layer.
    pub fn has_durable_layer(&self) -> bool {
        !self.custom.is_empty_layer()
    }

    /// Value held by one slot only.
    pub fn layer_value(&self, role: LayerRole, key: &str) -> Option<&SettingValue> {
        match self.layer(role) {
            Some(layer) => layer.get(key),
            None => self.default_value(key),
        }
    }

    fn default_value(&self, key: &str) -> Option<&SettingValue> {
        self.schema.get(key).and_then(|d| d.default_value.as_ref())
    }

    /// First defined value among user, custom and base.
    fn overridden(&self, key: &str) -> Option<&SettingValue> {
        self.user
            .get(key)
            .or_else(|| self.custom.get(key))
            .or_else(|| self.base.get(key))
    }

    fn layer_names(&self) -> impl Iterator<Item = &str> + '_ {
        [&self.base, &self.custom, &self.user]
            .into_iter()
            .filter_map(|layer| layer.name())
    }
}

// =============================================================================
// Component Set
// =============================================================================

/// The global stack plus zero or more sub-component stacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSet {
    global: Component,

    #[serde(default)]
    subs: Vec<Component>,

    #[serde(default)]
    exclusions: ExclusionSet,
}

impl ComponentSet {
    /// Creates a set with only the global component.
    pub fn new(global: Component) -> Self {
        ComponentSet {
            global: Component { id: ComponentId::Global, ..global },
            subs: Vec::new(),
            exclusions: ExclusionSet::standard(),
        }
    }

    /// Appends a sub-component; its id becomes `Sub(position)`.
    pub fn with_sub(mut self, sub: Component) -> Self {
        let id = ComponentId::Sub(self.subs.len());
        self.subs.push(Component { id, ..sub });
        self
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn global(&self) -> &Component {
        &self.global
    }

    pub fn subs(&self) -> &[Component] {
        &self.subs
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Global first, then sub-components in declared order.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        std::iter::once(ComponentId::Global)
            .chain((0..self.subs.len()).map(ComponentId::Sub))
            .collect()
    }

    pub fn component(&self, id: ComponentId) -> CoreResult<&Component> {
        match id {
            ComponentId::Global => Ok(&self.global),
            ComponentId::Sub(index) => self.subs.get(index).ok_or(CoreError::UnknownComponent(id)),
        }
    }

    pub fn component_mut(&mut self, id: ComponentId) -> CoreResult<&mut Component> {
        match id {
            ComponentId::Global => Ok(&mut self.global),
            ComponentId::Sub(index) => self
                .subs
                .get_mut(index)
                .ok_or(CoreError::UnknownComponent(id)),
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolved value of a key on a component.
    ///
    /// Pure: never mutates a layer. Unknown components and unknown keys
    /// resolve to `None`.
    pub fn resolve(&self, id: ComponentId, key: &str) -> Option<&SettingValue> {
        let component = self.component(id).ok()?;
        if !id.is_sub() {
            return component
                .overridden(key)
                .or_else(|| component.default_value(key));
        }

        let falls_back = !self.exclusions.contains(key);
        component
            .overridden(key)
            .or_else(|| falls_back.then(|| self.global.overridden(key)).flatten())
            .or_else(|| component.default_value(key))
            .or_else(|| falls_back.then(|| self.global.default_value(key)).flatten())
    }

    /// Value held by one layer slot, no precedence walk.
    pub fn layer_value(&self, id: ComponentId, role: LayerRole, key: &str) -> Option<&SettingValue> {
        self.component(id).ok()?.layer_value(role, key)
    }

    /// Union of keys defined in any layer of the component and every key
    /// its schema knows.
    pub fn all_keys(&self, id: ComponentId) -> BTreeSet<SettingKey> {
        let Ok(component) = self.component(id) else {
            return BTreeSet::new();
        };

        component
            .schema
            .keys()
            .chain(component.base.keys())
            .chain(component.custom.keys())
            .chain(component.user.keys())
            .cloned()
            .collect()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Writes a value into one layer of a component.
    pub fn set_value(
        &mut self,
        id: ComponentId,
        role: LayerRole,
        key: &SettingKey,
        value: SettingValue,
    ) -> CoreResult<bool> {
        let component = self.component_mut(id)?;
        match component.layer_mut(role) {
            Some(layer) => layer.set_value(key, value),
            None => Err(CoreError::EmptyLayerWrite {
                layer: role.to_string(),
                key: key.clone(),
            }),
        }
    }

    /// Removes a key from one layer of a component.
    pub fn remove_value(
        &mut self,
        id: ComponentId,
        role: LayerRole,
        key: &str,
    ) -> CoreResult<Option<SettingValue>> {
        let component = self.component_mut(id)?;
        Ok(component.layer_mut(role).and_then(|layer| layer.remove(key)))
    }

    /// Creates a durable custom layer on every component that lacks one.
    ///
    /// Existing custom layers are never replaced. New layers are named
    /// `<definition_id>_<name>` (lowercase, spaces as underscores), made
    /// unique against every layer name already in the set, and carry the
    /// base profile's `quality_type` and `intent_category` plus the
    /// sub-component `position`.
    ///
    /// Returns the components that received a new layer.
    pub fn ensure_custom_layers(&mut self, name: &str) -> Vec<ComponentId> {
        let mut taken: BTreeSet<String> = self
            .component_ids()
            .into_iter()
            .filter_map(|id| self.component(id).ok())
            .flat_map(|c| c.layer_names().map(str::to_string).collect::<Vec<_>>())
            .collect();

        let mut created = Vec::new();
        for id in self.component_ids() {
            let Ok(component) = self.component_mut(id) else {
                continue;
            };
            if component.has_durable_layer() {
                continue;
            }

            let layer_name = unique_layer_name(component.schema.definition_id(), name, &taken);
            taken.insert(layer_name.clone());

            let quality_type = component
                .base
                .metadata("quality_type")
                .unwrap_or("normal")
                .to_string();
            let mut layer =
                Layer::named(layer_name.clone(), LayerRole::Custom).with_metadata("quality_type", quality_type);
            if let Some(intent) = component.base.metadata("intent_category") {
                layer = layer.with_metadata("intent_category", intent.to_string());
            }
            if let ComponentId::Sub(position) = id {
                layer = layer.with_metadata("position", position.to_string());
            }

            debug!(component = %id, layer = %layer_name, "Created durable custom layer");
            component.custom = layer;
            created.push(id);
        }
        created
    }

    /// Clears the user-edit layer of every component, returning how many
    /// pending edits were discarded.
    pub fn clear_user_edits(&mut self) -> usize {
        std::iter::once(&mut self.global)
            .chain(self.subs.iter_mut())
            .map(|c| c.user.clear())
            .sum()
    }
}

/// `<prefix>_<name>`, lowercased with spaces as underscores, suffixed with
/// `_2`, `_3`, ... until unused.
fn unique_layer_name(prefix: &str, name: &str, taken: &BTreeSet<String>) -> String {
    let candidate = format!("{}_{}", prefix, name).to_lowercase().replace(' ', "_");
    if !taken.contains(&candidate) {
        return candidate;
    }
    let mut suffix = 2;
    loop {
        let numbered = format!("{}_{}", candidate, suffix);
        if !taken.contains(&numbered) {
            return numbered;
        }
        suffix += 1;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SettingDefinition;
    use crate::types::SettingType;

    fn schema(id: &str) -> SettingSchema {
        SettingSchema::new(
            id,
            vec![
                SettingDefinition::new("layer_height", SettingType::Float, SettingValue::Float(0.1)),
                SettingDefinition::new("cool_fan_speed", SettingType::Float, SettingValue::Float(100.0)),
                SettingDefinition::new("wall_line_count", SettingType::Int, SettingValue::Int(2)),
            ],
        )
    }

    fn set() -> ComponentSet {
        ComponentSet::new(
            Component::new(ComponentId::Global, schema("explorer_3"))
                .with_base(Layer::named("normal", LayerRole::Base).with_metadata("quality_type", "normal")),
        )
        .with_sub(Component::new(ComponentId::Sub(0), schema("explorer_3_extruder_0")))
    }

    #[test]
    fn test_precedence_user_custom_base_default() {
        let mut set = set();
        let g = ComponentId::Global;
        let key = SettingKey::from("layer_height");
        set.ensure_custom_layers("Fine");

        assert_eq!(set.resolve(g, "layer_height"), Some(&SettingValue::Float(0.1)));

        set.set_value(g, LayerRole::Base, &key, SettingValue::Float(0.2)).unwrap();
        assert_eq!(set.resolve(g, "layer_height"), Some(&SettingValue::Float(0.2)));

        set.set_value(g, LayerRole::Custom, &key, SettingValue::Float(0.3)).unwrap();
        assert_eq!(set.resolve(g, "layer_height"), Some(&SettingValue::Float(0.3)));

        set.set_value(g, LayerRole::User, &key, SettingValue::Float(0.4)).unwrap();
        assert_eq!(set.resolve(g, "layer_height"), Some(&SettingValue::Float(0.4)));
    }

    #[test]
    fn test_unknown_key_is_undefined() {
        let set = set();
        assert_eq!(set.resolve(ComponentId::Global, "no_such_key"), None);
        assert_eq!(set.resolve(ComponentId::Sub(7), "layer_height"), None);
    }

    #[test]
    fn test_sub_falls_back_to_global_overrides() {
        let mut set = set();
        let key = SettingKey::from("layer_height");
        set.set_value(ComponentId::Global, LayerRole::User, &key, SettingValue::Float(0.3))
            .unwrap();

        assert_eq!(
            set.resolve(ComponentId::Sub(0), "layer_height"),
            Some(&SettingValue::Float(0.3))
        );
    }

    #[test]
    fn test_excluded_key_does_not_fall_back() {
        let mut set = set();
        let key = SettingKey::from("cool_fan_speed");
        set.set_value(ComponentId::Global, LayerRole::User, &key, SettingValue::Float(40.0))
            .unwrap();

        // The extruder keeps its own default.
        assert_eq!(
            set.resolve(ComponentId::Sub(0), "cool_fan_speed"),
            Some(&SettingValue::Float(100.0))
        );
    }

    #[test]
    fn test_layer_value_reads_one_slot() {
        let mut set = set();
        let key = SettingKey::from("wall_line_count");
        set.set_value(ComponentId::Global, LayerRole::User, &key, SettingValue::Int(4))
            .unwrap();

        assert_eq!(set.layer_value(ComponentId::Global, LayerRole::Base, "wall_line_count"), None);
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::Default, "wall_line_count"),
            Some(&SettingValue::Int(2))
        );
    }

    #[test]
    fn test_all_keys_includes_layer_only_keys() {
        let mut set = set();
        let key = SettingKey::from("speed_print");
        set.set_value(ComponentId::Global, LayerRole::User, &key, SettingValue::Int(60))
            .unwrap();

        let keys = set.all_keys(ComponentId::Global);
        assert_eq!(keys.len(), 4);
        assert!(keys.contains("speed_print"));
    }

    #[test]
    fn test_empty_layer_refuses_writes() {
        let mut set = set();
        let key = SettingKey::from("layer_height");
        let err = set
            .set_value(ComponentId::Global, LayerRole::Custom, &key, SettingValue::Float(0.2))
            .unwrap_err();
        assert!(matches!(err, CoreError::EmptyLayerWrite { .. }));
    }

    #[test]
    fn test_read_only_key_drops_write() {
        let mut layer = Layer::named("c", LayerRole::Custom).with_read_only("layer_height");
        let changed = layer
            .set_value(&SettingKey::from("layer_height"), SettingValue::Float(0.2))
            .unwrap();
        assert!(!changed);
        assert!(!layer.contains("layer_height"));
    }

    #[test]
    fn test_ensure_custom_layers_names_and_metadata() {
        let mut set = set();
        let created = set.ensure_custom_layers("My Profile");
        assert_eq!(created, vec![ComponentId::Global, ComponentId::Sub(0)]);

        let global = set.global().layer(LayerRole::Custom).unwrap();
        assert_eq!(global.name(), Some("explorer_3_my_profile"));
        assert_eq!(global.metadata("quality_type"), Some("normal"));

        let sub = set.subs()[0].layer(LayerRole::Custom).unwrap();
        assert_eq!(sub.name(), Some("explorer_3_extruder_0_my_profile"));
        assert_eq!(sub.metadata("position"), Some("0"));
    }

    #[test]
    fn test_ensure_custom_layers_never_replaces() {
        let mut set = set();
        set.ensure_custom_layers("a");
        assert!(set.ensure_custom_layers("b").is_empty());
        assert_eq!(
            set.global().layer(LayerRole::Custom).unwrap().name(),
            Some("explorer_3_a")
        );
    }

    #[test]
    fn test_unique_layer_name_suffix() {
        let taken: BTreeSet<String> = ["explorer_3_fine".to_string(), "explorer_3_fine_2".to_string()]
            .into_iter()
            .collect();
        assert_eq!(unique_layer_name("explorer_3", "Fine", &taken), "explorer_3_fine_3");
    }

    #[test]
    fn test_clear_user_edits_counts() {
        let mut set = set();
        let key = SettingKey::from("layer_height");
        set.set_value(ComponentId::Global, LayerRole::User, &key, SettingValue::Float(0.3))
            .unwrap();
        set.set_value(ComponentId::Sub(0), LayerRole::User, &key, SettingValue::Float(0.3))
            .unwrap();
        assert_eq!(set.clear_user_edits(), 2);
        assert!(set.global().layer(LayerRole::User).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_json_defaults_exclusions() {
        let json = serde_json::json!({
            "global": {
                "id": "global",
                "schema": { "definition_id": "explorer_3", "definitions": [] },
                "base": { "identity": "empty", "role": "base" },
                "custom": { "identity": { "named": "c" }, "role": "custom", "values": { "speed_print": 50 } },
                "user": { "identity": { "named": "user" }, "role": "user" }
            }
        });
        let set: ComponentSet = serde_json::from_value(json).unwrap();
        assert!(set.exclusions().contains("cool_fan_speed"));
        assert_eq!(
            set.layer_value(ComponentId::Global, LayerRole::Custom, "speed_print"),
            Some(&SettingValue::Int(50))
        );
    }
}

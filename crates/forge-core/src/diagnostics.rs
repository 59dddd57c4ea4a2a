//! Per-key diagnostics: where a resolved value comes from, and which
//! must-persist keys did not make it into a durable layer.

use std::fmt;
use tracing::{debug, warn};

use crate::layer::ComponentSet;
use crate::types::{ComponentId, LayerRole, SettingKey, SettingValue};
use crate::KEY_MONITORING_PARAMS;

/// Snapshot of one key across every layer of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTrace {
    pub component: ComponentId,
    pub key: SettingKey,
    pub user: Option<SettingValue>,
    pub custom: Option<SettingValue>,
    pub base: Option<SettingValue>,
    pub default: Option<SettingValue>,
    pub resolved: Option<SettingValue>,
    /// First 80 characters of the default formula.
    pub formula_preview: Option<String>,
}

impl KeyTrace {
    /// Highest layer holding the resolved value on this component, if any.
    pub fn source(&self) -> Option<LayerRole> {
        let resolved = self.resolved.as_ref()?;
        LayerRole::DESCENDING
            .into_iter()
            .find(|role| self.layer(*role) == Some(resolved))
    }

    fn layer(&self, role: LayerRole) -> Option<&SettingValue> {
        match role {
            LayerRole::User => self.user.as_ref(),
            LayerRole::Custom => self.custom.as_ref(),
            LayerRole::Base => self.base.as_ref(),
            LayerRole::Default => self.default.as_ref(),
        }
    }
}

struct Shown<'a>(Option<&'a SettingValue>);

impl fmt::Display for Shown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Display for KeyTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: final={} user={} custom={} base={} default={}",
            self.key,
            self.component,
            Shown(self.resolved.as_ref()),
            Shown(self.user.as_ref()),
            Shown(self.custom.as_ref()),
            Shown(self.base.as_ref()),
            Shown(self.default.as_ref()),
        )?;
        if let Some(formula) = &self.formula_preview {
            write!(f, " fx={}", formula)?;
        }
        Ok(())
    }
}

/// Reads a key from every layer of a component.
pub fn trace_key(set: &ComponentSet, id: ComponentId, key: &str) -> KeyTrace {
    let read = |role| set.layer_value(id, role, key).cloned();
    KeyTrace {
        component: id,
        key: SettingKey::from(key),
        user: read(LayerRole::User),
        custom: read(LayerRole::Custom),
        base: read(LayerRole::Base),
        default: read(LayerRole::Default),
        resolved: set.resolve(id, key).cloned(),
        formula_preview: set
            .component(id)
            .ok()
            .and_then(|c| c.schema().get(key))
            .and_then(|d| d.formula_preview()),
    }
}

/// Logs the monitored keys of a component at debug level.
pub fn log_monitored_keys(set: &ComponentSet, id: ComponentId, context: &str) {
    for key in KEY_MONITORING_PARAMS {
        let trace = trace_key(set, id, key);
        if trace.resolved.is_some() {
            debug!(context, "{}", trace);
        }
    }
}

/// Global keys whose resolved value is held by neither the durable layer
/// nor the user-edit layer. Each one is logged as a warning.
pub fn unsaved_keys(set: &ComponentSet, keys: &[SettingKey]) -> Vec<SettingKey> {
    let global = ComponentId::Global;
    let mut unsaved = Vec::new();

    for key in keys {
        let resolved = set.resolve(global, key.as_str());
        let custom = set.layer_value(global, LayerRole::Custom, key.as_str());
        let user = set.layer_value(global, LayerRole::User, key.as_str());

        if resolved.is_none() && custom.is_none() {
            continue;
        }
        if custom != resolved && user != resolved {
            warn!(key = %key, resolved = %Shown(resolved), "Resolved value is not held by a saved layer");
            unsaved.push(key.clone());
        }
    }
    unsaved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Component, Layer};
    use crate::schema::{SettingDefinition, SettingSchema};
    use crate::types::SettingType;

    fn set() -> ComponentSet {
        let schema = SettingSchema::new(
            "explorer_3",
            vec![
                SettingDefinition::new("wall_line_count", SettingType::Int, SettingValue::Int(2))
                    .with_formula(format!("max(1, round((wall_thickness - 0.4) / 0.4) + 1) {}", "#".repeat(80))),
                SettingDefinition::new("layer_height", SettingType::Float, SettingValue::Float(0.2)),
            ],
        );
        ComponentSet::new(
            Component::new(ComponentId::Global, schema)
                .with_base(Layer::named("normal", LayerRole::Base).with_value("layer_height", 0.15))
                .with_custom(Layer::named("c", LayerRole::Custom)),
        )
    }

    #[test]
    fn test_trace_key_reports_each_layer() {
        let trace = trace_key(&set(), ComponentId::Global, "layer_height");
        assert_eq!(trace.base, Some(SettingValue::Float(0.15)));
        assert_eq!(trace.default, Some(SettingValue::Float(0.2)));
        assert_eq!(trace.resolved, Some(SettingValue::Float(0.15)));
        assert_eq!(trace.source(), Some(LayerRole::Base));
        assert!(trace.to_string().starts_with("layer_height [global]: final=0.15"));
    }

    #[test]
    fn test_trace_formula_preview_is_cut() {
        let trace = trace_key(&set(), ComponentId::Global, "wall_line_count");
        let preview = trace.formula_preview.unwrap();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 83);
    }

    #[test]
    fn test_unsaved_keys() {
        let mut set = set();
        let keys = vec![SettingKey::from("layer_height"), SettingKey::from("wall_line_count")];
        assert_eq!(unsaved_keys(&set, &keys), keys);

        for key in &keys {
            let value = set.resolve(ComponentId::Global, key.as_str()).cloned().unwrap();
            set.set_value(ComponentId::Global, LayerRole::Custom, key, value).unwrap();
        }
        assert!(unsaved_keys(&set, &keys).is_empty());
    }
}

//! # Setting Schema
//!
//! Read-only description of which settings exist on a component, in the
//! order the machine definition declares them.
//!
//! ## Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SettingSchema ("explorer_3")                       │
//! │                                                                         │
//! │   declared order ──►                                                    │
//! │   ┌──────────────────┬────────┬─────────────────┬──────┬─────────────┐ │
//! │   │ key              │ type   │ label           │ unit │ default     │ │
//! │   ├──────────────────┼────────┼─────────────────┼──────┼─────────────┤ │
//! │   │ layer_height     │ float  │ Layer Height    │ mm   │ 0.2         │ │
//! │   │ wall_line_count  │ int    │ Wall Line Count │      │ 2  (fx ...) │ │
//! │   │ infill_pattern   │ enum   │ Infill Pattern  │      │ "grid"      │ │
//! │   └──────────────────┴────────┴─────────────────┴──────┴─────────────┘ │
//! │                                                                         │
//! │   Lookup by key: O(log n). Absence means "unknown on this component".  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The host evaluates default formulas; the schema carries the evaluated
//! `default_value` plus the formula text for diagnostics only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{SettingKey, SettingType, SettingValue};

/// Description of a single setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub key: SettingKey,

    #[serde(rename = "type")]
    pub setting_type: SettingType,

    /// Human-readable label.
    #[serde(default)]
    pub label: String,

    /// Display unit (`mm`, `°C`, ...).
    #[serde(default)]
    pub unit: Option<String>,

    /// Evaluated default, the lowest layer of every stack.
    #[serde(default)]
    pub default_value: Option<SettingValue>,

    /// Default-value formula as written in the definition.
    #[serde(default)]
    pub default_formula: Option<String>,
}

impl SettingDefinition {
    /// Creates a definition with an evaluated default.
    pub fn new(key: impl Into<SettingKey>, setting_type: SettingType, default: SettingValue) -> Self {
        SettingDefinition {
            key: key.into(),
            setting_type,
            label: String::new(),
            unit: None,
            default_value: Some(default),
            default_formula: None,
        }
    }

    /// Sets the human label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the display unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attaches the default formula text.
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.default_formula = Some(formula.into());
        self
    }

    /// First 80 characters of the formula, with an ellipsis when cut.
    pub fn formula_preview(&self) -> Option<String> {
        const PREVIEW: usize = 80;
        let formula = self.default_formula.as_deref().filter(|f| !f.is_empty())?;
        if formula.chars().count() > PREVIEW {
            Some(format!("{}...", formula.chars().take(PREVIEW).collect::<String>()))
        } else {
            Some(formula.to_string())
        }
    }
}

/// Ordered, immutable set of setting definitions for one component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "SchemaRepr", into = "SchemaRepr")]
pub struct SettingSchema {
    definition_id: String,
    definitions: Vec<SettingDefinition>,
    index: BTreeMap<SettingKey, usize>,
}

impl SettingSchema {
    /// Builds a schema from definitions in declared order.
    ///
    /// A key declared twice keeps its first position and its last definition.
    pub fn new(definition_id: impl Into<String>, definitions: Vec<SettingDefinition>) -> Self {
        let mut schema = SettingSchema {
            definition_id: definition_id.into(),
            definitions: Vec::with_capacity(definitions.len()),
            index: BTreeMap::new(),
        };
        for definition in definitions {
            match schema.index.get(&definition.key) {
                Some(&position) => schema.definitions[position] = definition,
                None => {
                    schema.index.insert(definition.key.clone(), schema.definitions.len());
                    schema.definitions.push(definition);
                }
            }
        }
        schema
    }

    /// Identifier of the machine or extruder definition (`explorer_3`).
    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    /// Looks up a definition by key.
    pub fn get(&self, key: &str) -> Option<&SettingDefinition> {
        self.index.get(key).map(|&i| &self.definitions[i])
    }

    /// Returns true if the key is known on this component.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in schema-declared order.
    pub fn keys(&self) -> impl Iterator<Item = &SettingKey> + '_ {
        self.definitions.iter().map(|d| &d.key)
    }

    /// Definitions in schema-declared order.
    pub fn definitions(&self) -> &[SettingDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct SchemaRepr {
    definition_id: String,
    definitions: Vec<SettingDefinition>,
}

impl From<SchemaRepr> for SettingSchema {
    fn from(repr: SchemaRepr) -> Self {
        SettingSchema::new(repr.definition_id, repr.definitions)
    }
}

impl From<SettingSchema> for SchemaRepr {
    fn from(schema: SettingSchema) -> Self {
        SchemaRepr {
            definition_id: schema.definition_id,
            definitions: schema.definitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SettingSchema {
        SettingSchema::new(
            "explorer_3",
            vec![
                SettingDefinition::new("layer_height", SettingType::Float, 0.2.into())
                    .with_label("Layer Height")
                    .with_unit("mm"),
                SettingDefinition::new("infill_pattern", SettingType::Enum, "grid".into()),
                SettingDefinition::new("wall_line_count", SettingType::Int, SettingValue::Int(2)),
            ],
        )
    }

    #[test]
    fn test_declared_order_is_kept() {
        let keys: Vec<_> = schema().keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["layer_height", "infill_pattern", "wall_line_count"]);
    }

    #[test]
    fn test_lookup() {
        let schema = schema();
        assert_eq!(schema.get("layer_height").unwrap().unit.as_deref(), Some("mm"));
        assert!(schema.get("machine_width").is_none());
        assert!(schema.contains("infill_pattern"));
    }

    #[test]
    fn test_duplicate_keeps_first_position() {
        let schema = SettingSchema::new(
            "x",
            vec![
                SettingDefinition::new("a", SettingType::Int, SettingValue::Int(1)),
                SettingDefinition::new("b", SettingType::Int, SettingValue::Int(2)),
                SettingDefinition::new("a", SettingType::Int, SettingValue::Int(3)),
            ],
        );
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.definitions()[0].default_value, Some(SettingValue::Int(3)));
    }

    #[test]
    fn test_formula_preview_truncates() {
        let long = "x".repeat(100);
        let def = SettingDefinition::new("a", SettingType::Int, SettingValue::Int(1)).with_formula(long);
        let preview = def.formula_preview().unwrap();
        assert_eq!(preview.len(), 83);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_json_round_trip_rebuilds_index() {
        let json = serde_json::to_string(&schema()).unwrap();
        let back: SettingSchema = serde_json::from_str(&json).unwrap();
        assert!(back.contains("wall_line_count"));
        assert_eq!(back.definition_id(), "explorer_3");
    }
}

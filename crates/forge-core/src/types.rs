//! # Domain Types
//!
//! Core value types used throughout Forge Profile Sync.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SettingKey    │   │  SettingValue   │   │   SettingType   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  "layer_height" │   │  Bool           │   │  Bool  Int      │       │
//! │  │  opaque string  │   │  Int            │   │  Float Str      │       │
//! │  │  Ord + Hash     │   │  Float          │   │  Enum  Polygon  │       │
//! │  └─────────────────┘   │  Text           │   │  OptionalExtr.  │       │
//! │                        │  Unrepresentable│   └─────────────────┘       │
//! │  ┌─────────────────┐   └─────────────────┘   ┌─────────────────┐       │
//! │  │   ComponentId   │                         │    LayerRole    │       │
//! │  │  ─────────────  │                         │  ─────────────  │       │
//! │  │  Global         │                         │  Default  <     │       │
//! │  │  Sub(index)     │                         │  Base     <     │       │
//! │  └─────────────────┘                         │  Custom   <     │       │
//! │                                              │  User           │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Canonical Text Form
//! Every representable value has exactly one textual form, used by the
//! settings codec. Booleans print as `True`/`False`, floats always carry a
//! decimal point or exponent (`20.0`, `0.2`, `1e-7`) so that re-parsing never
//! turns a float into an integer.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

// =============================================================================
// Setting Key
// =============================================================================

/// Stable identifier of a setting (`layer_height`, `cool_fan_speed`, ...).
///
/// Opaque to the engine beyond equality and ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingKey(String);

impl SettingKey {
    /// Creates a key from anything string-like.
    pub fn new(key: impl Into<String>) -> Self {
        SettingKey(key.into())
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SettingKey {
    fn from(key: &str) -> Self {
        SettingKey(key.to_string())
    }
}

impl From<String> for SettingKey {
    fn from(key: String) -> Self {
        SettingKey(key)
    }
}

impl Borrow<str> for SettingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Setting Value
// =============================================================================

/// A typed setting value.
///
/// ## Equality
/// Comparisons are exact on the typed value: `Int(20) != Float(20.0)` and
/// `Text("20") != Int(20)`. The merge engine relies on this for its
/// "different from" checks.
///
/// ## Unrepresentable
/// Arrays, objects and `null` coming from a host snapshot are kept as raw
/// JSON. They resolve like any other value but are never written to the
/// settings text format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Unrepresentable(serde_json::Value),
}

impl SettingValue {
    /// Convenience constructor for text values.
    pub fn text(value: impl Into<String>) -> Self {
        SettingValue::Text(value.into())
    }

    /// Returns true for values the settings codec can carry.
    pub fn is_representable(&self) -> bool {
        !matches!(self, SettingValue::Unrepresentable(_))
    }

    /// Returns the canonical textual form, or `None` for unrepresentable values.
    pub fn canonical_text(&self) -> Option<String> {
        match self {
            SettingValue::Unrepresentable(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Coerces a raw token from the settings text format into a typed value.
    ///
    /// ## Order
    /// 1. Empty string → `Text("")` (never a numeric zero)
    /// 2. `true`/`false`, case-insensitive → `Bool`
    /// 3. Integer → `Int`
    /// 4. Floating point → `Float`
    /// 5. Anything else → `Text`
    ///
    /// ## Example
    /// ```rust
    /// use forge_core::SettingValue;
    ///
    /// assert_eq!(SettingValue::from_token("True"), SettingValue::Bool(true));
    /// assert_eq!(SettingValue::from_token("20"), SettingValue::Int(20));
    /// assert_eq!(SettingValue::from_token("0.2"), SettingValue::Float(0.2));
    /// assert_eq!(SettingValue::from_token(""), SettingValue::text(""));
    /// ```
    pub fn from_token(raw: &str) -> Self {
        if raw.is_empty() {
            return SettingValue::Text(String::new());
        }

        if raw.eq_ignore_ascii_case("true") {
            return SettingValue::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return SettingValue::Bool(false);
        }

        if let Ok(i) = raw.parse::<i64>() {
            return SettingValue::Int(i);
        }

        if let Ok(f) = raw.parse::<f64>() {
            return SettingValue::Float(f);
        }

        SettingValue::Text(raw.to_string())
    }

    /// Coerces this value to a declared setting type.
    ///
    /// Returns `None` when the value cannot be expressed in the target type
    /// (for example `"abc"` as a float, or anything as a polygon).
    ///
    /// ## Rules
    /// ```text
    /// ┌──────────────────┬──────────────────────────────────────────────────┐
    /// │ Target           │ Accepted input                                   │
    /// ├──────────────────┼──────────────────────────────────────────────────┤
    /// │ Bool             │ Bool; numbers (non-zero = true);                 │
    /// │                  │ text "true"/"1"/"yes" (anything else = false)    │
    /// │ Int, OptExtruder │ Int; Float (truncated); Bool (1/0);              │
    /// │                  │ text "true"/"false" (1/0) or numeric text        │
    /// │ Float            │ Float; Int; Bool (1.0/0.0); numeric text         │
    /// │ Str, Enum        │ any representable value (canonical text)         │
    /// │ Polygon(s)       │ never                                            │
    /// └──────────────────┴──────────────────────────────────────────────────┘
    /// ```
    pub fn coerce_to(&self, target: SettingType) -> Option<SettingValue> {
        if !self.is_representable() || !target.is_importable() {
            return None;
        }

        match target {
            SettingType::Bool => Some(SettingValue::Bool(match self {
                SettingValue::Bool(b) => *b,
                SettingValue::Int(i) => *i != 0,
                SettingValue::Float(f) => *f != 0.0,
                SettingValue::Text(s) => {
                    matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
                }
                SettingValue::Unrepresentable(_) => return None,
            })),

            SettingType::Int | SettingType::OptionalExtruder => match self {
                SettingValue::Int(i) => Some(SettingValue::Int(*i)),
                SettingValue::Float(f) => truncate(*f),
                SettingValue::Bool(b) => Some(SettingValue::Int(i64::from(*b))),
                SettingValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                    "true" => Some(SettingValue::Int(1)),
                    "false" => Some(SettingValue::Int(0)),
                    other => other.trim().parse::<f64>().ok().and_then(truncate),
                },
                SettingValue::Unrepresentable(_) => None,
            },

            SettingType::Float => match self {
                SettingValue::Float(f) => Some(SettingValue::Float(*f)),
                SettingValue::Int(i) => Some(SettingValue::Float(*i as f64)),
                SettingValue::Bool(b) => Some(SettingValue::Float(if *b { 1.0 } else { 0.0 })),
                SettingValue::Text(s) => s.trim().parse::<f64>().ok().map(SettingValue::Float),
                SettingValue::Unrepresentable(_) => None,
            },

            SettingType::Str | SettingType::Enum => self.canonical_text().map(SettingValue::Text),

            SettingType::Polygon | SettingType::Polygons => None,
        }
    }
}

fn truncate(f: f64) -> Option<SettingValue> {
    if f.is_finite() {
        Some(SettingValue::Int(f.trunc() as i64))
    } else {
        None
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(true) => f.write_str("True"),
            SettingValue::Bool(false) => f.write_str("False"),
            SettingValue::Int(i) => write!(f, "{}", i),
            // Debug formatting keeps the trailing ".0" that Display drops
            SettingValue::Float(v) => write!(f, "{:?}", v),
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Unrepresentable(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

// =============================================================================
// Setting Type
// =============================================================================

/// Declared type of a setting in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    Bool,
    Int,
    Float,
    Str,
    Enum,
    /// Extruder index or `-1` for "not set".
    OptionalExtruder,
    Polygon,
    Polygons,
}

impl SettingType {
    /// Returns false for composite types that the text format cannot carry.
    pub fn is_importable(&self) -> bool {
        !matches!(self, SettingType::Polygon | SettingType::Polygons)
    }
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingType::Bool => "bool",
            SettingType::Int => "int",
            SettingType::Float => "float",
            SettingType::Str => "str",
            SettingType::Enum => "enum",
            SettingType::OptionalExtruder => "optional_extruder",
            SettingType::Polygon => "polygon",
            SettingType::Polygons => "polygons",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Component Id
// =============================================================================

/// Identifies one component of the machine: the global stack or one
/// sub-component (extruder) by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentId {
    Global,
    Sub(usize),
}

impl ComponentId {
    /// Returns true for sub-components.
    #[inline]
    pub const fn is_sub(&self) -> bool {
        matches!(self, ComponentId::Sub(_))
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Global => f.write_str("global"),
            ComponentId::Sub(index) => write!(f, "extruder {}", index),
        }
    }
}

// =============================================================================
// Layer Role
// =============================================================================

/// Precedence position of a layer within a component.
///
/// Ordering follows precedence: `Default < Base < Custom < User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRole {
    /// Schema default values.
    Default,
    /// Base (quality) profile.
    Base,
    /// Durable custom profile.
    Custom,
    /// Transient user edits.
    User,
}

impl LayerRole {
    /// Roles from highest to lowest precedence.
    pub const DESCENDING: [LayerRole; 4] = [
        LayerRole::User,
        LayerRole::Custom,
        LayerRole::Base,
        LayerRole::Default,
    ];
}

impl fmt::Display for LayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerRole::Default => "default",
            LayerRole::Base => "base",
            LayerRole::Custom => "custom",
            LayerRole::User => "user",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_coercion_order() {
        assert_eq!(SettingValue::from_token("FALSE"), SettingValue::Bool(false));
        assert_eq!(SettingValue::from_token("-3"), SettingValue::Int(-3));
        assert_eq!(SettingValue::from_token("20.0"), SettingValue::Float(20.0));
        assert_eq!(SettingValue::from_token("grid"), SettingValue::text("grid"));
        assert_eq!(SettingValue::from_token("truely"), SettingValue::text("truely"));
    }

    #[test]
    fn test_empty_token_is_text() {
        assert_eq!(SettingValue::from_token(""), SettingValue::Text(String::new()));
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(SettingValue::Bool(true).to_string(), "True");
        assert_eq!(SettingValue::Float(20.0).to_string(), "20.0");
        assert_eq!(SettingValue::Float(0.2).to_string(), "0.2");
        assert_eq!(SettingValue::Int(7).to_string(), "7");
        assert!(SettingValue::Unrepresentable(serde_json::json!([100]))
            .canonical_text()
            .is_none());
    }

    #[test]
    fn test_float_text_reparses_as_float() {
        for v in [20.0, 0.2, 1e-7, 123456789.5, -0.0] {
            let text = SettingValue::Float(v).to_string();
            assert_eq!(SettingValue::from_token(&text), SettingValue::Float(v));
        }
    }

    #[test]
    fn test_typed_equality_is_exact() {
        assert_ne!(SettingValue::Int(20), SettingValue::Float(20.0));
        assert_ne!(SettingValue::text("20"), SettingValue::Int(20));
    }

    #[test]
    fn test_coerce_to_int() {
        assert_eq!(
            SettingValue::Float(3.9).coerce_to(SettingType::Int),
            Some(SettingValue::Int(3))
        );
        assert_eq!(
            SettingValue::text("true").coerce_to(SettingType::OptionalExtruder),
            Some(SettingValue::Int(1))
        );
        assert_eq!(
            SettingValue::text("12.7").coerce_to(SettingType::Int),
            Some(SettingValue::Int(12))
        );
        assert_eq!(SettingValue::text("grid").coerce_to(SettingType::Int), None);
    }

    #[test]
    fn test_coerce_to_bool() {
        assert_eq!(
            SettingValue::text("Yes").coerce_to(SettingType::Bool),
            Some(SettingValue::Bool(true))
        );
        assert_eq!(
            SettingValue::text("nope").coerce_to(SettingType::Bool),
            Some(SettingValue::Bool(false))
        );
        assert_eq!(
            SettingValue::Int(0).coerce_to(SettingType::Bool),
            Some(SettingValue::Bool(false))
        );
    }

    #[test]
    fn test_coerce_to_float_and_text() {
        assert_eq!(
            SettingValue::Int(20).coerce_to(SettingType::Float),
            Some(SettingValue::Float(20.0))
        );
        assert_eq!(
            SettingValue::Int(20).coerce_to(SettingType::Enum),
            Some(SettingValue::text("20"))
        );
        assert_eq!(SettingValue::text("abc").coerce_to(SettingType::Float), None);
    }

    #[test]
    fn test_polygons_never_coerce() {
        assert_eq!(SettingValue::text("[]").coerce_to(SettingType::Polygons), None);
        assert!(!SettingType::Polygon.is_importable());
    }

    #[test]
    fn test_value_json_shape() {
        let values: Vec<SettingValue> =
            serde_json::from_str(r#"[true, 20, 0.2, "grid", [100], null]"#).unwrap();
        assert_eq!(values[0], SettingValue::Bool(true));
        assert_eq!(values[1], SettingValue::Int(20));
        assert_eq!(values[2], SettingValue::Float(0.2));
        assert_eq!(values[3], SettingValue::text("grid"));
        assert!(!values[4].is_representable());
        assert!(!values[5].is_representable());
    }

    #[test]
    fn test_layer_role_ordering() {
        assert!(LayerRole::Default < LayerRole::Base);
        assert!(LayerRole::Base < LayerRole::Custom);
        assert!(LayerRole::Custom < LayerRole::User);
        assert_eq!(LayerRole::DESCENDING[0], LayerRole::User);
    }
}

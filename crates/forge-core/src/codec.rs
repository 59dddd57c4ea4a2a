//! # Settings Text Codec
//!
//! Line-oriented, shell-argument-style format for a fully resolved
//! configuration. This is the only format the staging file ever holds.
//!
//! ## Token Stream
//! ```text
//! -s layer_height="0.2" -s infill_pattern="grid" ...      ◄── global section
//! -e0 -s cool_fan_speed="100.0" ...                       ◄── extruder 0
//! -e1 -s cool_fan_speed="80.0" ...                        ◄── extruder 1
//! -g -e0 -l "0" -s extruder_nr="0" -e1 -l "1" ...         ◄── object groups
//! ```
//!
//! ## Escaping
//! A `"` inside a value becomes `\"`. Nothing else is escaped.
//!
//! ## Parsing
//! Only `-s key="value"` and `-s key=value` tokens carry values; the quoted
//! form wins when both could match. `-e<n>` and `-g` markers only decide
//! which section a token lands in. Object-group sections are skipped.
//! Values are typed with [`SettingValue::from_token`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::trace;

use crate::layer::ComponentSet;
use crate::types::{ComponentId, SettingKey, SettingValue};

// =============================================================================
// Parsed Settings
// =============================================================================

/// Ordered key/value list. Re-inserting a key keeps its first position and
/// takes the new value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSettings {
    entries: Vec<(SettingKey, SettingValue)>,
    index: BTreeMap<SettingKey, usize>,
}

impl ParsedSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: SettingKey, value: SettingValue) {
        match self.index.get(&key) {
            Some(&position) => self.entries[position].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&SettingKey, &SettingValue)> + '_ {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &SettingKey> + '_ {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ParsedSettings {
    type Item = (SettingKey, SettingValue);
    type IntoIter = std::vec::IntoIter<(SettingKey, SettingValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(SettingKey, SettingValue)> for ParsedSettings {
    fn from_iter<I: IntoIterator<Item = (SettingKey, SettingValue)>>(iter: I) -> Self {
        let mut settings = ParsedSettings::new();
        for (key, value) in iter {
            settings.insert(key, value);
        }
        settings
    }
}

/// Parse result split by section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedConfig {
    /// Tokens before the first `-e<n>` marker.
    pub global: ParsedSettings,
    /// Tokens after each `-e<n>` marker, by extruder index.
    pub components: BTreeMap<usize, ParsedSettings>,
    /// `-s` tokens inside object groups, which are not imported.
    pub skipped_object_tokens: usize,
}

impl ParsedConfig {
    /// Total number of settings across all imported sections.
    pub fn len(&self) -> usize {
        self.global.len() + self.components.values().map(ParsedSettings::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens to one list for import: every global entry, then keys that
    /// only appear in extruder sections (lowest extruder first).
    pub fn flatten(self) -> ParsedSettings {
        let mut flat = self.global;
        for (_, section) in self.components {
            for (key, value) in section {
                if !flat.contains(key.as_str()) {
                    flat.insert(key, value);
                }
            }
        }
        flat
    }
}

// =============================================================================
// Object Overrides
// =============================================================================

/// Per-object settings emitted in the object-group section. Export only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectOverride {
    /// Extruder the object prints with.
    pub extruder: usize,
    /// Object-specific settings, in emission order.
    pub settings: Vec<(SettingKey, SettingValue)>,
}

// =============================================================================
// Serializer
// =============================================================================

/// Escapes a value for the quoted form.
pub fn escape(value: &str) -> String {
    value.replace('"', "\\\"")
}

/// Reverses [`escape`].
pub fn unescape(value: &str) -> String {
    value.replace("\\\"", "\"")
}

fn push_setting(out: &mut Vec<String>, key: &SettingKey, value: &SettingValue) {
    match value.canonical_text() {
        Some(text) => out.push(format!("-s {}=\"{}\"", key, escape(&text))),
        None => trace!(key = %key, "Skipping unrepresentable value"),
    }
}

fn push_component(out: &mut Vec<String>, set: &ComponentSet, id: ComponentId) {
    let Ok(component) = set.component(id) else {
        return;
    };
    for key in component.schema().keys() {
        if let Some(value) = set.resolve(id, key.as_str()) {
            push_setting(out, key, value);
        }
    }
}

/// Serializes the resolved configuration of every component.
///
/// Output depends only on the schemas' key order, the resolved values and
/// the sub-component list. Undefined and unrepresentable values are left
/// out. The object-group section appears only when `objects` is non-empty.
pub fn serialize(set: &ComponentSet, objects: &[ObjectOverride]) -> String {
    let mut out = Vec::new();

    push_component(&mut out, set, ComponentId::Global);

    for index in 0..set.subs().len() {
        out.push(format!("-e{}", index));
        push_component(&mut out, set, ComponentId::Sub(index));
    }

    if !objects.is_empty() {
        out.push("-g".to_string());
        for (position, object) in objects.iter().enumerate() {
            out.push(format!("-e{}", object.extruder));
            out.push(format!("-l \"{}\"", position));
            if object.settings.is_empty() {
                let value = SettingValue::text(object.extruder.to_string());
                push_setting(&mut out, &SettingKey::from("extruder_nr"), &value);
            } else {
                for (key, value) in &object.settings {
                    push_setting(&mut out, key, value);
                }
            }
        }
    }

    out.join(" ")
}

// =============================================================================
// Parser
// =============================================================================

/// One `-s` setting, an `-e<n>` extruder marker, or the `-g` object-group marker.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"-s\s+(?P<key>\w+)=(?:"(?P<quoted>(?:[^"\\]|\\.)*)"|(?P<bare>\S+))|-e(?P<component>\d+)\b|-g\b"#)
        .expect("valid regex")
});

#[derive(Clone, Copy)]
enum Section {
    Global,
    Component(usize),
    Objects,
}

/// Parses settings text into sections.
pub fn parse_sections(text: &str) -> ParsedConfig {
    let mut config = ParsedConfig::default();
    let mut section = Section::Global;

    for caps in TOKEN_RE.captures_iter(text) {
        if let Some(key) = caps.name("key") {
            let raw = match (caps.name("quoted"), caps.name("bare")) {
                (Some(quoted), _) => unescape(quoted.as_str()),
                (None, Some(bare)) => bare.as_str().to_string(),
                (None, None) => String::new(),
            };
            let key = SettingKey::from(key.as_str());
            let value = SettingValue::from_token(&raw);
            match section {
                Section::Global => config.global.insert(key, value),
                Section::Component(index) => config.components.entry(index).or_default().insert(key, value),
                Section::Objects => config.skipped_object_tokens += 1,
            }
        } else if let Some(index) = caps.name("component") {
            if !matches!(section, Section::Objects) {
                match index.as_str().parse::<usize>() {
                    Ok(index) => section = Section::Component(index),
                    Err(_) => trace!(marker = index.as_str(), "Ignoring oversized extruder marker"),
                }
            }
        } else {
            section = Section::Objects;
        }
    }

    config
}

/// Parses settings text into one ordered list, see [`ParsedConfig::flatten`].
///
/// ## Example
/// ```rust
/// use forge_core::codec::parse;
/// use forge_core::SettingValue;
///
/// let parsed = parse(r#"-s layer_height="0.2" -s infill_sparse_density=20"#);
/// assert_eq!(parsed.get("layer_height"), Some(&SettingValue::Float(0.2)));
/// assert_eq!(parsed.get("infill_sparse_density"), Some(&SettingValue::Int(20)));
/// ```
pub fn parse(text: &str) -> ParsedSettings {
    parse_sections(text).flatten()
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # Validation Module
//!
//! Input checks applied to imported settings and user-supplied names.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Import Validation Layers                           │
//! │                                                                         │
//! │  Layer 1: Parse boundary (forge-sync)                                  │
//! │  ├── Empty or unparseable content rejected                             │
//! │  └── No layer touched yet                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Key filter (THIS MODULE: filter_importable)                  │
//! │  ├── machine_* keys belong to the machine definition                   │
//! │  └── Keys the schema does not know are dropped                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Per-key coercion (THIS MODULE: coerce_for_import)            │
//! │  ├── Array literals and polygon types are not importable               │
//! │  └── Value converted to the declared type or skipped                   │
//! │                                                                         │
//! │  Layers 1-2 are all-or-nothing; layer 3 is best-effort per key         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use forge_core::validation::{is_reserved_key, validate_profile_name};
//!
//! assert!(is_reserved_key("machine_width"));
//! validate_profile_name("PLA Fine").unwrap();
//! ```

use crate::codec::ParsedSettings;
use crate::error::ValidationError;
use crate::schema::SettingSchema;
use crate::types::{SettingKey, SettingValue};
use crate::{MAX_PROFILE_NAME_LEN, RESERVED_KEY_PREFIX};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a setting key.
///
/// ## Rules
/// - Must not be empty
/// - Only letters, digits and underscores
pub fn validate_setting_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "key".to_string(),
        });
    }

    if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: "key".to_string(),
            reason: "must contain only letters, numbers, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a profile (configuration) name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 100 characters
///
/// ## Example
/// ```rust
/// use forge_core::validation::validate_profile_name;
///
/// assert!(validate_profile_name("PLA Fine").is_ok());
/// assert!(validate_profile_name("   ").is_err());
/// ```
pub fn validate_profile_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_PROFILE_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_PROFILE_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a download URL. Only emptiness is checked; the downloader
/// owns everything else.
pub fn validate_url(url: &str) -> ValidationResult<()> {
    if url.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "url".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Import Filters
// =============================================================================

/// Keys owned by the machine definition (`machine_*`).
#[inline]
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_KEY_PREFIX)
}

/// True for values that look like a bracketed array (`[100]`) or that are
/// already unrepresentable.
pub fn is_array_literal(value: &SettingValue) -> bool {
    match value {
        SettingValue::Text(s) => s.starts_with('[') && s.ends_with(']'),
        SettingValue::Unrepresentable(_) => true,
        _ => false,
    }
}

/// Converts a parsed value into the type the schema declares for its key.
///
/// ## Errors
/// - [`ValidationError::Reserved`] for `machine_*` keys
/// - [`ValidationError::NotImportable`] for unknown keys, array literals,
///   polygon types and values that cannot be read as the declared type
pub fn coerce_for_import(
    key: &SettingKey,
    value: &SettingValue,
    schema: &SettingSchema,
) -> ValidationResult<SettingValue> {
    if is_reserved_key(key.as_str()) {
        return Err(ValidationError::Reserved { key: key.clone() });
    }

    let definition = schema.get(key.as_str()).ok_or_else(|| ValidationError::NotImportable {
        key: key.clone(),
        reason: format!("unknown on {}", schema.definition_id()),
    })?;

    if is_array_literal(value) {
        return Err(ValidationError::NotImportable {
            key: key.clone(),
            reason: "array values are not importable".to_string(),
        });
    }

    value
        .coerce_to(definition.setting_type)
        .ok_or_else(|| ValidationError::NotImportable {
            key: key.clone(),
            reason: format!("'{}' is not a valid {}", value, definition.setting_type),
        })
}

/// Outcome of [`filter_importable`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterReport {
    /// Settings that may be applied, in parsed order.
    pub accepted: ParsedSettings,
    /// `machine_*` keys that were dropped.
    pub reserved: Vec<SettingKey>,
    /// Keys the schema does not define.
    pub unknown: Vec<SettingKey>,
}

/// Drops reserved keys and keys unknown to the schema.
///
/// Values are left as parsed; type coercion happens per key when applied.
pub fn filter_importable(parsed: ParsedSettings, schema: &SettingSchema) -> FilterReport {
    let mut report = FilterReport::default();
    for (key, value) in parsed {
        if is_reserved_key(key.as_str()) {
            report.reserved.push(key);
        } else if !schema.contains(key.as_str()) {
            report.unknown.push(key);
        } else {
            report.accepted.insert(key, value);
        }
    }
    report
}

// =============================================================================
// Unit Tests
// =============================================================================

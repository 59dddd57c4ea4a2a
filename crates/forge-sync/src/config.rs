//! # Sync Configuration
//!
//! Configuration management for profile export and import.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FORGE_DEBUG=1                                                      │
//! │     FORGE_CHUNK_SIZE=50                                                │
//! │     FORGE_STAGING_DIR=/tmp/forge                                       │
//! │     FORGE_DEVICE_TYPE=EP3                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/forge-profile-sync/sync.toml (Linux)                     │
//! │     ~/Library/Application Support/com.forge.profile-sync/sync.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     chunk_size = 30, delays 100/300/100 ms, device EP3 / cura          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [engine]
//! debug_mode = false
//! chunk_size = 30
//!
//! [staging]
//! dir_name = "forge_profiles"
//! extension = "txt"
//!
//! [timing]
//! edit_barrier_delay_ms = 100
//! import_start_delay_ms = 300
//! final_refresh_delay_ms = 100
//!
//! [cloud]
//! device_type = "EP3"
//! slice_type = "cura"
//! target_definition = "explorer_3"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use forge_core::DEFAULT_CHUNK_SIZE;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Engine Settings
// =============================================================================

/// Engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Per-key diagnostic traces for the monitored keys, plus post-save
    /// verification. Off in production.
    #[serde(default)]
    pub debug_mode: bool,

    /// Settings applied per import chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            debug_mode: false,
            chunk_size: default_chunk_size(),
        }
    }
}

// =============================================================================
// Staging Settings
// =============================================================================

/// Where staging files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSettings {
    /// Directory under the process temp dir. An absolute path is used as is.
    #[serde(default = "default_staging_dir")]
    pub dir_name: String,

    /// Extension of staging files, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_staging_dir() -> String {
    "forge_profiles".to_string()
}

fn default_extension() -> String {
    "txt".to_string()
}

impl Default for StagingSettings {
    fn default() -> Self {
        StagingSettings {
            dir_name: default_staging_dir(),
            extension: default_extension(),
        }
    }
}

impl StagingSettings {
    /// Resolved staging directory.
    pub fn directory(&self) -> PathBuf {
        let dir = PathBuf::from(&self.dir_name);
        if dir.is_absolute() {
            dir
        } else {
            std::env::temp_dir().join(dir)
        }
    }
}

// =============================================================================
// Timing Settings
// =============================================================================

/// Fixed delays between steps, so the host can repaint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// After flushing pending edits, before merging (export).
    #[serde(default = "default_edit_barrier_delay")]
    pub edit_barrier_delay_ms: u64,

    /// After the download is staged, before parsing (import).
    #[serde(default = "default_import_start_delay")]
    pub import_start_delay_ms: u64,

    /// After the batch completes, before the final refresh notification.
    #[serde(default = "default_final_refresh_delay")]
    pub final_refresh_delay_ms: u64,
}

fn default_edit_barrier_delay() -> u64 {
    100
}
fn default_import_start_delay() -> u64 {
    300
}
fn default_final_refresh_delay() -> u64 {
    100
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            edit_barrier_delay_ms: default_edit_barrier_delay(),
            import_start_delay_ms: default_import_start_delay(),
            final_refresh_delay_ms: default_final_refresh_delay(),
        }
    }
}

impl TimingSettings {
    pub fn edit_barrier_delay(&self) -> Duration {
        Duration::from_millis(self.edit_barrier_delay_ms)
    }

    pub fn import_start_delay(&self) -> Duration {
        Duration::from_millis(self.import_start_delay_ms)
    }

    pub fn final_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.final_refresh_delay_ms)
    }
}

// =============================================================================
// Cloud Settings
// =============================================================================

/// Identity used to record and filter cloud profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Device type stored with every profile record.
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Slicer family stored with every profile record.
    #[serde(default = "default_slice_type")]
    pub slice_type: String,

    /// Machine definition id the workflow is offered for.
    #[serde(default = "default_target_definition")]
    pub target_definition: String,
}

fn default_device_type() -> String {
    "EP3".to_string()
}
fn default_slice_type() -> String {
    "cura".to_string()
}
fn default_target_definition() -> String {
    "explorer_3".to_string()
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            device_type: default_device_type(),
            slice_type: default_slice_type(),
            target_definition: default_target_definition(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub staging: StagingSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub cloud: CloudSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.engine.chunk_size == 0 {
            return Err(SyncError::InvalidConfig("chunk_size must be greater than 0".into()));
        }

        if self.staging.dir_name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("staging.dir_name must not be empty".into()));
        }

        if self.staging.extension.contains(['.', '/', '\\']) {
            return Err(SyncError::InvalidConfig(format!(
                "staging.extension must be a bare extension, got: {}",
                self.staging.extension
            )));
        }

        if self.cloud.device_type.is_empty() || self.cloud.slice_type.is_empty() {
            return Err(SyncError::InvalidConfig(
                "cloud.device_type and cloud.slice_type are required".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(flag) = lookup("FORGE_DEBUG") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.engine.debug_mode = true,
                "0" | "false" | "no" | "off" => self.engine.debug_mode = false,
                _ => warn!(value = %flag, "Unknown FORGE_DEBUG value"),
            }
        }

        if let Some(size) = lookup("FORGE_CHUNK_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => {
                    debug!(chunk_size = n, "Overriding chunk size from environment");
                    self.engine.chunk_size = n;
                }
                Err(_) => warn!(value = %size, "Invalid FORGE_CHUNK_SIZE"),
            }
        }

        if let Some(dir) = lookup("FORGE_STAGING_DIR") {
            debug!(dir = %dir, "Overriding staging dir from environment");
            self.staging.dir_name = dir;
        }

        if let Some(device_type) = lookup("FORGE_DEVICE_TYPE") {
            self.cloud.device_type = device_type;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "forge", "profile-sync")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Returns true if debug diagnostics are on.
    pub fn debug_mode(&self) -> bool {
        self.engine.debug_mode
    }
}

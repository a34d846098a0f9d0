//! Configuration management for mzflow
//!
//! This module handles loading, parsing, and validating configuration from:
//! 1. Embedded default_config.toml (compile-time defaults)
//! 2. User config at ~/.config/mzflow/config.toml (or platform-specific location)
//! 3. Project-local config at ./.mzflow/config.toml
//!
//! Layers are merged table by table, so an override file only needs the
//! keys it changes.

use crate::domain::task::{CompositeConfig, FailurePolicy, PhaseWeights, SchedulerConfig};
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration embedded in the library
const DEFAULT_CONFIG: &str = include_str!("../../default_config.toml");

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub composite: CompositeSection,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
        }
    }
}

/// Composite task settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub weights: PhaseWeights,
}

impl Default for CompositeSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
            failure_policy: FailurePolicy::default(),
            weights: PhaseWeights::default(),
        }
    }
}

/// Feature table import settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_true")]
    pub import_raw_files: bool,
    /// Suffixes tried next to the table file when a run location is missing
    #[serde(default = "default_location_fallbacks")]
    pub location_fallbacks: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            import_raw_files: true,
            location_fallbacks: default_location_fallbacks(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default = "default_false")]
    pub file_line: bool,
    #[serde(default = "default_false")]
    pub file_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            timestamps: true,
            file_line: false,
            file_output: false,
            file_path: None,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_worker_threads() -> usize {
    4
}

fn default_thread_name() -> String {
    "mzflow-worker".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_handoff_timeout_ms() -> u64 {
    30_000
}

fn default_location_fallbacks() -> Vec<String> {
    vec![".gz".to_string(), ".zip".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

// ============================================================================
// Configuration loading
// ============================================================================

impl EngineConfig {
    /// Load configuration with fallback chain:
    /// 1. Project-local .mzflow/config.toml
    /// 2. User config ~/.config/mzflow/config.toml
    /// 3. Embedded default_config.toml
    pub fn load() -> ConfigResult<Self> {
        let user = Self::user_config_path();
        let project = Self::project_config_path();
        Self::load_layers(&[user, project].into_iter().flatten().collect::<Vec<_>>())
    }

    /// Embedded defaults overlaid with each existing file in `layers`, in
    /// order. An unreadable layer is logged and skipped.
    pub fn load_layers(layers: &[PathBuf]) -> ConfigResult<Self> {
        let mut merged = parse_table(DEFAULT_CONFIG, "default config")?;

        for path in layers.iter().filter(|p| p.exists()) {
            match read_table(path) {
                Ok(overlay) => {
                    merge_tables(&mut merged, overlay);
                    tracing::info!("Loaded config from {:?}", path);
                }
                Err(e) => {
                    tracing::warn!("Failed to load config layer: {}", e);
                }
            }
        }

        let config: EngineConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without layering
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: EngineConfig = toml::from_str(&contents).map_err(|e| {
            ConfigError::Parse(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the user config path (~/.config/mzflow/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|config_dir| config_dir.join("mzflow").join("config.toml"))
    }

    /// Get the project-local config path (./.mzflow/config.toml)
    pub fn project_config_path() -> Option<PathBuf> {
        std::env::current_dir()
            .ok()
            .map(|cwd| cwd.join(".mzflow").join("config.toml"))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.worker_threads must be at least 1".to_string(),
            ));
        }
        if self.composite.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "composite.poll_interval_ms must be positive".to_string(),
            ));
        }
        self.composite
            .weights
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("composite.weights: {e}")))
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let toml_string =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, toml_string).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            scheduler: SchedulerSection::default(),
            composite: CompositeSection::default(),
            import: ImportConfig::default(),
            logging: LoggingConfig::default(),
        })
    }
}

fn parse_table(contents: &str, origin: &str) -> ConfigResult<toml::Table> {
    toml::from_str(contents)
        .map_err(|e| ConfigError::Parse(format!("Failed to parse {origin}: {e}")))
}

fn read_table(path: &Path) -> ConfigResult<toml::Table> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_table(&contents, &path.display().to_string())
}

/// Overlay `overlay` onto `base`; nested tables merge, other values replace
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(nested) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, nested);
                    continue;
                }
                base.insert(key, toml::Value::Table(nested));
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            worker_threads: config.scheduler.worker_threads,
            thread_name: config.scheduler.thread_name.clone(),
        }
    }
}

impl From<&EngineConfig> for CompositeConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            weights: config.composite.weights,
            failure_policy: config.composite.failure_policy,
            poll_interval: Duration::from_millis(config.composite.poll_interval_ms),
            handoff_timeout: Duration::from_millis(config.composite.handoff_timeout_ms),
        }
    }
}

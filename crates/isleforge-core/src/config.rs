//! Configuration loading and typed config structures for the generator engine.
//!
//! The configuration lives in a YAML file (`isleforge.yaml` by default, or
//! the path in `ISLEFORGE_CONFIG`). Every section and field is optional and
//! falls back to the defaults defined here.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "ISLEFORGE_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "isleforge.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GeneratorConfig {
    /// Where the tier catalog comes from.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Resolution mode selection.
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Progression rules (slots, permissions, automatic unlocks).
    #[serde(default)]
    pub progression: ProgressionConfig,

    /// Generation-time gates.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Persistence backend and writer tuning.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GeneratorConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `DATABASE_URL` overrides `storage.postgres_url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.storage.apply_env_overrides();
        Ok(config)
    }

    /// Load from `ISLEFORGE_CONFIG` (or `isleforge.yaml`). A missing file
    /// yields the defaults; an unreadable or invalid one is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file cannot be loaded.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        if path.exists() {
            Ok((Self::from_file(&path)?, Some(path)))
        } else {
            let mut config = Self::default();
            config.storage.apply_env_overrides();
            Ok((config, None))
        }
    }
}

/// Catalog location and reload polling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogConfig {
    /// YAML catalog file.
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,

    /// Seconds between catalog reloads (0 disables polling).
    #[serde(default)]
    pub reload_interval_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            reload_interval_secs: 0,
        }
    }
}

/// How the applicable tier is picked for a generation event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Highest-level tier the parcel qualifies for, ignoring category.
    Legacy,
    /// Highest-priority active tier compatible with the event.
    MultiActive,
    /// Legacy while the parcel has no active selection, multi-active after.
    #[default]
    Auto,
}

/// Resolution configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ResolutionConfig {
    /// Selected resolution mode.
    #[serde(default)]
    pub mode: ResolutionMode,
}

/// Progression rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgressionConfig {
    /// Active slots every parcel gets.
    #[serde(default = "default_active_slots")]
    pub default_active_slots: u32,

    /// Prefix of permission nodes that carry limits and bundle access.
    #[serde(default = "default_permission_prefix")]
    pub permission_prefix: String,

    /// Unlock free tiers automatically when the parcel level changes.
    #[serde(default = "default_true")]
    pub auto_unlock: bool,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            default_active_slots: default_active_slots(),
            permission_prefix: default_permission_prefix(),
            auto_unlock: true,
        }
    }
}

/// Generation-time gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct GenerationConfig {
    /// Generate while no parcel member is online.
    #[serde(default)]
    pub offline_generation: bool,

    /// Working range in blocks for parcels without their own (0 = unlimited).
    #[serde(default)]
    pub default_working_range: u32,
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// `PostgreSQL` connection string; the in-memory store is used when unset.
    #[serde(default)]
    pub postgres_url: Option<String>,

    /// Pool size for the `PostgreSQL` backend.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds between full flushes of every parcel record.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Attempts per save before it is logged and dropped.
    #[serde(default = "default_save_retry_attempts")]
    pub save_retry_attempts: u32,

    /// Base delay between save attempts, doubled per retry.
    #[serde(default = "default_save_retry_backoff_ms")]
    pub save_retry_backoff_ms: u64,
}

impl StorageConfig {
    /// Override the connection string with `DATABASE_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()) {
            self.postgres_url = Some(val);
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            max_connections: default_max_connections(),
            flush_interval_secs: default_flush_interval_secs(),
            save_retry_attempts: default_save_retry_attempts(),
            save_retry_backoff_ms: default_save_retry_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_catalog_path() -> PathBuf {
    PathBuf::from("generators.yaml")
}

const fn default_active_slots() -> u32 {
    1
}

fn default_permission_prefix() -> String {
    "islandgen".to_owned()
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_flush_interval_secs() -> u64 {
    300
}

const fn default_save_retry_attempts() -> u32 {
    3
}

const fn default_save_retry_backoff_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

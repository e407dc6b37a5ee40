//! Configuration loading and config file resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`PMIG_*`)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! Command-line and environment parsing live in the binary; this module owns
//! the TOML layer, the defaults and the override merge.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PMIG_CONFIG";

/// How rows inside one batch are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// All rows of a batch in flight at once
    Parallel,
    /// One row at a time, in order
    #[default]
    Sequential,
}

impl fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessMode::Parallel => write!(f, "parallel"),
            ProcessMode::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for ProcessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(ProcessMode::Parallel),
            "sequential" => Ok(ProcessMode::Sequential),
            other => Err(Error::Config(format!(
                "Unknown process mode '{}' (expected 'parallel' or 'sequential')",
                other
            ))),
        }
    }
}

/// Processing parameters consumed read-only by every pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub process_mode: ProcessMode,
    /// Skip existence checks before participation/email creation
    pub omit_get: bool,
    /// Rows per batch in the Batch Stage
    pub batch_size: usize,
    /// Processed rows between progress reports
    pub chunk_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            process_mode: ProcessMode::Sequential,
            omit_get: false,
            batch_size: 50,
            chunk_size: 500,
        }
    }
}

impl ProcessingConfig {
    /// Reject zero sizes
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Apply higher-priority overrides (CLI / ENV) on top of this config
    pub fn with_overrides(mut self, overrides: &ProcessingOverrides) -> Self {
        if let Some(mode) = overrides.process_mode {
            self.process_mode = mode;
        }
        if let Some(omit_get) = overrides.omit_get {
            self.omit_get = omit_get;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            self.chunk_size = chunk_size;
        }
        self
    }
}

/// Optional per-field overrides collected from the command line / environment
#[derive(Debug, Clone, Default)]
pub struct ProcessingOverrides {
    pub process_mode: Option<ProcessMode>,
    pub omit_get: Option<bool>,
    pub batch_size: Option<usize>,
    pub chunk_size: Option<usize>,
}

/// Remote content store connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the content store (without the `/api` suffix)
    pub base_url: String,
    /// Bearer token, empty means anonymous
    pub api_token: Option<String>,
    /// Client-side request ceiling
    pub requests_per_second: u32,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Maximum total time spent retrying a throttled request
    pub max_retry_wait_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1337".to_string(),
            api_token: None,
            requests_per_second: 20,
            timeout_secs: 30,
            max_retry_wait_ms: 10_000,
        }
    }
}

impl StoreConfig {
    /// Token with empty / whitespace values treated as absent
    pub fn token(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub store: StoreConfig,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
}

/// Resolve which config file to read
///
/// 1. Command-line path
/// 2. `PMIG_CONFIG` environment variable
/// 3. `<config_dir>/pmig/config.toml`, only if it exists
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

/// Platform config location (`~/.config/pmig/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pmig").join("config.toml"))
}

/// Load TOML configuration with graceful degradation
///
/// A missing file logs a warning and yields defaults. A file that exists but
/// cannot be parsed is an error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;

    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Write configuration as TOML (used to scaffold a config file)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_mode_parsing() {
        assert_eq!("parallel".parse::<ProcessMode>().unwrap(), ProcessMode::Parallel);
        assert_eq!(" Sequential ".parse::<ProcessMode>().unwrap(), ProcessMode::Sequential);
        assert!("bulk".parse::<ProcessMode>().is_err());
    }

    #[test]
    fn test_default_processing_config_is_valid() {
        let config = ProcessingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.process_mode, ProcessMode::Sequential);
        assert!(!config.omit_get);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = ProcessingConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ProcessingConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides_only_touch_given_fields() {
        let base = ProcessingConfig {
            batch_size: 10,
            ..Default::default()
        };
        let overrides = ProcessingOverrides {
            process_mode: Some(ProcessMode::Parallel),
            omit_get: Some(true),
            ..Default::default()
        };

        let merged = base.with_overrides(&overrides);
        assert_eq!(merged.process_mode, ProcessMode::Parallel);
        assert!(merged.omit_get);
        assert_eq!(merged.batch_size, 10);
        assert_eq!(merged.chunk_size, 500);
    }

    #[test]
    fn test_blank_token_is_absent() {
        let config = StoreConfig {
            api_token: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.token(), None);

        let config = StoreConfig {
            api_token: Some(" abc ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.token(), Some("abc"));
    }
}

//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::CostModel;
use crate::storage::MAX_BATCH_ROWS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cost_model: CostModel,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Correlation tracker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Rows read per dataset call during full bucket rescans (1..=64)
    #[serde(default = "default_scan_batch_rows")]
    pub scan_batch_rows: usize,
}

fn default_scan_batch_rows() -> usize {
    MAX_BATCH_ROWS
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            scan_batch_rows: default_scan_batch_rows(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("corrindex").join("config.toml")),
            Some(PathBuf::from("/etc/corrindex/config.toml")),
            Some(PathBuf::from("./corrindex.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `CORRINDEX_*` overrides; unparsable numbers are ignored
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Cost model overrides
        if let Some(v) = var("CORRINDEX_STORAGE_WEIGHT").and_then(|v| v.parse().ok()) {
            self.cost_model.storage_weight = v;
        }
        if let Some(v) = var("CORRINDEX_BETA").and_then(|v| v.parse().ok()) {
            self.cost_model.beta = v;
        }
        if let Some(v) = var("CORRINDEX_TOLERANCE").and_then(|v| v.parse().ok()) {
            self.cost_model.tolerance = v;
        }

        // Tracker overrides
        if let Some(v) = var("CORRINDEX_SCAN_BATCH_ROWS").and_then(|v| v.parse().ok()) {
            self.tracker.scan_batch_rows = v;
        }

        // Logging overrides
        if let Some(level) = var("CORRINDEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("CORRINDEX_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# corrindex configuration
#
# Environment variables override these settings:
# - CORRINDEX_STORAGE_WEIGHT
# - CORRINDEX_BETA
# - CORRINDEX_TOLERANCE
# - CORRINDEX_SCAN_BATCH_ROWS
# - CORRINDEX_LOG_LEVEL
# - CORRINDEX_LOG_FORMAT

[cost_model]
# Storage weight (alpha) of one row in the exact outlier index
storage_weight = 201.3

# Lookup overhead of one row in the exact outlier index
beta = 17.88

# Relative band around the break-even point inside which a map bucket keeps its class
tolerance = 0.0

[tracker]
# Rows read per dataset call when a target bucket is rescanned (1..=64)
scan_batch_rows = 64

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cost_model.storage_weight, 201.3);
        assert_eq!(config.cost_model.beta, 17.88);
        assert_eq!(config.cost_model.tolerance, 0.0);
        assert_eq!(config.tracker.scan_batch_rows, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_config_matches_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.cost_model, defaults.cost_model);
        assert_eq!(config.tracker.scan_batch_rows, defaults.tracker.scan_batch_rows);
        assert_eq!(config.logging.format, defaults.logging.format);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cost_model]\nbeta = 2.5\n\n[logging]\nformat = \"json\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cost_model.beta, 2.5);
        assert_eq!(config.cost_model.storage_weight, 201.3);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[cost_model]\nbeta = \"high\"\n").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CORRINDEX_STORAGE_WEIGHT", "5"),
            ("CORRINDEX_TOLERANCE", "0.25"),
            ("CORRINDEX_SCAN_BATCH_ROWS", "not-a-number"),
            ("CORRINDEX_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.cost_model.storage_weight, 5.0);
        assert_eq!(config.cost_model.beta, 17.88);
        assert_eq!(config.cost_model.tolerance, 0.25);
        assert_eq!(config.tracker.scan_batch_rows, 64);
        assert_eq!(config.logging.level, "debug");
    }
}

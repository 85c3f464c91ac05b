//! Configuration module for eksform
//!
//! Tool settings (not stack variables) are loaded and merged from:
//! - Default values
//! - System configuration (/etc/eksform/eksform.toml)
//! - User configuration (~/.eksform.toml)
//! - Project configuration (./eksform.toml)
//! - An explicit `--config` file
//! - Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::graph::Timeouts;
use crate::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// Provider operation timeouts
    pub timeouts: TimeoutsConfig,

    /// Retry policy for transient provider errors
    pub retry: RetryPolicy,

    /// Colors and output settings
    pub colors: ColorsConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Stack file to load when none is given
    pub stack_file: PathBuf,

    /// Where recorded state lives
    pub state_path: PathBuf,

    /// Maximum number of units reconciled concurrently
    pub parallelism: usize,

    /// Keep a copy of the previous state next to the state file
    pub state_backup: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            stack_file: PathBuf::from("stack.yml"),
            state_path: PathBuf::from("eksform.state.json"),
            parallelism: 4,
            state_backup: true,
        }
    }
}

/// Default create/update/delete bounds in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub create: u64,
    pub update: u64,
    pub delete: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let defaults = Timeouts::default();
        Self {
            create: defaults.create.as_secs(),
            update: defaults.update.as_secs(),
            delete: defaults.delete.as_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_secs(self.create),
            update: Duration::from_secs(self.update),
            delete: Duration::from_secs(self.delete),
        }
    }
}

/// Colors configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// Enable colored output
    pub enabled: bool,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when no `-v` flag or RUST_LOG is given
    pub log_level: String,

    /// `text` or `json`
    pub log_format: String,

    /// Log file path
    pub log_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_format: "text".to_string(),
            log_path: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest priority first
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/eksform/eksform.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".eksform.toml"));
        }

        paths.push(PathBuf::from("eksform.toml"));

        if let Ok(env_config) = std::env::var("EKSFORM_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        if let Some(path) = explicit_path {
            paths.push(path.clone());
        }

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one. Values in `other` that differ
    /// from the defaults win.
    fn merge(&self, other: Config) -> Config {
        let defaults = Config::default();

        Config {
            defaults: Defaults {
                stack_file: if other.defaults.stack_file != defaults.defaults.stack_file {
                    other.defaults.stack_file
                } else {
                    self.defaults.stack_file.clone()
                },
                state_path: if other.defaults.state_path != defaults.defaults.state_path {
                    other.defaults.state_path
                } else {
                    self.defaults.state_path.clone()
                },
                parallelism: if other.defaults.parallelism != defaults.defaults.parallelism {
                    other.defaults.parallelism
                } else {
                    self.defaults.parallelism
                },
                state_backup: other.defaults.state_backup && self.defaults.state_backup,
            },
            timeouts: TimeoutsConfig {
                create: if other.timeouts.create != defaults.timeouts.create {
                    other.timeouts.create
                } else {
                    self.timeouts.create
                },
                update: if other.timeouts.update != defaults.timeouts.update {
                    other.timeouts.update
                } else {
                    self.timeouts.update
                },
                delete: if other.timeouts.delete != defaults.timeouts.delete {
                    other.timeouts.delete
                } else {
                    self.timeouts.delete
                },
            },
            retry: if other.retry != defaults.retry {
                other.retry
            } else {
                self.retry.clone()
            },
            colors: ColorsConfig {
                enabled: other.colors.enabled && self.colors.enabled,
            },
            logging: LoggingConfig {
                log_level: if other.logging.log_level != defaults.logging.log_level {
                    other.logging.log_level
                } else {
                    self.logging.log_level.clone()
                },
                log_format: if other.logging.log_format != defaults.logging.log_format {
                    other.logging.log_format
                } else {
                    self.logging.log_format.clone()
                },
                log_path: other.logging.log_path.or_else(|| self.logging.log_path.clone()),
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // EKSFORM_STACK
        if let Ok(stack) = std::env::var("EKSFORM_STACK") {
            self.defaults.stack_file = PathBuf::from(stack);
        }

        // EKSFORM_STATE
        if let Ok(state) = std::env::var("EKSFORM_STATE") {
            self.defaults.state_path = PathBuf::from(state);
        }

        // EKSFORM_PARALLELISM
        if let Ok(parallelism) = std::env::var("EKSFORM_PARALLELISM") {
            if let Ok(n) = parallelism.parse::<usize>() {
                if n > 0 {
                    self.defaults.parallelism = n;
                }
            }
        }

        // EKSFORM_MAX_RETRIES
        if let Ok(retries) = std::env::var("EKSFORM_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.retry.max_retries = n;
            }
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() || std::env::var("EKSFORM_NO_COLOR").is_ok() {
            self.colors.enabled = false;
        }

        // EKSFORM_LOG_FORMAT
        if let Ok(format) = std::env::var("EKSFORM_LOG_FORMAT") {
            self.logging.log_format = format;
        }

        // EKSFORM_LOG_PATH
        if let Ok(path) = std::env::var("EKSFORM_LOG_PATH") {
            self.logging.log_path = Some(PathBuf::from(path));
        }
    }

    /// Load from a specific file only, without environment overrides
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Config::default().merge_from_file(&path.as_ref().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.parallelism, 4);
        assert_eq!(config.defaults.stack_file, PathBuf::from("stack.yml"));
        assert_eq!(config.timeouts.update, 3600);
        assert!(config.colors.enabled);
    }

    #[test]
    fn test_config_merge() {
        let base = Config::default();
        let other = Config {
            defaults: Defaults {
                parallelism: 10,
                ..Defaults::default()
            },
            ..Config::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.defaults.parallelism, 10);
        assert_eq!(merged.defaults.state_path, PathBuf::from("eksform.state.json"));
    }

    #[test]
    fn test_merge_keeps_earlier_non_default() {
        let base = Config {
            timeouts: TimeoutsConfig {
                create: 60,
                ..TimeoutsConfig::default()
            },
            ..Config::default()
        };
        let merged = base.merge(Config::default());
        assert_eq!(merged.timeouts.create, 60);
    }

    #[test]
    fn test_timeouts_conversion() {
        let timeouts = TimeoutsConfig {
            create: 10,
            update: 20,
            delete: 30,
        }
        .to_timeouts();
        assert_eq!(timeouts.update, Duration::from_secs(20));
    }
}

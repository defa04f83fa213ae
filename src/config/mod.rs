//! Configuration for clusterplug
//!
//! Loaded from `~/.clusterplug/config.json`, then overridden by environment
//! variables (a `.env` file in the working directory is honoured):
//!
//! | variable | field |
//! |---|---|
//! | `CLUSTERPLUG_STORE_DIR` | `store.dir` |
//! | `CLUSTERPLUG_PLUGIN_DIRS` | `plugins.plugin_dirs` (colon separated) |
//! | `CLUSTERPLUG_HOOK_TIMEOUT_SECS` | `plugins.hook_timeout_secs` |
//! | `CLUSTERPLUG_LOG_FORMAT` | `logging.format` (`text` or `json`) |
//!
//! A missing config file is not an error; every field has a default.
//! Invalid override values are skipped and reported back to the caller as
//! [`RejectedSetting`]s, since logging is usually not set up yet at load time.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::plugins::PluginConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub plugins: PluginConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Where the file-backed cluster store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory, one subdirectory per namespace.
    pub dir: String,
    /// Namespace used when the CLI is not given `--namespace`.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: "~/.clusterplug/clusters".to_string(),
            namespace: "default".to_string(),
        }
    }
}

impl StoreConfig {
    /// `dir` with `~/` expanded.
    pub fn dir_path(&self) -> PathBuf {
        expand_home(&self.dir)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(PluginError::Config(format!(
                "unknown log format '{}', expected 'text' or 'json'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

/// An environment override that was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSetting {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for RejectedSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}: {}", self.key, self.value, self.reason)
    }
}

impl Config {
    /// The clusterplug home directory, `~/.clusterplug`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clusterplug")
    }

    /// Path of the config file.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load the config file (if any) and apply environment overrides.
    ///
    /// Returns the overrides that were ignored so the caller can report them
    /// once logging is up.
    pub fn load() -> Result<(Self, Vec<RejectedSetting>)> {
        let _ = dotenvy::dotenv();
        let mut config = Self::load_from_path(&Self::path())?;
        let rejected = config.apply_overrides(|key| std::env::var(key).ok());
        Ok((config, rejected))
    }

    /// Load a config file without environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            PluginError::Config(format!("invalid config file {}: {}", path.display(), e))
        })?;
        config.validate().map_err(|e| {
            PluginError::Config(format!("invalid config file {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.plugins.connect_timeout_secs == 0 {
            return Err("plugins.connect_timeout_secs must be greater than zero".into());
        }
        if self.plugins.hook_timeout_secs == 0 {
            return Err("plugins.hook_timeout_secs must be greater than zero".into());
        }
        Ok(())
    }

    /// Apply `CLUSTERPLUG_*` overrides read through `lookup`.
    ///
    /// Unparseable values leave the field unchanged and are returned.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<RejectedSetting>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();

        if let Some(dir) = lookup("CLUSTERPLUG_STORE_DIR") {
            self.store.dir = dir;
        }

        if let Some(dirs) = lookup("CLUSTERPLUG_PLUGIN_DIRS") {
            self.plugins.plugin_dirs = dirs
                .split(':')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(secs) = lookup("CLUSTERPLUG_HOOK_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(n) if n > 0 => self.plugins.hook_timeout_secs = n,
                _ => rejected.push(RejectedSetting {
                    key: "CLUSTERPLUG_HOOK_TIMEOUT_SECS",
                    value: secs,
                    reason: "expected a positive number of seconds".into(),
                }),
            }
        }

        if let Some(raw) = lookup("CLUSTERPLUG_LOG_FORMAT") {
            match raw.parse() {
                Ok(format) => self.logging.format = format,
                Err(e) => rejected.push(RejectedSetting {
                    key: "CLUSTERPLUG_LOG_FORMAT",
                    value: raw,
                    reason: e.to_string(),
                }),
            }
        }

        rejected
    }

    /// Plugin search directories with `~/` expanded.
    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        self.plugins
            .plugin_dirs
            .iter()
            .map(|d| expand_home(d))
            .collect()
    }
}

/// Expand a leading `~/` (or a bare `~`) to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

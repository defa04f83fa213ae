//! Plugin types for clusterplug
//!
//! This module defines the descriptor a connected plugin reports about
//! itself, the manifest used to locate and launch process plugins, and the
//! plugin section of the configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable snapshot of one plugin's declared feature set, taken when the
/// plugin is attached.
///
/// Capability lists behave as ordered sets: [`PluginDescriptor::normalized`]
/// drops duplicates while keeping the order the plugin reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub operator_capabilities: Vec<String>,
    #[serde(default)]
    pub wal_capabilities: Vec<String>,
    #[serde(default)]
    pub backup_capabilities: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Builder-style setter for the general capability list.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Remove duplicate capabilities, first occurrence wins.
    pub fn normalized(mut self) -> Self {
        dedup_in_order(&mut self.capabilities);
        dedup_in_order(&mut self.operator_capabilities);
        dedup_in_order(&mut self.wal_capabilities);
        dedup_in_order(&mut self.backup_capabilities);
        self
    }
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    list.retain(|c| seen.insert(c.clone()));
}

/// The manifest loaded from a process plugin's `plugin.json` file.
///
/// # Example
///
/// ```json
/// {
///   "name": "barman-cloud",
///   "version": "0.3.0",
///   "description": "WAL archiving and backups to object storage",
///   "binary": "barman-cloud-plugin",
///   "env": { "LOG_LEVEL": "info" },
///   "timeout_secs": 10,
///   "sha256": "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name. Must match the name clusters use to reference it;
    /// alphanumeric characters, dots and hyphens, 1 to 64 characters.
    pub name: String,

    /// Version string reported in diagnostics.
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Relative path to the executable within the plugin directory.
    pub binary: String,

    /// Extra arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set when spawning the binary.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-request timeout override, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Optional hex-encoded SHA-256 of the binary, checked before spawning.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// A discovered process plugin: its manifest and the directory holding it.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub manifest: PluginManifest,
    pub path: PathBuf,
}

impl Plugin {
    pub fn new(manifest: PluginManifest, path: PathBuf) -> Self {
        Self { manifest, path }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Absolute path to the plugin executable.
    pub fn binary_path(&self) -> PathBuf {
        self.path.join(&self.manifest.binary)
    }
}

/// Plugin section of the main `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directories to scan for plugin subdirectories.
    /// Defaults to `["~/.clusterplug/plugins"]`.
    #[serde(default = "default_plugin_dirs")]
    pub plugin_dirs: Vec<String>,

    /// Allowlist of plugin names. If empty, all discovered plugins are allowed.
    #[serde(default)]
    pub allowed_plugins: Vec<String>,

    /// Blocklist of plugin names. Blocklist takes precedence over allowlist.
    #[serde(default)]
    pub blocked_plugins: Vec<String>,

    /// Upper bound for spawning a plugin and reading its metadata.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for a single hook call on a single plugin.
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: default_plugin_dirs(),
            allowed_plugins: Vec::new(),
            blocked_plugins: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
            hook_timeout_secs: default_hook_timeout(),
        }
    }
}

impl PluginConfig {
    /// A plugin is permitted if it is not blocked and the allowlist is
    /// either empty or names it.
    pub fn is_plugin_permitted(&self, name: &str) -> bool {
        if self.blocked_plugins.iter().any(|p| p == name) {
            return false;
        }
        if self.allowed_plugins.is_empty() {
            return true;
        }
        self.allowed_plugins.iter().any(|p| p == name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }
}

fn default_plugin_dirs() -> Vec<String> {
    vec!["~/.clusterplug/plugins".to_string()]
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_hook_timeout() -> u64 {
    30
}

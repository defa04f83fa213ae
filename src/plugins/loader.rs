//! Plugin discovery and loading for clusterplug
//!
//! This module handles discovering plugin directories, loading and parsing
//! `plugin.json` manifests, validating manifest contents, and checking a
//! plugin binary against the digest its manifest declares.

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{PluginError, Result};

use super::types::{Plugin, PluginManifest};

/// Discover plugins across multiple directories.
///
/// Scans each provided directory for subdirectories containing a `plugin.json`
/// file. Each valid plugin is loaded, validated, and returned. Invalid plugins
/// are logged as warnings but do not cause the overall discovery to fail.
///
/// Plugins are returned sorted by directory name within each directory, and
/// directories are scanned in the order given.
pub fn discover_plugins(dirs: &[PathBuf]) -> Result<Vec<Plugin>> {
    let mut plugins = Vec::new();

    for dir in dirs {
        if !dir.exists() {
            info!(dir = %dir.display(), "Plugin directory does not exist, skipping");
            continue;
        }

        if !dir.is_dir() {
            warn!(path = %dir.display(), "Plugin path is not a directory, skipping");
            continue;
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            PluginError::Config(format!(
                "Failed to read plugin directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                PluginError::Config(format!("Failed to read directory entry: {}", e))
            })?;
            let entry_path = entry.path();
            if entry_path.is_dir() && entry_path.join("plugin.json").exists() {
                candidates.push(entry_path);
            }
        }
        candidates.sort();

        for entry_path in candidates {
            match load_plugin(&entry_path) {
                Ok(plugin) => {
                    info!(
                        plugin = %plugin.name(),
                        version = %plugin.manifest.version,
                        "Discovered plugin"
                    );
                    plugins.push(plugin);
                }
                Err(e) => {
                    warn!(
                        dir = %entry_path.display(),
                        error = %e,
                        "Failed to load plugin, skipping"
                    );
                }
            }
        }
    }

    Ok(plugins)
}

/// Load a single plugin from its directory.
///
/// # Errors
/// - `PluginError::Config` if `plugin.json` does not exist or fails validation
/// - `PluginError::Json` if the JSON is malformed
/// - `PluginError::SecurityViolation` if the binary path escapes the directory
pub fn load_plugin(dir: &Path) -> Result<Plugin> {
    let manifest_path = dir.join("plugin.json");

    if !manifest_path.exists() {
        return Err(PluginError::Config(format!(
            "No plugin.json found in {}",
            dir.display()
        )));
    }

    let content = fs::read_to_string(&manifest_path).map_err(|e| {
        PluginError::Config(format!("Failed to read {}: {}", manifest_path.display(), e))
    })?;

    let manifest: PluginManifest = serde_json::from_str(&content)?;

    validate_manifest(&manifest)?;

    Ok(Plugin::new(manifest, dir.to_path_buf()))
}

/// Validate a plugin manifest for correctness and safety.
///
/// - Plugin name must be 1-64 characters: alphanumerics, dots and hyphens,
///   starting with an alphanumeric
/// - Version must be non-empty
/// - Binary must be a relative path without `..` components
/// - A declared `sha256` must be 64 hex characters
pub fn validate_manifest(manifest: &PluginManifest) -> Result<()> {
    let name_re = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9.\-]{0,63}$")
        .map_err(|e| PluginError::Config(e.to_string()))?;
    if !name_re.is_match(&manifest.name) {
        return Err(PluginError::Config(format!(
            "Invalid plugin name '{}': must be 1-64 alphanumeric characters, dots and hyphens, starting with alphanumeric",
            manifest.name
        )));
    }

    if manifest.version.trim().is_empty() {
        return Err(PluginError::Config(format!(
            "Plugin '{}' has an empty version string",
            manifest.name
        )));
    }

    let binary = Path::new(&manifest.binary);
    if manifest.binary.trim().is_empty() {
        return Err(PluginError::Config(format!(
            "Plugin '{}' does not declare a binary",
            manifest.name
        )));
    }
    // Path::starts_with() is component-based and does NOT resolve traversals,
    // so reject absolute paths and ".." outright.
    if binary.is_absolute() || binary.components().any(|c| c == Component::ParentDir) {
        return Err(PluginError::SecurityViolation(format!(
            "Plugin '{}' binary path escapes the plugin directory",
            manifest.name
        )));
    }

    if let Some(digest) = &manifest.sha256 {
        let digest = digest.trim();
        if digest.len() != 64 || hex::decode(digest).is_err() {
            return Err(PluginError::Config(format!(
                "Plugin '{}' has an invalid sha256 digest",
                manifest.name
            )));
        }
    }

    Ok(())
}

/// Check the plugin binary against the manifest's `sha256`, if declared.
pub async fn verify_binary_digest(plugin: &Plugin) -> Result<()> {
    let Some(expected) = plugin.manifest.sha256.as_deref() else {
        return Ok(());
    };

    let bytes = tokio::fs::read(plugin.binary_path()).await?;
    let actual = hex::encode(Sha256::digest(&bytes));

    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(PluginError::SecurityViolation(format!(
            "Plugin '{}' binary digest mismatch: expected {}, found {}",
            plugin.name(),
            expected.trim(),
            actual
        )));
    }

    Ok(())
}

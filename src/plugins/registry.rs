//! Plugin registry for clusterplug
//!
//! Maps plugin names, as clusters reference them, to the discovered process
//! plugins that implement them. A name may only be provided by one plugin
//! directory; the first directory scanned wins.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{PluginError, Result};

use super::types::Plugin;

/// A registry of installed process plugins, keyed by name.
///
/// # Example
///
/// ```rust
/// use clusterplug::plugins::{Plugin, PluginManifest, PluginRegistry};
/// use std::path::PathBuf;
///
/// let manifest: PluginManifest = serde_json::from_str(
///     r#"{ "name": "backup", "version": "1.0.0", "binary": "backup-plugin" }"#,
/// )
/// .unwrap();
///
/// let mut registry = PluginRegistry::new();
/// registry.register(Plugin::new(manifest, PathBuf::from("/opt/plugins/backup"))).unwrap();
///
/// assert_eq!(registry.plugin_count(), 1);
/// assert!(registry.get_plugin("backup").is_some());
/// ```
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Plugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from discovered plugins. Name conflicts are logged
    /// and the later plugin is skipped.
    pub fn from_plugins(plugins: impl IntoIterator<Item = Plugin>) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            if let Err(e) = registry.register(plugin) {
                warn!(error = %e, "Skipping conflicting plugin");
            }
        }
        registry
    }

    /// Register a plugin in the registry.
    ///
    /// Re-registering the same name from the same directory replaces the
    /// entry. The same name from a different directory is a conflict and
    /// leaves the registry unchanged.
    pub fn register(&mut self, plugin: Plugin) -> Result<()> {
        let name = plugin.name().to_string();

        if let Some(existing) = self.plugins.get(&name) {
            if existing.path != plugin.path {
                return Err(PluginError::Config(format!(
                    "Plugin '{}' at {} conflicts with the plugin already loaded from {}",
                    name,
                    plugin.path.display(),
                    existing.path.display()
                )));
            }
        }

        info!(
            plugin = %name,
            version = %plugin.manifest.version,
            "Registered plugin"
        );

        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get_plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// All registered plugins, sorted by name.
    pub fn list_plugins(&self) -> Vec<&Plugin> {
        self.plugins.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::types::PluginManifest;
    use std::path::PathBuf;

    fn make_plugin(name: &str, dir: &str) -> Plugin {
        let manifest: PluginManifest = serde_json::from_value(serde_json::json!({
            "name": name,
            "version": "1.0.0",
            "binary": "plugin"
        }))
        .unwrap();
        Plugin::new(manifest, PathBuf::from(dir))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("backup", "/a/backup")).unwrap();
        registry.register(make_plugin("metrics", "/a/metrics")).unwrap();

        assert_eq!(registry.plugin_count(), 2);
        assert_eq!(
            registry.get_plugin("backup").unwrap().path,
            PathBuf::from("/a/backup")
        );
        assert!(registry.get_plugin("missing").is_none());
    }

    #[test]
    fn test_conflict_from_other_directory() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("backup", "/a/backup")).unwrap();
        let err = registry
            .register(make_plugin("backup", "/b/backup"))
            .unwrap_err();
        assert!(err.to_string().contains("conflicts"));
        assert_eq!(
            registry.get_plugin("backup").unwrap().path,
            PathBuf::from("/a/backup")
        );
    }

    #[test]
    fn test_reregister_same_directory_replaces() {
        let mut registry = PluginRegistry::new();
        registry.register(make_plugin("backup", "/a/backup")).unwrap();
        let mut updated = make_plugin("backup", "/a/backup");
        updated.manifest.version = "2.0.0".to_string();
        registry.register(updated).unwrap();

        assert_eq!(registry.plugin_count(), 1);
        assert_eq!(registry.get_plugin("backup").unwrap().manifest.version, "2.0.0");
    }

    #[test]
    fn test_from_plugins_first_wins() {
        let registry = PluginRegistry::from_plugins(vec![
            make_plugin("backup", "/a/backup"),
            make_plugin("backup", "/b/backup"),
            make_plugin("audit", "/b/audit"),
        ]);
        let names: Vec<&str> = registry.list_plugins().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["audit", "backup"]);
        assert_eq!(
            registry.get_plugin("backup").unwrap().path,
            PathBuf::from("/a/backup")
        );
    }
}

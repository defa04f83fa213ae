//! `clusterplug plugins` command.

use anyhow::{Context, Result};

use clusterplug::config::Config;
use clusterplug::plugins::{discover_plugins, Plugin, PluginConfig, PluginRegistry};

pub(crate) fn cmd_plugins(config: &Config) -> Result<()> {
    let dirs = config.plugin_dirs();
    let plugins = discover_plugins(&dirs).with_context(|| "Failed to discover plugins")?;
    let registry = PluginRegistry::from_plugins(plugins);

    if registry.plugin_count() == 0 {
        println!("No plugins installed.");
        println!();
        println!("Search path:");
        for dir in &dirs {
            println!("  {}", dir.display());
        }
        return Ok(());
    }

    print!("{}", render_table(&registry.list_plugins(), &config.plugins));
    Ok(())
}

fn render_table(plugins: &[&Plugin], policy: &PluginConfig) -> String {
    let mut out = format!("{:<24} {:<10} {:<8} {}\n", "NAME", "VERSION", "STATE", "DESCRIPTION");
    for plugin in plugins {
        let state = if policy.is_plugin_permitted(plugin.name()) {
            "allowed"
        } else {
            "blocked"
        };
        out.push_str(&format!(
            "{:<24} {:<10} {:<8} {}\n",
            plugin.name(),
            plugin.manifest.version,
            state,
            plugin.manifest.description
        ));
    }
    out
}

//! `clusterplug status` command.
//!
//! The whole report is rendered into memory before anything is written to
//! stdout, so a failure never leaves partial output behind.

use anyhow::{Context, Result};
use serde::Serialize;

use clusterplug::cluster::{Cluster, ClusterKey, PluginReference, PluginStatus};
use clusterplug::config::Config;
use clusterplug::store::ClusterStore;

use super::open_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    name: String,
    namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_version: Option<String>,
    plugins: Vec<PluginStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    references: Vec<PluginReference>,
    checked_at: String,
}

impl StatusReport {
    fn new(cluster: Cluster, verbose: bool) -> Self {
        let mut plugins = cluster.status.plugin_status;
        if !verbose {
            for plugin in plugins.iter_mut() {
                *plugin = PluginStatus {
                    name: std::mem::take(&mut plugin.name),
                    version: std::mem::take(&mut plugin.version),
                    ..Default::default()
                };
            }
        }

        Self {
            name: cluster.metadata.name,
            namespace: cluster.metadata.namespace,
            phase: cluster.status.phase,
            resource_version: cluster.metadata.resource_version,
            plugins,
            references: if verbose { cluster.spec.plugins } else { Vec::new() },
            checked_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub(crate) async fn cmd_status(
    config: &Config,
    namespace: &str,
    name: &str,
    verbose: bool,
    output: OutputFormat,
) -> Result<()> {
    let key = ClusterKey::new(namespace, name);
    let store = open_store(config);
    let cluster = store
        .get(&key)
        .await
        .with_context(|| format!("Failed to get cluster {}", key))?;

    let report = StatusReport::new(cluster, verbose);
    let rendered = render(&report, verbose, output)?;
    print!("{}", rendered);
    Ok(())
}

fn render(report: &StatusReport, verbose: bool, output: OutputFormat) -> Result<String> {
    match output {
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(report)
                .with_context(|| "Failed to encode status report")?;
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Text => Ok(render_text(report, verbose)),
    }
}

fn render_text(report: &StatusReport, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("Cluster:    {}/{}\n", report.namespace, report.name));
    out.push_str(&format!(
        "Phase:      {}\n",
        report.phase.as_deref().unwrap_or("-")
    ));
    if verbose {
        out.push_str(&format!(
            "Version:    {}\n",
            report.resource_version.as_deref().unwrap_or("-")
        ));
    }
    out.push('\n');

    if report.plugins.is_empty() {
        out.push_str("Plugins:    none\n");
    } else {
        out.push_str(&format!("Plugins:    {}\n", report.plugins.len()));
        for plugin in &report.plugins {
            out.push_str(&format!("  {:<24} {}\n", plugin.name, plugin.version));
            if verbose {
                push_capabilities(&mut out, "capabilities", &plugin.capabilities);
                push_capabilities(&mut out, "operator", &plugin.operator_capabilities);
                push_capabilities(&mut out, "wal", &plugin.wal_capabilities);
                push_capabilities(&mut out, "backup", &plugin.backup_capabilities);
            }
        }
    }

    if verbose && !report.references.is_empty() {
        out.push_str("\nReferenced plugins:\n");
        for reference in &report.references {
            let state = if reference.is_enabled() { "enabled" } else { "disabled" };
            out.push_str(&format!("  {:<24} {}\n", reference.name, state));
            for (key, value) in &reference.parameters {
                out.push_str(&format!("      {} = {}\n", key, value));
            }
        }
    }

    out.push_str(&format!("\nChecked at: {}\n", report.checked_at));
    out
}

fn push_capabilities(out: &mut String, label: &str, caps: &[String]) {
    if !caps.is_empty() {
        out.push_str(&format!("      {}: {}\n", label, caps.join(", ")));
    }
}

//! `clusterplug reconcile` command.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use clusterplug::cluster::ClusterKey;
use clusterplug::config::Config;
use clusterplug::context::ReconcileContext;
use clusterplug::controller::{ClusterReconciler, NoopReconciler};
use clusterplug::hooks::RequeueDecision;
use clusterplug::plugins::{discover_plugins, PluginRegistry, ProcessConnector};

use super::open_store;

/// Run one cycle against the installed process plugins. Ctrl+C cancels the
/// cycle; attached plugins are still released.
pub(crate) async fn cmd_reconcile(config: &Config, namespace: &str, name: &str) -> Result<()> {
    let discovered =
        discover_plugins(&config.plugin_dirs()).with_context(|| "Failed to discover plugins")?;
    let registry = PluginRegistry::from_plugins(discovered);
    info!(plugins = registry.plugin_count(), "Plugin registry loaded");

    let connector = ProcessConnector::new(Arc::new(registry), config.plugins.clone());
    let reconciler = ClusterReconciler::new(Arc::new(connector), Arc::new(open_store(config)));

    let ctx = ReconcileContext::new();
    let cancel = ctx.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let key = ClusterKey::new(namespace, name);
    let outcome = reconciler
        .reconcile(&ctx, &key, &NoopReconciler)
        .await
        .with_context(|| format!("Reconcile of cluster {} failed", key));
    interrupt.abort();

    println!("{}", describe(&key, &outcome?));
    Ok(())
}

fn describe(key: &ClusterKey, decision: &RequeueDecision) -> String {
    if !decision.requeue {
        format!("Reconciled {}: no requeue requested", key)
    } else if decision.requeue_after.is_zero() {
        format!("Reconciled {}: requeue requested", key)
    } else {
        format!(
            "Reconciled {}: requeue after {}s",
            key,
            decision.requeue_after.as_secs()
        )
    }
}

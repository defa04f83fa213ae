//! Plugin status aggregation.
//!
//! Projects the attached plugins' metadata into `status.pluginStatus` and
//! commits the change as a merge patch computed against a snapshot taken
//! right before the mutation, never against the live object.

use serde_json::Value;
use tracing::debug;

use crate::cluster::{create_merge_patch, is_empty_patch, Cluster, PluginStatus};
use crate::context::ReconcileContext;
use crate::error::Result;
use crate::plugins::PluginClient;
use crate::store::ClusterStore;

/// The plugin status list matching the attached plugins, in attachment order.
pub fn desired_plugin_status(client: &PluginClient) -> Vec<PluginStatus> {
    client
        .metadata_list()
        .into_iter()
        .map(PluginStatus::from)
        .collect()
}

/// Rebuild `cluster.status.plugin_status` from `client` and persist it.
///
/// Returns the merge patch that was computed. An empty patch is not sent to
/// the store. On success `cluster` is replaced by the object the store
/// returned; on failure it is left untouched.
pub async fn refresh_plugin_status(
    ctx: &ReconcileContext,
    store: &dyn ClusterStore,
    client: &PluginClient,
    cluster: &mut Cluster,
) -> Result<Value> {
    let pre_image = serde_json::to_value(&*cluster)?;

    let mut desired = cluster.clone();
    desired.status.plugin_status = desired_plugin_status(client);
    let patch = create_merge_patch(&pre_image, &serde_json::to_value(&desired)?);

    if is_empty_patch(&patch) {
        debug!(cluster = %cluster.key(), "Plugin status unchanged, skipping patch");
        return Ok(patch);
    }

    let key = cluster.key();
    let updated = ctx.run(store.patch_status(&key, &patch)).await?;
    debug!(
        cluster = %key,
        plugins = updated.status.plugin_status.len(),
        "Plugin status patched"
    );
    *cluster = updated;
    Ok(patch)
}

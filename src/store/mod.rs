//! Cluster object store boundary.
//!
//! The reconcile core only needs to read clusters and to send status merge
//! patches. [`ClusterStore`] is that boundary. Two implementations ship with
//! the crate:
//!
//! - [`MemoryStore`]: in-process map, used by tests and embedders
//! - [`FileStore`]: one JSON document per cluster under a directory, used by
//!   the `clusterplug` binary

mod file;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::cluster::{apply_merge_patch, Cluster, ClusterKey};
use crate::error::{PluginError, Result};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Read and status-patch access to stored cluster objects.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch one cluster. Missing clusters are `PluginError::NotFound`.
    async fn get(&self, key: &ClusterKey) -> Result<Cluster>;

    /// All clusters in `namespace`, sorted by name.
    async fn list(&self, namespace: &str) -> Result<Vec<Cluster>>;

    /// Apply a merge patch to the status of the stored cluster and return
    /// the updated object.
    ///
    /// Only the `status` member of the patch is applied. If the patch carries
    /// `metadata.resourceVersion`, it must match the stored version or the
    /// call fails with `PluginError::PatchConflict`.
    async fn patch_status(&self, key: &ClusterKey, patch: &Value) -> Result<Cluster>;
}

/// Shared status-subresource patch semantics for the bundled stores.
pub(crate) fn apply_status_patch(stored: &Cluster, patch: &Value) -> Result<Cluster> {
    if !patch.is_object() {
        return Err(PluginError::Store("status patch must be a JSON object".into()));
    }

    if let Some(expected) = patch
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
    {
        let current = stored.metadata.resource_version.as_deref().unwrap_or("");
        if expected != current {
            return Err(PluginError::PatchConflict(format!(
                "cluster {} is at resourceVersion '{}', patch expects '{}'",
                stored.key(),
                current,
                expected
            )));
        }
    }

    let mut doc = serde_json::to_value(stored)?;
    if let Some(status_patch) = patch.get("status") {
        let status = doc
            .as_object_mut()
            .map(|obj| obj.entry("status").or_insert(Value::Null))
            .ok_or_else(|| PluginError::Store("stored cluster is not an object".into()))?;
        apply_merge_patch(status, status_patch);
    }

    let mut updated: Cluster = serde_json::from_value(doc)?;
    updated.metadata.resource_version = Some(next_resource_version(
        stored.metadata.resource_version.as_deref(),
    ));
    Ok(updated)
}

/// Resource versions are opaque to clients; the bundled stores use a counter.
pub(crate) fn next_resource_version(current: Option<&str>) -> String {
    let n = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (n + 1).to_string()
}

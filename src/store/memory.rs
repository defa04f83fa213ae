//! In-memory cluster store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::cluster::{Cluster, ClusterKey};
use crate::error::{PluginError, Result};

use super::{apply_status_patch, next_resource_version, ClusterStore};

/// A [`ClusterStore`] backed by a map. Patches are applied under a write
/// lock, so concurrent writers are serialized the way an API server would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clusters: RwLock<BTreeMap<ClusterKey, Cluster>>,
    patches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a cluster, bumping its resource version.
    pub async fn put(&self, mut cluster: Cluster) -> Cluster {
        let key = cluster.key();
        let mut clusters = self.clusters.write().await;
        let current = clusters
            .get(&key)
            .and_then(|c| c.metadata.resource_version.clone());
        cluster.metadata.resource_version = Some(next_resource_version(current.as_deref()));
        clusters.insert(key, cluster.clone());
        cluster
    }

    /// Number of status patches that reached the store.
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get(&self, key: &ClusterKey) -> Result<Cluster> {
        self.clusters
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(format!("cluster {}", key)))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Cluster>> {
        Ok(self
            .clusters
            .read()
            .await
            .values()
            .filter(|c| c.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn patch_status(&self, key: &ClusterKey, patch: &Value) -> Result<Cluster> {
        let mut clusters = self.clusters.write().await;
        let stored = clusters
            .get(key)
            .ok_or_else(|| PluginError::NotFound(format!("cluster {}", key)))?;

        let updated = apply_status_patch(stored, patch)?;
        clusters.insert(key.clone(), updated.clone());
        self.patches.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PluginReference;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_list() {
        let store = MemoryStore::new();
        store
            .put(Cluster::new(&ClusterKey::new("db", "b"), vec![]))
            .await;
        store
            .put(Cluster::new(&ClusterKey::new("db", "a"), vec![PluginReference::new("x")]))
            .await;
        store
            .put(Cluster::new(&ClusterKey::new("other", "c"), vec![]))
            .await;

        let a = store.get(&ClusterKey::new("db", "a")).await.unwrap();
        assert_eq!(a.spec.plugins.len(), 1);
        assert_eq!(a.metadata.resource_version.as_deref(), Some("1"));

        let names: Vec<String> = store
            .list("db")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.metadata.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&ClusterKey::new("db", "nope")).await.unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_patch_status_counts_and_bumps_version() {
        let store = MemoryStore::new();
        let key = ClusterKey::new("db", "a");
        store.put(Cluster::new(&key, vec![])).await;

        let updated = store
            .patch_status(&key, &json!({ "status": { "phase": "Healthy" } }))
            .await
            .unwrap();
        assert_eq!(updated.status.phase.as_deref(), Some("Healthy"));
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
        assert_eq!(store.patch_count(), 1);
    }
}

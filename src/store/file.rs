//! File-backed cluster store.
//!
//! Layout: `<root>/<namespace>/<name>.json`, one cluster object per file.
//! Writes go to a temporary sibling first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cluster::{Cluster, ClusterKey};
use crate::error::{PluginError, Result};

use super::{apply_status_patch, next_resource_version, ClusterStore};

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ClusterKey) -> Result<PathBuf> {
        check_segment(&key.namespace)?;
        check_segment(&key.name)?;
        Ok(self
            .root
            .join(&key.namespace)
            .join(format!("{}.json", key.name)))
    }

    /// Create or replace a cluster, bumping its resource version.
    pub async fn put(&self, mut cluster: Cluster) -> Result<Cluster> {
        let key = cluster.key();
        let path = self.path_for(&key)?;
        let _guard = self.write_lock.lock().await;

        let current = match read_cluster(&path).await {
            Ok(existing) => existing.metadata.resource_version,
            Err(PluginError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        cluster.metadata.resource_version = Some(next_resource_version(current.as_deref()));
        write_cluster(&path, &cluster).await?;
        Ok(cluster)
    }
}

/// Namespaces and names become path components and must stay inside the root.
fn check_segment(part: &str) -> Result<()> {
    if part.is_empty() || part.contains(|c: char| c == '/' || c == '\\') || part.starts_with('.') {
        return Err(PluginError::SecurityViolation(format!(
            "invalid cluster identifier '{}'",
            part
        )));
    }
    Ok(())
}

async fn read_cluster(path: &Path) -> Result<Cluster> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PluginError::NotFound(format!("cluster file {}", path.display())));
        }
        Err(e) => return Err(PluginError::Store(format!("failed to read {}: {}", path.display(), e))),
    };
    Ok(serde_json::from_str(&content)?)
}

async fn write_cluster(path: &Path, cluster: &Cluster) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| PluginError::Store(format!("no parent directory for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(cluster)?;
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Cluster written");
    Ok(())
}

#[async_trait]
impl ClusterStore for FileStore {
    async fn get(&self, key: &ClusterKey) -> Result<Cluster> {
        let path = self.path_for(key)?;
        read_cluster(&path)
            .await
            .map_err(|e| match e {
                PluginError::NotFound(_) => PluginError::NotFound(format!("cluster {}", key)),
                other => other,
            })
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Cluster>> {
        check_segment(namespace)?;
        let dir = self.root.join(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut clusters = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_cluster(&path).await {
                Ok(cluster) => clusters.push(cluster),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cluster file"),
            }
        }
        clusters.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(clusters)
    }

    async fn patch_status(&self, key: &ClusterKey, patch: &Value) -> Result<Cluster> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        let stored = read_cluster(&path).await.map_err(|e| match e {
            PluginError::NotFound(_) => PluginError::NotFound(format!("cluster {}", key)),
            other => other,
        })?;
        let updated = apply_status_patch(&stored, patch)?;
        write_cluster(&path, &updated).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PluginReference;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let key = ClusterKey::new("db", "pg-main");

        let written = store
            .put(Cluster::new(&key, vec![PluginReference::new("backup")]))
            .await
            .unwrap();
        assert_eq!(written.metadata.resource_version.as_deref(), Some("1"));
        assert!(tmp.path().join("db").join("pg-main.json").exists());

        let read = store.get(&key).await.unwrap();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn test_list_sorted_and_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        store.put(Cluster::new(&ClusterKey::new("db", "zeta"), vec![])).await.unwrap();
        store.put(Cluster::new(&ClusterKey::new("db", "alpha"), vec![])).await.unwrap();
        std::fs::write(tmp.path().join("db").join("broken.json"), "{").unwrap();
        std::fs::write(tmp.path().join("db").join("notes.txt"), "hi").unwrap();

        let names: Vec<String> = store
            .list("db")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.metadata.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(store.list("empty-namespace").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patch_status_persists() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let key = ClusterKey::new("db", "pg");
        store.put(Cluster::new(&key, vec![])).await.unwrap();

        store
            .patch_status(&key, &json!({ "status": { "pluginStatus": [ { "name": "a", "version": "1" } ] } }))
            .await
            .unwrap();

        let reread = FileStore::new(tmp.path()).get(&key).await.unwrap();
        assert_eq!(reread.plugin_status_names(), vec!["a"]);
        assert_eq!(reread.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_missing_cluster_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let err = store.get(&ClusterKey::new("db", "ghost")).await.unwrap_err();
        assert_eq!(err.to_string(), "Not found: cluster db/ghost");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let err = store.get(&ClusterKey::new("..", "etc")).await.unwrap_err();
        assert!(matches!(err, PluginError::SecurityViolation(_)));
    }
}

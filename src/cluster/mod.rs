//! Managed cluster model.
//!
//! Only the parts of the cluster object the plugin layer reads or writes are
//! modelled: identity, the plugin references in the spec, and the plugin
//! status list. Any other field present in a stored object is kept in
//! `extra` maps so a round trip through this crate never drops it.

pub mod patch;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugins::PluginDescriptor;

pub use patch::{apply_merge_patch, create_merge_patch, is_empty_patch};

/// Identity of a cluster in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Opaque version assigned by the store on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// A plugin the cluster asks to be reconciled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginReference {
    pub name: String,
    /// Disabled references are kept in the spec but never attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Free-form parameters forwarded to the plugin on every hook call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl PluginReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginReference>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Persisted projection of a [`PluginDescriptor`] inside the cluster status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wal_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_capabilities: Vec<String>,
}

impl From<&PluginDescriptor> for PluginStatus {
    fn from(d: &PluginDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            version: d.version.clone(),
            capabilities: d.capabilities.clone(),
            operator_capabilities: d.operator_capabilities.clone(),
            wal_capabilities: d.wal_capabilities.clone(),
            backup_capabilities: d.backup_capabilities.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_status: Vec<PluginStatus>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A managed cluster object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Cluster {
    /// A cluster with the given identity and plugin references.
    pub fn new(key: &ClusterKey, plugins: Vec<PluginReference>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                ..Default::default()
            },
            spec: ClusterSpec {
                plugins,
                ..Default::default()
            },
            status: ClusterStatus::default(),
        }
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Plugin references that should be attached, in spec order.
    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginReference> {
        self.spec.plugins.iter().filter(|p| p.is_enabled())
    }

    /// Names of the plugins recorded in the status, in status order.
    pub fn plugin_status_names(&self) -> Vec<&str> {
        self.status
            .plugin_status
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }
}

//! Plugin system for clusterplug
//!
//! Plugins are out-of-process (or embedded) extensions that declare
//! capabilities and take part in every reconcile cycle of the clusters that
//! reference them.
//!
//! # Architecture
//!
//! - **types**: `PluginDescriptor`, `PluginManifest`, `Plugin`, `PluginConfig`
//! - **loader**: discovery of installed process plugins and manifest validation
//! - **registry**: name → installed plugin lookup
//! - **connector**: the `PluginConnector` / `PluginConnection` boundary and
//!   the all-or-nothing `load_plugin_client`
//! - **client**: `PluginClient`, the per-cycle multiplexer
//! - **process**: JSON-RPC 2.0 over stdio connector for installed plugins
//! - **inprocess**: connector for plugins embedded as Rust objects
//!
//! # Plugin Directory Structure
//!
//! ```text
//! ~/.clusterplug/plugins/
//! ├── barman-cloud/
//! │   ├── plugin.json
//! │   └── barman-cloud-plugin
//! └── audit-log/
//!     ├── plugin.json
//!     └── bin/
//!         └── audit
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use clusterplug::cluster::{Cluster, ClusterKey, PluginReference};
//! use clusterplug::context::ReconcileContext;
//! use clusterplug::plugins::{discover_plugins, load_plugin_client, PluginConfig, PluginRegistry, ProcessConnector};
//!
//! # async fn run() -> clusterplug::error::Result<()> {
//! let dirs = vec![PathBuf::from("/home/user/.clusterplug/plugins")];
//! let registry = PluginRegistry::from_plugins(discover_plugins(&dirs)?);
//! let connector = ProcessConnector::new(Arc::new(registry), PluginConfig::default());
//!
//! let cluster = Cluster::new(
//!     &ClusterKey::new("default", "pg-main"),
//!     vec![PluginReference::new("barman-cloud")],
//! );
//! let ctx = ReconcileContext::new();
//! let mut client = load_plugin_client(&ctx, &connector, &cluster).await?;
//! let result = client.pre_reconcile(&ctx, &cluster).await;
//! client.close().await;
//! println!("{:?}", result.into_decision());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connector;
pub mod inprocess;
mod loader;
pub mod process;
pub mod registry;
pub mod types;

pub use client::PluginClient;
pub use connector::{load_plugin_client, PluginConnection, PluginConnector, DEFAULT_HOOK_TIMEOUT};
pub use inprocess::{InProcessConnector, ReconcilerHooks};
pub use loader::{discover_plugins, load_plugin, validate_manifest, verify_binary_digest};
pub use process::ProcessConnector;
pub use registry::PluginRegistry;
pub use types::{Plugin, PluginConfig, PluginDescriptor, PluginManifest};

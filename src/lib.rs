//! clusterplug - plugin attach, status aggregation and reconcile hook
//! dispatch for a stateful-cluster controller
//!
//! A cluster references zero or more plugins. For every reconcile cycle the
//! controller attaches all of them (or none), records their metadata in the
//! cluster status with a conflict-safe merge patch, runs their pre- and
//! post-reconcile hooks in attachment order, merges the answers into a single
//! requeue decision, and releases the plugins on every exit path.

pub mod cluster;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod plugins;
pub mod store;

pub use cluster::{Cluster, ClusterKey, PluginReference, PluginStatus};
pub use config::Config;
pub use context::ReconcileContext;
pub use controller::{ClusterReconciler, DomainReconciler, NoopReconciler};
pub use error::{PluginError, Result};
pub use hooks::{HookPhase, HookResponse, HookResult, RequeueDecision};

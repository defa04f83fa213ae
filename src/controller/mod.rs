//! Controller-facing plugin operations.
//!
//! [`ClusterReconciler`] is what a cluster controller calls during each
//! reconcile cycle. Every operation attaches the cluster's plugins through
//! the configured [`PluginConnector`], does its work, and releases them
//! before returning.

mod scope;
pub mod status;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::cluster::{Cluster, ClusterKey};
use crate::context::ReconcileContext;
use crate::error::Result;
use crate::hooks::{HookPhase, RequeueDecision};
use crate::plugins::{load_plugin_client, PluginClient, PluginConnector};
use crate::store::ClusterStore;

pub use scope::CycleState;
pub use status::{desired_plugin_status, refresh_plugin_status};

use scope::{attempt, enter, release};

/// The controller's own reconciliation logic, run between the pre and post
/// plugin hooks.
#[async_trait]
pub trait DomainReconciler: Send + Sync {
    async fn reconcile(&self, ctx: &ReconcileContext, cluster: &Cluster) -> Result<RequeueDecision>;
}

/// A domain reconciler that does nothing and never asks for a requeue.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReconciler;

#[async_trait]
impl DomainReconciler for NoopReconciler {
    async fn reconcile(&self, _ctx: &ReconcileContext, _cluster: &Cluster) -> Result<RequeueDecision> {
        Ok(RequeueDecision::default())
    }
}

/// Plugin operations bound to one connector and one cluster store.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use clusterplug::cluster::{Cluster, ClusterKey};
/// use clusterplug::context::ReconcileContext;
/// use clusterplug::controller::{ClusterReconciler, NoopReconciler};
/// use clusterplug::plugins::InProcessConnector;
/// use clusterplug::store::MemoryStore;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// let key = ClusterKey::new("default", "pg-main");
/// store.put(Cluster::new(&key, vec![])).await;
///
/// let reconciler = ClusterReconciler::new(Arc::new(InProcessConnector::new()), store);
/// let decision = reconciler
///     .reconcile(&ReconcileContext::new(), &key, &NoopReconciler)
///     .await
///     .unwrap();
/// assert!(decision.is_empty());
/// # })
/// ```
#[derive(Clone)]
pub struct ClusterReconciler {
    connector: Arc<dyn PluginConnector>,
    store: Arc<dyn ClusterStore>,
}

impl ClusterReconciler {
    pub fn new(connector: Arc<dyn PluginConnector>, store: Arc<dyn ClusterStore>) -> Self {
        Self { connector, store }
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    async fn attach(
        &self,
        ctx: &ReconcileContext,
        cluster: &Cluster,
        operation: &'static str,
    ) -> Result<PluginClient> {
        let key = cluster.key();
        enter(&key, operation, CycleState::Attaching);
        match load_plugin_client(ctx, &*self.connector, cluster).await {
            Ok(client) => {
                enter(&key, operation, CycleState::Attached);
                Ok(client)
            }
            Err(e) => {
                enter(&key, operation, CycleState::AttachFailed);
                Err(e)
            }
        }
    }

    /// Attach the cluster's plugins and record their metadata in
    /// `status.pluginStatus`.
    ///
    /// Returns the merge patch that was computed. An attach failure leaves
    /// both the stored and the in-memory cluster untouched.
    pub async fn update_plugins_status(
        &self,
        ctx: &ReconcileContext,
        cluster: &mut Cluster,
    ) -> Result<Value> {
        const OP: &str = "update_plugins_status";
        let key = cluster.key();
        let client = self.attach(ctx, cluster, OP).await?;
        enter(&key, OP, CycleState::Dispatching);

        let outcome = attempt(refresh_plugin_status(ctx, &*self.store, &client, cluster)).await;
        release(&key, OP, client, outcome).await
    }

    /// Run every attached plugin's pre-reconcile hook.
    pub async fn pre_reconcile_plugin_hooks(
        &self,
        ctx: &ReconcileContext,
        cluster: &Cluster,
    ) -> Result<RequeueDecision> {
        self.run_hooks(ctx, cluster, HookPhase::PreReconcile).await
    }

    /// Run every attached plugin's post-reconcile hook.
    pub async fn post_reconcile_plugin_hooks(
        &self,
        ctx: &ReconcileContext,
        cluster: &Cluster,
    ) -> Result<RequeueDecision> {
        self.run_hooks(ctx, cluster, HookPhase::PostReconcile).await
    }

    async fn run_hooks(
        &self,
        ctx: &ReconcileContext,
        cluster: &Cluster,
        phase: HookPhase,
    ) -> Result<RequeueDecision> {
        let operation = phase.method();
        let key = cluster.key();
        let mut client = self.attach(ctx, cluster, operation).await?;
        enter(&key, operation, CycleState::Dispatching);

        let outcome = attempt(async {
            let result = match phase {
                HookPhase::PreReconcile => client.pre_reconcile(ctx, cluster).await,
                HookPhase::PostReconcile => client.post_reconcile(ctx, cluster).await,
            };
            result.into_decision()
        })
        .await;
        release(&key, operation, client, outcome).await
    }

    /// Run one full reconcile cycle for the stored cluster `key`.
    ///
    /// Refreshes the plugin status, runs the pre-reconcile hooks, then
    /// `domain`, then the post-reconcile hooks. A pre-reconcile requeue or
    /// error ends the cycle early without running `domain`.
    pub async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        key: &ClusterKey,
        domain: &dyn DomainReconciler,
    ) -> Result<RequeueDecision> {
        let mut cluster = ctx.run(self.store.get(key)).await?;

        let patch = self.update_plugins_status(ctx, &mut cluster).await?;
        debug!(cluster = %key, patch = %patch, "Plugin status refreshed");

        let pre = self.pre_reconcile_plugin_hooks(ctx, &cluster).await?;
        if !pre.is_empty() {
            info!(
                cluster = %key,
                requeue_after_secs = pre.requeue_after.as_secs_f64(),
                "Pre-reconcile hooks requested a requeue"
            );
            return Ok(pre);
        }

        let domain_decision = domain.reconcile(ctx, &cluster).await?;
        let post = self.post_reconcile_plugin_hooks(ctx, &cluster).await?;
        let decision = domain_decision.merge(post);

        info!(
            cluster = %key,
            requeue = decision.requeue,
            requeue_after_secs = decision.requeue_after.as_secs_f64(),
            "Reconcile cycle finished"
        );
        Ok(decision)
    }
}

impl std::fmt::Debug for ClusterReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterReconciler")
            .field("hook_timeout", &self.connector.hook_timeout())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PluginReference;
    use crate::error::PluginError;
    use crate::hooks::HookResponse;
    use crate::plugins::{InProcessConnector, PluginDescriptor, ReconcilerHooks};
    use crate::store::{MemoryStore, MockClusterStore};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Probe {
        name: &'static str,
        pre: Option<HookResponse>,
        panics: bool,
        calls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl Probe {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ReconcilerHooks for Probe {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::new(self.name, "0.3.0")
        }

        async fn pre_reconcile(
            &self,
            _cluster: &Cluster,
            _parameters: &BTreeMap<String, String>,
        ) -> Result<HookResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("plugin {} blew up", self.name);
            }
            Ok(self.pre.unwrap_or_default())
        }

        async fn post_reconcile(
            &self,
            _cluster: &Cluster,
            _parameters: &BTreeMap<String, String>,
        ) -> Result<HookResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HookResponse::default())
        }

        async fn on_close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Recording {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl DomainReconciler for Recording {
        async fn reconcile(&self, _ctx: &ReconcileContext, _cluster: &Cluster) -> Result<RequeueDecision> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RequeueDecision::from(HookResponse::requeue_after(Duration::from_secs(60))))
        }
    }

    fn key() -> ClusterKey {
        ClusterKey::new("db", "pg")
    }

    async fn setup(plugins: Vec<Arc<Probe>>) -> (ClusterReconciler, Arc<MemoryStore>) {
        let mut connector = InProcessConnector::new();
        let mut references = Vec::new();
        for plugin in plugins {
            references.push(PluginReference::new(plugin.name));
            connector.register(plugin).unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        store.put(Cluster::new(&key(), references)).await;
        (ClusterReconciler::new(Arc::new(connector), store.clone()), store)
    }

    #[tokio::test]
    async fn test_update_plugins_status_is_idempotent() {
        let a = Probe::new("a");
        let b = Probe::new("b");
        let (reconciler, store) = setup(vec![a.clone(), b.clone()]).await;
        let ctx = ReconcileContext::new();

        let mut cluster = store.get(&key()).await.unwrap();
        let first = reconciler.update_plugins_status(&ctx, &mut cluster).await.unwrap();
        assert!(!crate::cluster::is_empty_patch(&first));
        assert_eq!(cluster.plugin_status_names(), vec!["a", "b"]);

        let second = reconciler.update_plugins_status(&ctx, &mut cluster).await.unwrap();
        assert!(crate::cluster::is_empty_patch(&second));
        assert_eq!(store.patch_count(), 1);
        assert_eq!(a.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_conflict_is_retryable_and_releases() {
        let a = Probe::new("a");
        let connector = InProcessConnector::new().with_plugin(a.clone()).unwrap();
        let mut store = MockClusterStore::new();
        store
            .expect_patch_status()
            .times(1)
            .returning(|_, _| Err(PluginError::PatchConflict("resourceVersion changed".into())));
        let reconciler = ClusterReconciler::new(Arc::new(connector), Arc::new(store));

        let mut cluster = Cluster::new(&key(), vec![PluginReference::new("a")]);
        let err = reconciler
            .update_plugins_status(&ReconcileContext::new(), &mut cluster)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(cluster.status.plugin_status.is_empty());
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_plugin_set_is_noop() {
        let (reconciler, store) = setup(vec![]).await;
        let cluster = store.get(&key()).await.unwrap();
        let decision = reconciler
            .pre_reconcile_plugin_hooks(&ReconcileContext::new(), &cluster)
            .await
            .unwrap();
        assert!(decision.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_plugin_is_released_before_unwinding() {
        let a = Probe::new("a");
        let boom = Arc::new(Probe {
            name: "boom",
            panics: true,
            ..Default::default()
        });
        let (reconciler, store) = setup(vec![a.clone(), boom.clone()]).await;
        let cluster = store.get(&key()).await.unwrap();

        let handle = tokio::spawn(async move {
            reconciler
                .pre_reconcile_plugin_hooks(&ReconcileContext::new(), &cluster)
                .await
        });
        let join = handle.await.unwrap_err();
        assert!(join.is_panic());
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(boom.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconcile_stops_on_pre_requeue() {
        let a = Arc::new(Probe {
            name: "a",
            pre: Some(HookResponse::requeue_after(Duration::from_secs(5))),
            ..Default::default()
        });
        let (reconciler, _store) = setup(vec![a.clone()]).await;
        let domain = Recording {
            runs: AtomicUsize::new(0),
        };

        let decision = reconciler
            .reconcile(&ReconcileContext::new(), &key(), &domain)
            .await
            .unwrap();
        assert!(decision.requeue);
        assert_eq!(decision.requeue_after, Duration::from_secs(5));
        assert_eq!(domain.runs.load(Ordering::SeqCst), 0);
        // pre hook only, no post hook
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconcile_full_cycle() {
        let a = Probe::new("a");
        let (reconciler, store) = setup(vec![a.clone()]).await;
        let domain = Recording {
            runs: AtomicUsize::new(0),
        };

        let decision = reconciler
            .reconcile(&ReconcileContext::new(), &key(), &domain)
            .await
            .unwrap();
        assert!(decision.requeue);
        assert_eq!(decision.requeue_after, Duration::from_secs(60));
        assert_eq!(domain.runs.load(Ordering::SeqCst), 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
        // status refresh, pre, post: three attaches, three releases
        assert_eq!(a.closes.load(Ordering::SeqCst), 3);

        let stored = store.get(&key()).await.unwrap();
        assert_eq!(stored.plugin_status_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_reconcile_unknown_cluster() {
        let (reconciler, _store) = setup(vec![]).await;
        let err = reconciler
            .reconcile(&ReconcileContext::new(), &ClusterKey::new("db", "ghost"), &NoopReconciler)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }
}

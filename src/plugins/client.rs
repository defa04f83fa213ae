//! The plugin client: a multiplexer over every plugin attached for one
//! reconcile cycle.
//!
//! Hooks are dispatched sequentially in attachment order. A later plugin can
//! therefore rely on whatever an earlier plugin set up during the same hook.
//! See [`crate::hooks`] for the merge policy.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cluster::Cluster;
use crate::context::ReconcileContext;
use crate::error::PluginError;
use crate::hooks::{HookPhase, HookResult};

use super::connector::{PluginConnection, DEFAULT_HOOK_TIMEOUT};
use super::types::PluginDescriptor;

/// Owns the live plugin connections of one reconcile cycle.
///
/// Not `Clone` and never shared between cycles. Release it with
/// [`close`](PluginClient::close); a client dropped without being closed
/// hands its connections to a background task that closes them.
pub struct PluginClient {
    connections: Vec<Box<dyn PluginConnection>>,
    hook_timeout: Duration,
    closed: bool,
}

impl PluginClient {
    /// Wrap already-attached connections, in attachment order.
    pub fn new(connections: Vec<Box<dyn PluginConnection>>) -> Self {
        Self {
            connections,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            closed: false,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Descriptors of the attached plugins, in attachment order.
    pub fn metadata_list(&self) -> Vec<&PluginDescriptor> {
        self.connections.iter().map(|c| c.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run the pre-reconcile hook on every attached plugin.
    pub async fn pre_reconcile(&mut self, ctx: &ReconcileContext, cluster: &Cluster) -> HookResult {
        self.dispatch(ctx, HookPhase::PreReconcile, cluster).await
    }

    /// Run the post-reconcile hook on every attached plugin.
    pub async fn post_reconcile(&mut self, ctx: &ReconcileContext, cluster: &Cluster) -> HookResult {
        self.dispatch(ctx, HookPhase::PostReconcile, cluster).await
    }

    async fn dispatch(
        &mut self,
        ctx: &ReconcileContext,
        phase: HookPhase,
        cluster: &Cluster,
    ) -> HookResult {
        let mut result = HookResult::noop();

        if self.closed {
            result.fail(PluginError::Config(format!(
                "{} dispatch on a closed plugin client",
                phase
            )));
            return result;
        }

        let timeout = self.hook_timeout;
        for conn in self.connections.iter_mut() {
            let plugin = conn.descriptor().name.clone();

            let outcome = ctx
                .run_with_timeout(timeout, conn.call_hook(phase, cluster), || {
                    PluginError::dispatch(
                        &plugin,
                        phase,
                        format!("timed out after {}s", timeout.as_secs_f64()),
                    )
                })
                .await;

            match outcome {
                Ok(response) => {
                    debug!(
                        plugin = %plugin,
                        hook = %phase,
                        requeue = response.requeue,
                        requeue_after_ms = response.requeue_after.as_millis() as u64,
                        "Hook completed"
                    );
                    result.absorb(&response);
                }
                Err(err) => {
                    let err = match err {
                        PluginError::Cancelled | PluginError::Dispatch { .. } => err,
                        other => PluginError::dispatch(&plugin, phase, other),
                    };
                    warn!(plugin = %plugin, hook = %phase, error = %err, "Hook failed, skipping remaining plugins");
                    result.fail(err);
                    break;
                }
            }
        }

        result
    }

    /// Release every plugin connection. Idempotent and infallible: close
    /// errors are logged, never returned.
    ///
    /// Deliberately ignores the cycle's cancellation token, since release
    /// must also happen on the cancellation path.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for conn in self.connections.iter_mut() {
            if let Err(e) = conn.close().await {
                warn!(plugin = %conn.descriptor().name, error = %e, "Failed to close plugin connection");
            }
        }
        debug!(plugins = self.connections.len(), "Plugin client closed");
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        if self.closed || self.connections.is_empty() {
            return;
        }

        warn!(
            plugins = self.connections.len(),
            "Plugin client dropped without close, releasing in background"
        );
        let mut connections = std::mem::take(&mut self.connections);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for conn in connections.iter_mut() {
                    if let Err(e) = conn.close().await {
                        warn!(plugin = %conn.descriptor().name, error = %e, "Failed to close plugin connection");
                    }
                }
            });
        }
    }
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self
            .connections
            .iter()
            .map(|c| c.descriptor().name.as_str())
            .collect();
        f.debug_struct("PluginClient")
            .field("plugins", &names)
            .field("hook_timeout", &self.hook_timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterKey;
    use crate::error::Result;
    use crate::hooks::HookResponse;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<String>>>;

    enum Behaviour {
        Respond(HookResponse),
        Fail(&'static str),
        Hang,
    }

    struct FakeConnection {
        descriptor: PluginDescriptor,
        behaviour: Behaviour,
        log: CallLog,
        closes: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl PluginConnection for FakeConnection {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        async fn call_hook(&mut self, phase: HookPhase, _cluster: &Cluster) -> Result<HookResponse> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.descriptor.name, phase.method()));
            match &self.behaviour {
                Behaviour::Respond(r) => Ok(*r),
                Behaviour::Fail(msg) => Err(PluginError::Store(msg.to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(HookResponse::default())
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn fake(name: &str, behaviour: Behaviour, log: &CallLog, closes: &Arc<Mutex<usize>>) -> Box<dyn PluginConnection> {
        Box::new(FakeConnection {
            descriptor: PluginDescriptor::new(name, "1.0.0"),
            behaviour,
            log: Arc::clone(log),
            closes: Arc::clone(closes),
        })
    }

    fn cluster() -> Cluster {
        Cluster::new(&ClusterKey::new("default", "pg"), vec![])
    }

    #[tokio::test]
    async fn test_empty_client_dispatches_noop() {
        let mut client = PluginClient::new(vec![]);
        let result = client.pre_reconcile(&ReconcileContext::new(), &cluster()).await;
        assert!(!result.is_err());
        assert!(result.decision().is_empty());
        client.close().await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_dispatch_merges_in_attachment_order() {
        let log = CallLog::default();
        let closes = Arc::new(Mutex::new(0));
        let mut client = PluginClient::new(vec![
            fake("a", Behaviour::Respond(HookResponse::default()), &log, &closes),
            fake("b", Behaviour::Respond(HookResponse::requeue_after(Duration::from_secs(30))), &log, &closes),
            fake("c", Behaviour::Respond(HookResponse::requeue_after(Duration::from_secs(10))), &log, &closes),
        ]);

        let decision = client
            .pre_reconcile(&ReconcileContext::new(), &cluster())
            .await
            .into_decision()
            .unwrap();
        assert!(decision.requeue);
        assert_eq!(decision.requeue_after, Duration::from_secs(10));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:pre_reconcile", "b:pre_reconcile", "c:pre_reconcile"]
        );

        let names: Vec<&str> = client.metadata_list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        client.close().await;
    }

    #[tokio::test]
    async fn test_first_error_short_circuits() {
        let log = CallLog::default();
        let closes = Arc::new(Mutex::new(0));
        let mut client = PluginClient::new(vec![
            fake("a", Behaviour::Respond(HookResponse::requeue()), &log, &closes),
            fake("b", Behaviour::Fail("disk full"), &log, &closes),
            fake("c", Behaviour::Respond(HookResponse::default()), &log, &closes),
        ]);

        let err = client
            .post_reconcile(&ReconcileContext::new(), &cluster())
            .await
            .into_decision()
            .unwrap_err();
        match err {
            PluginError::Dispatch { plugin, phase, reason } => {
                assert_eq!(plugin, "b");
                assert_eq!(phase, HookPhase::PostReconcile);
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:post_reconcile", "b:post_reconcile"]
        );
        client.close().await;
    }

    #[tokio::test]
    async fn test_hook_timeout_is_dispatch_error() {
        let log = CallLog::default();
        let closes = Arc::new(Mutex::new(0));
        let mut client = PluginClient::new(vec![fake("slow", Behaviour::Hang, &log, &closes)])
            .with_hook_timeout(Duration::from_millis(20));

        let err = client
            .pre_reconcile(&ReconcileContext::new(), &cluster())
            .await
            .into_decision()
            .unwrap_err();
        assert!(matches!(err, PluginError::Dispatch { ref reason, .. } if reason.contains("timed out")));
        client.close().await;
    }

    #[tokio::test]
    async fn test_cancellation_aborts_dispatch() {
        let log = CallLog::default();
        let closes = Arc::new(Mutex::new(0));
        let mut client = PluginClient::new(vec![
            fake("slow", Behaviour::Hang, &log, &closes),
            fake("after", Behaviour::Respond(HookResponse::default()), &log, &closes),
        ]);

        let ctx = ReconcileContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = client.pre_reconcile(&ctx, &cluster()).await;
        assert!(matches!(result.error, Some(PluginError::Cancelled)));
        assert_eq!(*log.lock().unwrap(), vec!["slow:pre_reconcile"]);

        client.close().await;
        assert_eq!(*closes.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let log = CallLog::default();
        let closes = Arc::new(Mutex::new(0));
        let mut client = PluginClient::new(vec![
            fake("a", Behaviour::Respond(HookResponse::default()), &log, &closes),
        ]);
        client.close().await;
        client.close().await;
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_after_close_fails() {
        let mut client = PluginClient::new(vec![]);
        client.close().await;
        let result = client.pre_reconcile(&ReconcileContext::new(), &cluster()).await;
        assert!(matches!(result.error, Some(PluginError::Config(_))));
    }

    #[tokio::test]
    async fn test_drop_without_close_releases_in_background() {
        let log = CallLog::default();
        let closes = Arc::new(Mutex::new(0));
        let client = PluginClient::new(vec![
            fake("a", Behaviour::Respond(HookResponse::default()), &log, &closes),
        ]);
        drop(client);

        for _ in 0..50 {
            if *closes.lock().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*closes.lock().unwrap(), 1);
    }
}

//! Plugin connector boundary.
//!
//! A [`PluginConnector`] turns one [`PluginReference`] into one live
//! [`PluginConnection`]. How the plugin is addressed (a child process, an
//! in-process object, a socket) is entirely the connector's business.
//! [`load_plugin_client`] is the only entry point the reconcile core uses: it
//! attaches every referenced plugin or none of them.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, PluginReference};
use crate::context::ReconcileContext;
use crate::error::{PluginError, Result};
use crate::hooks::{HookPhase, HookResponse};

use super::client::PluginClient;
use super::types::PluginDescriptor;

/// Default upper bound for a single hook call.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// One live connection to one plugin.
#[async_trait]
pub trait PluginConnection: Send + Sync {
    /// Metadata reported by the plugin when the connection was established.
    fn descriptor(&self) -> &PluginDescriptor;

    /// Invoke a reconcile hook on the plugin.
    async fn call_hook(&mut self, phase: HookPhase, cluster: &Cluster) -> Result<HookResponse>;

    /// Release the connection. Called at most once.
    async fn close(&mut self) -> Result<()>;
}

/// Establishes plugin connections.
#[async_trait]
pub trait PluginConnector: Send + Sync {
    /// Connect to the plugin named by `reference`.
    ///
    /// A plugin that cannot report its metadata must fail here.
    async fn connect(
        &self,
        ctx: &ReconcileContext,
        reference: &PluginReference,
    ) -> Result<Box<dyn PluginConnection>>;

    /// Upper bound applied to each hook call on connections made by this
    /// connector.
    fn hook_timeout(&self) -> Duration {
        DEFAULT_HOOK_TIMEOUT
    }
}

/// Attach every enabled plugin referenced by `cluster`, in spec order.
///
/// All or nothing: if one plugin fails to connect, every connection opened
/// so far is closed and the error is returned. A cancelled context surfaces
/// as [`PluginError::Cancelled`]; every other failure is reported as
/// [`PluginError::Connection`].
pub async fn load_plugin_client(
    ctx: &ReconcileContext,
    connector: &dyn PluginConnector,
    cluster: &Cluster,
) -> Result<PluginClient> {
    let references: Vec<&PluginReference> = cluster.enabled_plugins().collect();

    let mut seen = HashSet::new();
    for reference in &references {
        if !seen.insert(reference.name.as_str()) {
            return Err(PluginError::Config(format!(
                "cluster {} references plugin '{}' more than once",
                cluster.key(),
                reference.name
            )));
        }
    }

    let mut connections: Vec<Box<dyn PluginConnection>> = Vec::with_capacity(references.len());
    for reference in references {
        match connect_one(ctx, connector, reference).await {
            Ok(conn) => {
                debug!(
                    plugin = %reference.name,
                    version = %conn.descriptor().version,
                    "Plugin attached"
                );
                connections.push(conn);
            }
            Err(e) => {
                warn!(
                    cluster = %cluster.key(),
                    plugin = %reference.name,
                    error = %e,
                    "Plugin attach failed, releasing already attached plugins"
                );
                close_all(&mut connections).await;
                return Err(e);
            }
        }
    }

    info!(
        cluster = %cluster.key(),
        plugins = connections.len(),
        "Plugin client ready"
    );
    Ok(PluginClient::new(connections).with_hook_timeout(connector.hook_timeout()))
}

async fn connect_one(
    ctx: &ReconcileContext,
    connector: &dyn PluginConnector,
    reference: &PluginReference,
) -> Result<Box<dyn PluginConnection>> {
    let mut conn = match ctx.run(connector.connect(ctx, reference)).await {
        Ok(conn) => conn,
        Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
        Err(e @ PluginError::Connection { .. }) => return Err(e),
        Err(e) => return Err(PluginError::connection(&reference.name, e)),
    };

    let reported = conn.descriptor().name.clone();
    if reported != reference.name {
        if let Err(e) = conn.close().await {
            warn!(plugin = %reference.name, error = %e, "Failed to close mismatched plugin");
        }
        return Err(PluginError::connection(
            &reference.name,
            format!("plugin reported its name as '{}'", reported),
        ));
    }

    Ok(conn)
}

async fn close_all(connections: &mut Vec<Box<dyn PluginConnection>>) {
    for mut conn in connections.drain(..) {
        if let Err(e) = conn.close().await {
            warn!(plugin = %conn.descriptor().name, error = %e, "Failed to close plugin");
        }
    }
}

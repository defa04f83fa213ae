//! In-process plugins.
//!
//! Lets a controller embed plugins as plain Rust objects instead of child
//! processes. Each plugin implements [`ReconcilerHooks`] and is registered on
//! an [`InProcessConnector`] under the name clusters use to reference it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::{Cluster, PluginReference};
use crate::context::ReconcileContext;
use crate::error::{PluginError, Result};
use crate::hooks::{HookPhase, HookResponse};

use super::connector::{PluginConnection, PluginConnector, DEFAULT_HOOK_TIMEOUT};
use super::types::PluginDescriptor;

/// Hooks implemented by an in-process plugin.
///
/// Every method except [`descriptor`](ReconcilerHooks::descriptor) has a
/// no-op default.
#[async_trait]
pub trait ReconcilerHooks: Send + Sync {
    /// Metadata reported at attach time.
    fn descriptor(&self) -> PluginDescriptor;

    /// Called once per attach, before any hook. Failing here fails the attach.
    async fn on_attach(&self, _parameters: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn pre_reconcile(
        &self,
        _cluster: &Cluster,
        _parameters: &BTreeMap<String, String>,
    ) -> Result<HookResponse> {
        Ok(HookResponse::default())
    }

    async fn post_reconcile(
        &self,
        _cluster: &Cluster,
        _parameters: &BTreeMap<String, String>,
    ) -> Result<HookResponse> {
        Ok(HookResponse::default())
    }

    /// Called when the connection made by `on_attach` is released.
    async fn on_close(&self) -> Result<()> {
        Ok(())
    }
}

/// Connector resolving plugin references against registered in-process
/// plugins.
pub struct InProcessConnector {
    plugins: HashMap<String, Arc<dyn ReconcilerHooks>>,
    hook_timeout: Duration,
}

impl Default for InProcessConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessConnector {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Register a plugin under the name its descriptor reports.
    pub fn register(&mut self, plugin: Arc<dyn ReconcilerHooks>) -> Result<()> {
        let name = plugin.descriptor().name;
        if self.plugins.contains_key(&name) {
            return Err(PluginError::Config(format!(
                "in-process plugin '{}' is already registered",
                name
            )));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_plugin(mut self, plugin: Arc<dyn ReconcilerHooks>) -> Result<Self> {
        self.register(plugin)?;
        Ok(self)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl PluginConnector for InProcessConnector {
    async fn connect(
        &self,
        ctx: &ReconcileContext,
        reference: &PluginReference,
    ) -> Result<Box<dyn PluginConnection>> {
        ctx.check()?;

        let plugin = self.plugins.get(&reference.name).ok_or_else(|| {
            PluginError::connection(&reference.name, "no in-process plugin registered under this name")
        })?;

        plugin
            .on_attach(&reference.parameters)
            .await
            .map_err(|e| PluginError::connection(&reference.name, e))?;

        Ok(Box::new(InProcessConnection {
            descriptor: plugin.descriptor().normalized(),
            plugin: Arc::clone(plugin),
            parameters: reference.parameters.clone(),
        }))
    }

    fn hook_timeout(&self) -> Duration {
        self.hook_timeout
    }
}

struct InProcessConnection {
    descriptor: PluginDescriptor,
    plugin: Arc<dyn ReconcilerHooks>,
    parameters: BTreeMap<String, String>,
}

#[async_trait]
impl PluginConnection for InProcessConnection {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn call_hook(&mut self, phase: HookPhase, cluster: &Cluster) -> Result<HookResponse> {
        match phase {
            HookPhase::PreReconcile => self.plugin.pre_reconcile(cluster, &self.parameters).await,
            HookPhase::PostReconcile => self.plugin.post_reconcile(cluster, &self.parameters).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.plugin.on_close().await
    }
}

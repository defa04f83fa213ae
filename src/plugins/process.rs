//! Process plugins over JSON-RPC 2.0.
//!
//! A process plugin is a long-running child spawned at attach time and killed
//! when the plugin client is released. Requests and responses are exchanged
//! as newline-delimited JSON-RPC 2.0 messages over the child's stdin/stdout.
//! Anything the plugin writes to stderr is forwarded to the log.
//!
//! # Methods
//!
//! | method | params | result |
//! |---|---|---|
//! | `metadata` | `{}` | plugin descriptor |
//! | `pre_reconcile` | `{"cluster": .., "parameters": ..}` | `{"requeue": bool, "requeueAfterSecs": u64}` |
//! | `post_reconcile` | `{"cluster": .., "parameters": ..}` | `{"requeue": bool, "requeueAfterSecs": u64}` |
//! | `shutdown` | `{}` | ignored |

use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, PluginReference};
use crate::context::ReconcileContext;
use crate::error::{PluginError, Result};
use crate::hooks::{HookPhase, HookResponse};

use super::connector::{PluginConnection, PluginConnector};
use super::loader::verify_binary_digest;
use super::registry::PluginRegistry;
use super::types::{Plugin, PluginConfig, PluginDescriptor};

/// Grace period for a plugin to exit after `shutdown` before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ---- JSON-RPC 2.0 types ----

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHookResponse {
    #[serde(default)]
    requeue: bool,
    #[serde(default)]
    requeue_after_secs: u64,
}

impl From<WireHookResponse> for HookResponse {
    fn from(wire: WireHookResponse) -> Self {
        HookResponse {
            requeue: wire.requeue,
            requeue_after: Duration::from_secs(wire.requeue_after_secs),
        }
    }
}

/// Why a single request to a plugin failed.
#[derive(Debug)]
enum RpcFailure {
    Io(std::io::Error),
    Protocol(String),
    Remote { code: i64, message: String },
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcFailure::Io(e) => write!(f, "I/O error: {}", e),
            RpcFailure::Protocol(msg) => write!(f, "protocol error: {}", msg),
            RpcFailure::Remote { code, message } => write!(f, "plugin error {}: {}", code, message),
        }
    }
}

impl From<std::io::Error> for RpcFailure {
    fn from(e: std::io::Error) -> Self {
        RpcFailure::Io(e)
    }
}

// ---- Connector ----

/// Connector that launches installed process plugins.
pub struct ProcessConnector {
    registry: Arc<PluginRegistry>,
    config: PluginConfig,
}

impl ProcessConnector {
    pub fn new(registry: Arc<PluginRegistry>, config: PluginConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    fn resolve(&self, reference: &PluginReference) -> Result<&Plugin> {
        if !self.config.is_plugin_permitted(&reference.name) {
            return Err(PluginError::connection(
                &reference.name,
                "plugin is blocked by configuration",
            ));
        }
        self.registry
            .get_plugin(&reference.name)
            .ok_or_else(|| PluginError::connection(&reference.name, "plugin is not installed"))
    }
}

#[async_trait]
impl PluginConnector for ProcessConnector {
    async fn connect(
        &self,
        ctx: &ReconcileContext,
        reference: &PluginReference,
    ) -> Result<Box<dyn PluginConnection>> {
        let plugin = self.resolve(reference)?;

        verify_binary_digest(plugin)
            .await
            .map_err(|e| PluginError::connection(&reference.name, e))?;

        let request_timeout = plugin
            .manifest
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.hook_timeout());

        let mut conn = ProcessConnection::spawn(plugin, reference.parameters.clone(), request_timeout)
            .map_err(|e| PluginError::connection(&reference.name, e))?;

        let limit = self.config.connect_timeout();
        let handshake = ctx
            .run_with_timeout(
                limit,
                async {
                    conn.request("metadata", json!({}))
                        .await
                        .map_err(|e| PluginError::connection(&reference.name, e))
                },
                || {
                    PluginError::connection(
                        &reference.name,
                        format!("no metadata within {}s", limit.as_secs()),
                    )
                },
            )
            .await
            .and_then(|value| {
                serde_json::from_value::<PluginDescriptor>(value).map_err(|e| {
                    PluginError::connection(&reference.name, format!("invalid metadata: {}", e))
                })
            });

        match handshake {
            Ok(descriptor) => {
                conn.descriptor = descriptor.normalized();
                info!(
                    plugin = %conn.descriptor.name,
                    version = %conn.descriptor.version,
                    "Process plugin connected"
                );
                Ok(Box::new(conn))
            }
            Err(e) => {
                conn.kill().await;
                Err(e)
            }
        }
    }

    fn hook_timeout(&self) -> Duration {
        self.config.hook_timeout()
    }
}

// ---- Connection ----

/// A running plugin child process.
struct ProcessConnection {
    name: String,
    descriptor: PluginDescriptor,
    parameters: BTreeMap<String, String>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    request_timeout: Duration,
}

impl ProcessConnection {
    fn spawn(
        plugin: &Plugin,
        parameters: BTreeMap<String, String>,
        request_timeout: Duration,
    ) -> std::result::Result<Self, RpcFailure> {
        let binary_path = plugin.binary_path();
        if !binary_path.exists() {
            return Err(RpcFailure::Protocol(format!(
                "plugin binary not found: {}",
                binary_path.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(&binary_path);
        cmd.args(&plugin.manifest.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&plugin.path)
            .kill_on_drop(true);

        for (key, value) in &plugin.manifest.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcFailure::Protocol("plugin stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = plugin.name().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(plugin = %name, "{}", line);
                }
            });
        }

        Ok(Self {
            name: plugin.name().to_string(),
            descriptor: PluginDescriptor::new(plugin.name(), &plugin.manifest.version),
            parameters,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            request_timeout,
        })
    }

    /// Send one request and wait for the response carrying the same id.
    async fn request(&mut self, method: &str, params: Value) -> std::result::Result<Value, RpcFailure> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })
        .map_err(|e| RpcFailure::Protocol(format!("failed to encode request: {}", e)))?;
        line.push('\n');

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RpcFailure::Protocol("plugin stdin already closed".into()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        loop {
            let Some(raw) = self.stdout.next_line().await? else {
                return Err(RpcFailure::Protocol("plugin closed its stdout".into()));
            };
            if raw.trim().is_empty() {
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_str(&raw) {
                Ok(r) => r,
                Err(_) => {
                    debug!(plugin = %self.name, line = %raw, "Ignoring non JSON-RPC output");
                    continue;
                }
            };

            if response.id != Some(id) {
                debug!(plugin = %self.name, expected = id, got = ?response.id, "Ignoring unrelated response");
                continue;
            }

            if let Some(err) = response.error {
                return Err(RpcFailure::Remote {
                    code: err.code,
                    message: err.message,
                });
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    async fn kill(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill().await {
            warn!(plugin = %self.name, error = %e, "Failed to kill plugin process");
        }
    }
}

#[async_trait]
impl PluginConnection for ProcessConnection {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn call_hook(&mut self, phase: HookPhase, cluster: &Cluster) -> Result<HookResponse> {
        let params = json!({
            "cluster": cluster,
            "parameters": self.parameters,
        });

        let value = tokio::time::timeout(self.request_timeout, self.request(phase.method(), params))
            .await
            .map_err(|_| {
                PluginError::dispatch(
                    &self.name,
                    phase,
                    format!("no response within {}s", self.request_timeout.as_secs()),
                )
            })?
            .map_err(|e| PluginError::dispatch(&self.name, phase, e))?;

        if value.is_null() {
            return Ok(HookResponse::default());
        }
        let wire: WireHookResponse = serde_json::from_value(value).map_err(|e| {
            PluginError::dispatch(&self.name, phase, format!("invalid hook response: {}", e))
        })?;
        Ok(wire.into())
    }

    async fn close(&mut self) -> Result<()> {
        if self.stdin.is_none() {
            return Ok(());
        }

        // Best effort: a plugin that ignores shutdown is killed below.
        if let Err(e) = tokio::time::timeout(SHUTDOWN_GRACE, self.request("shutdown", json!({}))).await {
            debug!(plugin = %self.name, error = %e, "Plugin did not acknowledge shutdown");
        }
        self.stdin = None;

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(plugin = %self.name, status = %status, "Plugin process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(plugin = %self.name, "Plugin process did not exit, killing it");
                self.child.kill().await.map_err(PluginError::from)
            }
        }
    }
}

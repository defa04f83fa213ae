//! Ambient per-cycle context.
//!
//! Every blocking call in the plugin layer (attach, hook dispatch, status
//! patch) races the cycle's cancellation token. When the token fires the call
//! resolves to [`PluginError::Cancelled`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{PluginError, Result};

/// Context threaded through one reconcile cycle.
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    cancel: CancellationToken,
}

impl ReconcileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing token, e.g. one shared with a shutdown signal handler.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// A context that is cancelled together with this one, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast if the cycle was already cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        Ok(())
    }

    /// Run `fut` until it completes or the context is cancelled.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PluginError::Cancelled),
            out = fut => out,
        }
    }

    /// Like [`run`](Self::run), but also bounded by `limit`. `on_timeout`
    /// builds the error reported when the limit elapses.
    pub async fn run_with_timeout<F, T, E>(&self, limit: Duration, fut: F, on_timeout: E) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        E: FnOnce() -> PluginError,
    {
        match tokio::time::timeout(limit, self.run(fut)).await {
            Ok(out) => out,
            Err(_) => Err(on_timeout()),
        }
    }
}

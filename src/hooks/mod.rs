//! Reconcile hook results and the merge policy.
//!
//! Plugins participate in two extension points of every reconcile cycle:
//!
//! - `pre_reconcile`: before the controller's own reconciliation logic
//! - `post_reconcile`: after it
//!
//! Each plugin answers a hook with a [`HookResponse`]. The plugin client folds
//! those responses, in attachment order, into a single [`HookResult`]:
//!
//! - the first error short-circuits the dispatch and becomes the result's error
//! - `requeue` is the logical OR of every plugin's flag
//! - `requeue_after` is the shortest non-zero delay reported
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use clusterplug::hooks::{HookResponse, HookResult};
//!
//! let mut result = HookResult::noop();
//! result.absorb(&HookResponse::default());
//! result.absorb(&HookResponse::requeue_after(Duration::from_secs(30)));
//! result.absorb(&HookResponse::requeue_after(Duration::from_secs(10)));
//!
//! let decision = result.into_decision().unwrap();
//! assert!(decision.requeue);
//! assert_eq!(decision.requeue_after, Duration::from_secs(10));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};

// ---------------------------------------------------------------------------
// Hook phase
// ---------------------------------------------------------------------------

/// Which extension point of the reconcile cycle is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Runs before the controller's own reconciliation logic.
    PreReconcile,
    /// Runs after the controller's own reconciliation logic.
    PostReconcile,
}

impl HookPhase {
    /// JSON-RPC method name used on the plugin wire.
    pub fn method(&self) -> &'static str {
        match self {
            HookPhase::PreReconcile => "pre_reconcile",
            HookPhase::PostReconcile => "post_reconcile",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::PreReconcile => write!(f, "pre-reconcile"),
            HookPhase::PostReconcile => write!(f, "post-reconcile"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-plugin response
// ---------------------------------------------------------------------------

/// What a single plugin answered for one hook call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookResponse {
    /// The plugin asks for another reconcile cycle.
    pub requeue: bool,
    /// Preferred delay before that cycle. Zero means "no preference".
    pub requeue_after: Duration,
}

impl HookResponse {
    /// Request an immediate requeue.
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: Duration::ZERO,
        }
    }

    /// Request a requeue after `delay`.
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Requeue decision
// ---------------------------------------------------------------------------

/// The merged `{requeue, requeue_after}` handed to the reconcile loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueDecision {
    pub requeue: bool,
    #[serde(with = "duration_secs")]
    pub requeue_after: Duration,
}

impl RequeueDecision {
    /// True when nothing asks for another cycle.
    pub fn is_empty(&self) -> bool {
        !self.requeue && self.requeue_after.is_zero()
    }

    /// Combine two decisions: OR the flags, keep the shortest non-zero delay.
    pub fn merge(self, other: RequeueDecision) -> RequeueDecision {
        RequeueDecision {
            requeue: self.requeue || other.requeue,
            requeue_after: shortest_delay(self.requeue_after, other.requeue_after),
        }
    }
}

impl From<HookResponse> for RequeueDecision {
    fn from(response: HookResponse) -> Self {
        RequeueDecision {
            requeue: response.requeue || !response.requeue_after.is_zero(),
            requeue_after: response.requeue_after,
        }
    }
}

fn shortest_delay(a: Duration, b: Duration) -> Duration {
    match (a.is_zero(), b.is_zero()) {
        (true, _) => b,
        (_, true) => a,
        _ => a.min(b),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| serde::de::Error::custom(format!("invalid requeueAfter {}: {}", secs, e)))
    }
}

// ---------------------------------------------------------------------------
// Merged hook result
// ---------------------------------------------------------------------------

/// The merged outcome of dispatching one hook across all attached plugins.
#[derive(Debug, Default)]
pub struct HookResult {
    pub requeue: bool,
    pub requeue_after: Duration,
    pub error: Option<PluginError>,
}

impl HookResult {
    /// The result of dispatching to zero plugins.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Fold one plugin's response into the running result.
    pub fn absorb(&mut self, response: &HookResponse) {
        let merged = self.decision().merge((*response).into());
        self.requeue = merged.requeue;
        self.requeue_after = merged.requeue_after;
    }

    /// Record the error that stopped the dispatch.
    pub fn fail(&mut self, error: PluginError) {
        self.error = Some(error);
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// The requeue part of the result, ignoring any error.
    pub fn decision(&self) -> RequeueDecision {
        RequeueDecision {
            requeue: self.requeue,
            requeue_after: self.requeue_after,
        }
    }

    /// Split into the `(decision, error)` pair the controller consumes.
    pub fn into_decision(self) -> Result<RequeueDecision> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(RequeueDecision {
                requeue: self.requeue,
                requeue_after: self.requeue_after,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

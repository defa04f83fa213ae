//! Scoped plugin acquisition for one controller operation.
//!
//! Every operation attaches the cluster's plugins, does its work, and
//! releases them again whatever happened in between: success, error,
//! cancellation, or a panic inside a plugin (resumed after release).

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::trace;

use crate::cluster::ClusterKey;
use crate::error::Result;
use crate::plugins::PluginClient;

/// Stages of one scoped plugin acquisition, traced at `trace` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Attaching,
    AttachFailed,
    Attached,
    Dispatching,
    DispatchFailed,
    Dispatched,
    Releasing,
    Done,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleState::Attaching => "attaching",
            CycleState::AttachFailed => "attach-failed",
            CycleState::Attached => "attached",
            CycleState::Dispatching => "dispatching",
            CycleState::DispatchFailed => "dispatch-failed",
            CycleState::Dispatched => "dispatched",
            CycleState::Releasing => "releasing",
            CycleState::Done => "done",
        };
        f.write_str(s)
    }
}

pub(crate) fn enter(key: &ClusterKey, operation: &'static str, state: CycleState) {
    trace!(cluster = %key, operation, state = %state, "Plugin cycle");
}

/// Outcome of the work done while plugins were attached, panics included.
pub(crate) type Attempt<T> = std::thread::Result<Result<T>>;

/// Poll `work` with panic capture so a panicking plugin still gets released.
pub(crate) async fn attempt<T>(work: impl Future<Output = Result<T>>) -> Attempt<T> {
    AssertUnwindSafe(work).catch_unwind().await
}

/// Close `client`, then hand back the outcome of the work, resuming a
/// captured panic only once every connection is released.
pub(crate) async fn release<T>(
    key: &ClusterKey,
    operation: &'static str,
    mut client: PluginClient,
    outcome: Attempt<T>,
) -> Result<T> {
    match &outcome {
        Ok(Ok(_)) => enter(key, operation, CycleState::Dispatched),
        _ => enter(key, operation, CycleState::DispatchFailed),
    }

    enter(key, operation, CycleState::Releasing);
    client.close().await;
    enter(key, operation, CycleState::Done);

    match outcome {
        Ok(result) => result,
        Err(panic) => resume(panic),
    }
}

fn resume(panic: Box<dyn Any + Send>) -> ! {
    std::panic::resume_unwind(panic)
}

//! Error types for clusterplug
//!
//! Every error the plugin layer can surface to the reconcile loop lives in
//! [`PluginError`]. Uses `thiserror` for `Display` and `Error` derives.
//!
//! The reconcile loop is the only recovery mechanism: nothing in this crate
//! retries internally. [`PluginError::is_retryable`] tells the loop which
//! failures should simply be requeued with backoff.

use thiserror::Error;

use crate::hooks::HookPhase;

/// The primary error type for clusterplug operations.
#[derive(Error, Debug)]
pub enum PluginError {
    /// A referenced plugin could not be reached or is misconfigured.
    /// Raised during attach; no hook runs when this happens.
    #[error("Connection error: plugin '{plugin}': {reason}")]
    Connection { plugin: String, reason: String },

    /// A plugin's hook call failed. Remaining plugins in the same dispatch
    /// are not invoked.
    #[error("Dispatch error: plugin '{plugin}' {phase} hook: {reason}")]
    Dispatch {
        plugin: String,
        phase: HookPhase,
        reason: String,
    },

    /// A concurrent writer raced the status patch.
    #[error("Patch conflict: {0}")]
    PatchConflict(String),

    /// The backing store could not be reached or rejected the request.
    #[error("Store error: {0}")]
    Store(String),

    /// The ambient cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// Resource not found (clusters, plugins, manifests).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related errors (invalid config, bad manifest, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Security violations (digest mismatch, path traversal, etc.)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    /// Build a connection error for the named plugin.
    pub fn connection(plugin: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a dispatch error for the named plugin and hook phase.
    pub fn dispatch(plugin: impl Into<String>, phase: HookPhase, reason: impl ToString) -> Self {
        Self::Dispatch {
            plugin: plugin.into(),
            phase,
            reason: reason.to_string(),
        }
    }

    /// Whether the reconcile loop should requeue with backoff rather than
    /// treat the failure as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Dispatch { .. }
                | Self::PatchConflict(_)
                | Self::Store(_)
                | Self::Cancelled
        )
    }
}

/// A specialized `Result` type for clusterplug operations.
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PluginError::Config("missing plugin dir".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing plugin dir");
    }

    #[test]
    fn test_connection_error_display() {
        let err = PluginError::connection("barman-cloud", "binary not found");
        assert_eq!(
            err.to_string(),
            "Connection error: plugin 'barman-cloud': binary not found"
        );
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = PluginError::dispatch("wal-archiver", HookPhase::PreReconcile, "boom");
        assert_eq!(
            err.to_string(),
            "Dispatch error: plugin 'wal-archiver' pre-reconcile hook: boom"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PluginError = io_err.into();
        assert!(matches!(err, PluginError::Io(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PluginError::connection("a", "x").is_retryable());
        assert!(PluginError::dispatch("a", HookPhase::PostReconcile, "x").is_retryable());
        assert!(PluginError::PatchConflict("x".into()).is_retryable());
        assert!(PluginError::Store("x".into()).is_retryable());
        assert!(PluginError::Cancelled.is_retryable());

        assert!(!PluginError::NotFound("x".into()).is_retryable());
        assert!(!PluginError::Config("x".into()).is_retryable());
        assert!(!PluginError::SecurityViolation("x".into()).is_retryable());
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}

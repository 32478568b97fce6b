//! Error types for cluster and engine operations.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by the automation engine behind a resource handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not start a browser process.
    #[error("launch failed: {0}")]
    Launch(String),
    /// The target (browser, context or page) is closed or disconnected.
    #[error("target closed: {0}")]
    Closed(String),
    /// Any other engine-side failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors produced by the cluster, its workers and resource providers.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Invalid option combination; the cluster never becomes ready.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Neither a default task nor a per-job task function was supplied.
    #[error("no task function defined")]
    MissingTask,
    /// A job with the same identity key is already queued.
    #[error("duplicate job skipped: {0}")]
    Duplicate(String),
    /// A resource lifecycle operation exceeded its time budget.
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Budget that was exceeded.
        after: Duration,
    },
    /// Engine failure while provisioning or tearing down resources.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The shared browser could not be relaunched; no further jobs can run.
    #[error("unable to restart browser: {0}")]
    Unrecoverable(String),
    /// Error returned by a task function.
    #[error(transparent)]
    Task(anyhow::Error),
    /// The cluster is closed or closing.
    #[error("cluster is closed")]
    Closed,
    /// The job was dropped before a result could be delivered.
    #[error("job dropped before completion")]
    Dropped,
}

impl ClusterError {
    /// Message to carry into a fatal state, without re-wrapping.
    pub(crate) fn fatal_reason(&self) -> String {
        match self {
            Self::Unrecoverable(reason) => reason.clone(),
            other => other.to_string(),
        }
    }

    /// True for scheduler bookkeeping timeouts (as opposed to task failures).
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the error originated in the task function itself.
    #[must_use]
    pub const fn is_task_error(&self) -> bool {
        matches!(self, Self::Task(_))
    }

    /// True when the cluster cannot run any further jobs.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }

    /// True when the failure points at the resource rather than the task.
    #[must_use]
    pub const fn is_provisioning(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Engine(_))
    }
}

/// Result type returned by task functions.
pub type AppResult<T> = Result<T, anyhow::Error>;

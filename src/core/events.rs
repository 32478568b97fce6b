//! Cluster notifications.
//!
//! Events are published on a `tokio::sync::broadcast` channel in the order they
//! happen. A subscriber that falls more than the channel capacity behind sees a
//! `Lagged` error and misses the oldest events; the cluster never blocks on a
//! slow subscriber.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::core::error::ClusterError;
use crate::core::job::TaskFn;

/// Something observable happened to a job.
pub enum ClusterEvent<P, R> {
    /// A submission was accepted into the queue.
    Queued {
        /// Job id.
        job_id: Uuid,
        /// Payload as submitted.
        data: Option<P>,
        /// Task function as submitted, if one was passed.
        task: Option<TaskFn<P, R>>,
    },
    /// A fire-and-forget job failed with no retries left.
    TaskError {
        /// Job id.
        job_id: Uuid,
        /// Final error.
        error: Arc<ClusterError>,
        /// Payload of the job.
        data: Option<P>,
        /// Total attempts made.
        attempts: u32,
    },
}

impl<P, R> ClusterEvent<P, R> {
    /// Id of the job the event is about.
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        match self {
            Self::Queued { job_id, .. } | Self::TaskError { job_id, .. } => *job_id,
        }
    }

    /// Short event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queue",
            Self::TaskError { .. } => "taskerror",
        }
    }
}

// TaskFn is not Debug, and derived Clone would bound R: Clone
impl<P: Clone, R> Clone for ClusterEvent<P, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Queued { job_id, data, task } => Self::Queued {
                job_id: *job_id,
                data: data.clone(),
                task: task.clone(),
            },
            Self::TaskError {
                job_id,
                error,
                data,
                attempts,
            } => Self::TaskError {
                job_id: *job_id,
                error: Arc::clone(error),
                data: data.clone(),
                attempts: *attempts,
            },
        }
    }
}

impl<P: fmt::Debug, R> fmt::Debug for ClusterEvent<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued { job_id, data, task } => f
                .debug_struct("Queued")
                .field("job_id", job_id)
                .field("data", data)
                .field("has_task", &task.is_some())
                .finish(),
            Self::TaskError {
                job_id,
                error,
                data,
                attempts,
            } => f
                .debug_struct("TaskError")
                .field("job_id", job_id)
                .field("error", error)
                .field("data", data)
                .field("attempts", attempts)
                .finish(),
        }
    }
}

/// Internal completion signal behind `Cluster::wait_for_one`.
#[derive(Clone, Debug)]
pub(crate) enum Completion<P> {
    /// An attempt finished, successfully or not.
    Job(Option<P>),
    /// The cluster shut down.
    Shutdown,
}

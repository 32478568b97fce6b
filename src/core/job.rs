//! Jobs, task functions and the payload keys the scheduler derives from them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::concurrency::ResourceData;
use crate::core::error::{AppResult, ClusterError};
use crate::engine::Page;
use crate::util::{domain_of, now_ms};

/// Boxed future returned by a task function.
pub type TaskFuture<R> = Pin<Box<dyn Future<Output = AppResult<R>> + Send>>;

/// Shared task function.
pub type TaskFn<P, R> = Arc<dyn Fn(TaskContext<P>) -> TaskFuture<R> + Send + Sync>;

/// Wrap an async closure as a [`TaskFn`].
pub fn task_fn<P, R, F, Fut>(f: F) -> TaskFn<P, R>
where
    F: Fn(TaskContext<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
{
    Arc::new(move |ctx: TaskContext<P>| -> TaskFuture<R> { Box::pin(f(ctx)) })
}

/// Argument passed to a task function.
#[derive(Clone)]
pub struct TaskContext<P> {
    /// Page provisioned for this attempt.
    pub page: Arc<dyn Page>,
    /// Full resource bundle, including provider extras.
    pub resources: ResourceData,
    /// Payload as submitted.
    pub data: Option<P>,
    /// Slot index of the worker running the attempt.
    pub worker_id: usize,
}

impl<P: fmt::Debug> fmt::Debug for TaskContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("data", &self.data)
            .field("worker_id", &self.worker_id)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Payload types the cluster can schedule.
///
/// `identity_key` drives duplicate skipping and `throttle_key` drives
/// same-domain throttling. Both default to values derived from [`url`](Self::url);
/// a payload with no URL bypasses both.
pub trait JobData: Clone + Send + Sync + 'static {
    /// URL the job targets, if any.
    fn url(&self) -> Option<&str> {
        None
    }

    /// Key used to detect duplicate submissions.
    fn identity_key(&self) -> Option<String> {
        self.url().map(str::to_string)
    }

    /// Key used for same-domain throttling.
    fn throttle_key(&self) -> Option<String> {
        self.url().and_then(domain_of)
    }
}

impl JobData for String {
    fn url(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl JobData for &'static str {
    fn url(&self) -> Option<&str> {
        Some(*self)
    }
}

/// A string, or an object with a string `url` field.
impl JobData for Value {
    fn url(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Object(map) => map.get("url").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl JobData for () {}

macro_rules! keyless_job_data {
    ($($t:ty),*) => {
        $(impl JobData for $t {})*
    };
}

keyless_job_data!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// One unit of submitted work.
pub struct Job<P, R> {
    /// Unique job id.
    pub id: Uuid,
    /// Payload.
    pub data: Option<P>,
    /// Per-job task function; the cluster default is used when absent.
    pub task: Option<TaskFn<P, R>>,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Submission time.
    pub created_at_ms: u128,
    responder: Option<oneshot::Sender<Result<R, ClusterError>>>,
}

impl<P: JobData, R> Job<P, R> {
    /// Create a fire-and-forget job.
    #[must_use]
    pub fn new(data: Option<P>, task: Option<TaskFn<P, R>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            task,
            attempts: 0,
            created_at_ms: now_ms(),
            responder: None,
        }
    }

    /// Attach the channel the final outcome is delivered on.
    #[must_use]
    pub(crate) fn with_responder(mut self, tx: oneshot::Sender<Result<R, ClusterError>>) -> Self {
        self.responder = Some(tx);
        self
    }

    /// Whether a caller awaits this job's outcome.
    #[must_use]
    pub const fn is_awaited(&self) -> bool {
        self.responder.is_some()
    }

    /// URL of the payload.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.data.as_ref().and_then(JobData::url)
    }

    /// Duplicate-detection key of the payload.
    #[must_use]
    pub fn identity_key(&self) -> Option<String> {
        self.data.as_ref().and_then(JobData::identity_key)
    }

    /// Throttle key of the payload.
    #[must_use]
    pub fn throttle_key(&self) -> Option<String> {
        self.data.as_ref().and_then(JobData::throttle_key)
    }

    /// Deliver the final outcome to the awaiting caller. Returns the outcome
    /// back when nobody awaits the job.
    pub(crate) fn respond(&mut self, result: Result<R, ClusterError>) -> Option<Result<R, ClusterError>> {
        match self.responder.take() {
            Some(tx) => {
                // the caller may have stopped waiting
                let _ = tx.send(result);
                None
            }
            None => Some(result),
        }
    }
}

impl<P: fmt::Debug, R> fmt::Debug for Job<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("has_task", &self.task.is_some())
            .field("attempts", &self.attempts)
            .field("created_at_ms", &self.created_at_ms)
            .finish_non_exhaustive()
    }
}

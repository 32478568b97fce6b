//! Core scheduling: jobs, the queue, throttling and the cluster itself.

pub mod cluster;
pub mod error;
pub mod events;
pub mod job;
pub mod queue;
pub mod stats;
pub mod throttle;

pub use cluster::Cluster;
pub use error::{AppResult, ClusterError, EngineError};
pub use events::ClusterEvent;
pub use job::{task_fn, Job, JobData, TaskContext, TaskFn, TaskFuture};
pub use queue::{JobQueue, Selection};
pub use stats::ClusterStats;
pub use throttle::ThrottleTracker;

//! Cluster statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of cluster activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStats {
    /// Number of worker slots.
    pub workers: usize,

    /// Jobs currently executing.
    pub working: usize,

    /// Jobs waiting in the queue.
    pub queued: usize,

    /// Failed jobs waiting out their retry delay.
    pub delayed: usize,

    /// Jobs accepted by `queue`/`execute`.
    pub submitted: u64,

    /// Jobs that finished successfully.
    pub completed: u64,

    /// Jobs that failed with no retries left.
    pub failed: u64,

    /// Attempts that were scheduled again after a failure.
    pub retried: u64,

    /// Repairs that replaced a browser.
    pub repairs: u64,
}

impl ClusterStats {
    /// Jobs that reached a final outcome.
    #[must_use]
    pub const fn done(&self) -> u64 {
        self.completed + self.failed
    }
}

impl fmt::Display for ClusterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} done ({} failed), {} working on {} workers, {} queued, {} delayed, {} retries, {} repairs",
            self.done(),
            self.submitted,
            self.failed,
            self.working,
            self.workers,
            self.queued,
            self.delayed,
            self.retried,
            self.repairs
        )
    }
}

/// Monotonic counters behind [`ClusterStats`].
#[derive(Debug, Default)]
pub(crate) struct ClusterCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub repairs: AtomicU64,
}

impl ClusterCounters {
    /// Combine the counters with the scheduler's live gauges.
    pub fn snapshot(&self, workers: usize, working: usize, queued: usize, delayed: usize) -> ClusterStats {
        ClusterStats {
            workers,
            working,
            queued,
            delayed,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

//! FIFO job queue with optional duplicate skipping.

use std::collections::{HashMap, VecDeque};

use crate::core::job::{Job, JobData};

/// Verdict of a [`JobQueue::take_first`] selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Remove and return this job.
    Take,
    /// Leave this job in place and look at the next one.
    Skip,
    /// Leave this job in place and stop looking.
    Stop,
}

/// Pending jobs in submission order.
///
/// With duplicate skipping on, a job whose identity key matches a job that is
/// still queued is rejected. Jobs that were already dispatched do not count.
pub struct JobQueue<P, R> {
    jobs: VecDeque<Job<P, R>>,
    keys: HashMap<String, usize>,
    skip_duplicates: bool,
}

impl<P: JobData, R> JobQueue<P, R> {
    /// Create an empty queue.
    #[must_use]
    pub fn new(skip_duplicates: bool) -> Self {
        Self {
            jobs: VecDeque::new(),
            keys: HashMap::new(),
            skip_duplicates,
        }
    }

    /// Append a new submission. Returns the job back if it is a duplicate.
    pub fn push(&mut self, job: Job<P, R>) -> Result<(), Job<P, R>> {
        if self.skip_duplicates {
            if let Some(key) = job.identity_key() {
                if self.keys.contains_key(&key) {
                    return Err(job);
                }
            }
        }
        self.requeue(job);
        Ok(())
    }

    /// Append a job without the duplicate check. Used for retries.
    pub fn requeue(&mut self, job: Job<P, R>) {
        self.track(&job);
        self.jobs.push_back(job);
    }

    /// Remove and return the head.
    pub fn shift(&mut self) -> Option<Job<P, R>> {
        let job = self.jobs.pop_front()?;
        self.untrack(&job);
        Some(job)
    }

    /// Remove and return the first job the selector takes.
    pub fn take_first<F>(&mut self, mut select: F) -> Option<Job<P, R>>
    where
        F: FnMut(&Job<P, R>) -> Selection,
    {
        let mut found = None;
        for (index, job) in self.jobs.iter().enumerate() {
            match select(job) {
                Selection::Take => {
                    found = Some(index);
                    break;
                }
                Selection::Skip => {}
                Selection::Stop => break,
            }
        }
        let job = self.jobs.remove(found?)?;
        self.untrack(&job);
        Some(job)
    }

    /// Whether a job with this identity key is queued.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Number of pending jobs.
    #[must_use]
    pub fn size(&self) -> usize {
        self.jobs.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Iterate pending jobs in order.
    pub fn iter(&self) -> impl Iterator<Item = &Job<P, R>> {
        self.jobs.iter()
    }

    /// Remove every pending job.
    pub fn drain(&mut self) -> Vec<Job<P, R>> {
        self.keys.clear();
        self.jobs.drain(..).collect()
    }

    fn track(&mut self, job: &Job<P, R>) {
        if !self.skip_duplicates {
            return;
        }
        if let Some(key) = job.identity_key() {
            *self.keys.entry(key).or_insert(0) += 1;
        }
    }

    fn untrack(&mut self, job: &Job<P, R>) {
        if !self.skip_duplicates {
            return;
        }
        if let Some(key) = job.identity_key() {
            if let Some(count) = self.keys.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.keys.remove(&key);
                }
            }
        }
    }
}

//! The cluster: a fixed pool of workers fed from one job queue.
//!
//! A single dispatch task owns every decision about *which* job runs *where*.
//! Callers and finished jobs only mutate the shared [`DispatchState`] under a
//! short `parking_lot` lock and then poke the dispatcher through a `Notify`.
//! Each dispatched job runs in its own tokio task and hands its worker slot
//! back when done, so a slow task never stalls dispatch to the other slots.
//!
//! Retry delays and throttle waits are deadlines the dispatcher sleeps towards
//! (`sleep_until`), never detached timers, so `close()` can discard pending
//! retries deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::concurrency::{Concurrency, ConcurrencyProvider, ProviderSettings, RepairOutcome, WorkerInstance};
use crate::config::{ClusterConfig, ThrottlePolicy};
use crate::core::error::{AppResult, ClusterError};
use crate::core::events::{ClusterEvent, Completion};
use crate::core::job::{task_fn, Job, JobData, TaskContext, TaskFn};
use crate::core::queue::{JobQueue, Selection};
use crate::core::stats::{ClusterCounters, ClusterStats};
use crate::core::throttle::ThrottleTracker;
use crate::engine::BrowserEngine;

struct WorkerSlot {
    id: usize,
    instance: Box<dyn WorkerInstance>,
}

struct DelayedJob<P, R> {
    ready_at: Instant,
    job: Job<P, R>,
}

/// Everything the dispatcher and the job tasks share.
struct DispatchState<P, R> {
    queue: JobQueue<P, R>,
    /// Retries waiting out their delay, ordered by `ready_at`.
    delayed: VecDeque<DelayedJob<P, R>>,
    throttle: ThrottleTracker,
    idle: VecDeque<Arc<WorkerSlot>>,
    busy: usize,
    closing: bool,
    fatal: Option<String>,
}

impl<P: JobData, R> DispatchState<P, R> {
    fn schedule_retry(&mut self, job: Job<P, R>, ready_at: Instant) {
        let index = self.delayed.partition_point(|d| d.ready_at <= ready_at);
        self.delayed.insert(index, DelayedJob { ready_at, job });
    }

    fn promote_ready(&mut self, now: Instant) {
        while self.delayed.front().is_some_and(|d| d.ready_at <= now) {
            if let Some(delayed) = self.delayed.pop_front() {
                self.queue.requeue(delayed.job);
            }
        }
    }

    fn drain_pending(&mut self) -> Vec<Job<P, R>> {
        let mut jobs = self.queue.drain();
        jobs.extend(self.delayed.drain(..).map(|d| d.job));
        jobs
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    limit: u32,
    delay: Duration,
}

struct Shared<P, R> {
    state: Mutex<DispatchState<P, R>>,
    /// Wakes the dispatcher (single consumer, so a stored permit is enough).
    wake: Notify,
    /// Fired whenever a job finishes or the cluster turns fatal.
    settled: Notify,
    default_task: RwLock<Option<TaskFn<P, R>>>,
    events: broadcast::Sender<ClusterEvent<P, R>>,
    completions: broadcast::Sender<Completion<P>>,
    /// Set once `close()` has torn everything down.
    shut_down: AtomicBool,
    counters: ClusterCounters,
    provider: Arc<dyn ConcurrencyProvider>,
    workers: Vec<Arc<WorkerSlot>>,
    retry: RetryPolicy,
    throttle_policy: ThrottlePolicy,
}

enum Admission {
    Queued,
    Duplicate(String),
}

/// Outcome of one attempt, before retry policy is applied.
struct Attempt<R> {
    result: Result<R, ClusterError>,
    repair: bool,
}

impl<R> Attempt<R> {
    fn failed(error: ClusterError, repair: bool) -> Self {
        Self {
            result: Err(error),
            repair,
        }
    }
}

impl<P: JobData, R: Send + 'static> Shared<P, R> {
    fn submit(&self, mut job: Job<P, R>) -> Result<Admission, ClusterError> {
        if job.task.is_none() && self.default_task.read().is_none() {
            return Err(ClusterError::MissingTask);
        }

        let event = ClusterEvent::Queued {
            job_id: job.id,
            data: job.data.clone(),
            task: job.task.clone(),
        };
        {
            let mut state = self.state.lock();
            if state.closing {
                return Err(ClusterError::Closed);
            }
            if let Some(reason) = &state.fatal {
                return Err(ClusterError::Unrecoverable(reason.clone()));
            }
            if let Err(rejected) = state.queue.push(job) {
                job = rejected;
                let key = job.identity_key().unwrap_or_default();
                debug!(job_id = %job.id, key = %key, "skipping duplicate job");
                return Ok(Admission::Duplicate(key));
            }
            // sent under the lock so event order is queue order
            let _ = self.events.send(event);
        }

        ClusterCounters::bump(&self.counters.submitted);
        self.wake.notify_one();
        Ok(Admission::Queued)
    }

    /// One dispatch pass. Returns `None` when the dispatcher should exit,
    /// otherwise the next deadline worth waking up for.
    fn dispatch(self: &Arc<Self>) -> Option<Option<Instant>> {
        let mut state = self.state.lock();
        if state.closing || state.fatal.is_some() {
            return None;
        }

        let now = Instant::now();
        state.promote_ready(now);
        state.throttle.prune(now);

        let policy = self.throttle_policy;
        let mut next_wake = state.delayed.front().map(|d| d.ready_at);

        let DispatchState {
            queue,
            throttle,
            idle,
            busy,
            ..
        } = &mut *state;

        while let Some(slot) = idle.pop_front() {
            let mut throttled_until: Option<Instant> = None;
            let picked = queue.take_first(|job| {
                let Some(key) = job.throttle_key() else {
                    return Selection::Take;
                };
                match throttle.blocked_until(&key, now) {
                    None => Selection::Take,
                    Some(until) => {
                        throttled_until = Some(throttled_until.map_or(until, |t| t.min(until)));
                        match policy {
                            ThrottlePolicy::Defer => Selection::Skip,
                            ThrottlePolicy::Strict => Selection::Stop,
                        }
                    }
                }
            });
            if let Some(until) = throttled_until {
                next_wake = Some(next_wake.map_or(until, |t| t.min(until)));
            }

            let Some(job) = picked else {
                idle.push_front(slot);
                break;
            };

            let throttle_key = job.throttle_key();
            if let Some(key) = &throttle_key {
                throttle.record(key.clone(), now);
            }
            *busy += 1;

            debug!(
                worker_id = slot.id,
                job_id = %job.id,
                attempt = job.attempts + 1,
                throttle_key = ?throttle_key,
                "dispatching job"
            );
            tokio::spawn(Arc::clone(self).run_job(slot, job));
        }

        Some(next_wake)
    }

    async fn run_job(self: Arc<Self>, slot: Arc<WorkerSlot>, mut job: Job<P, R>) {
        let attempt = self.attempt(&slot, &job).await;

        if let Err(e) = &attempt.result {
            if e.is_fatal() {
                self.mark_fatal(e.fatal_reason());
            }
        }
        if attempt.repair {
            self.repair(&slot).await;
        }

        let data = job.data.clone();
        match attempt.result {
            Ok(value) => {
                ClusterCounters::bump(&self.counters.completed);
                debug!(worker_id = slot.id, job_id = %job.id, "job completed");
                job.respond(Ok(value));
            }
            Err(error) => self.handle_failure(slot.id, job, error),
        }

        let _ = self.completions.send(Completion::Job(data));
        {
            let mut state = self.state.lock();
            state.busy -= 1;
            state.idle.push_back(slot);
        }
        self.wake.notify_one();
        self.settled.notify_waiters();
    }

    async fn attempt(&self, slot: &WorkerSlot, job: &Job<P, R>) -> Attempt<R> {
        let Some(task) = job.task.clone().or_else(|| self.default_task.read().clone()) else {
            return Attempt::failed(ClusterError::MissingTask, false);
        };

        let instance = match slot.instance.job_instance().await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(worker_id = slot.id, job_id = %job.id, error = %e, "unable to get job instance");
                let repair = !e.is_fatal();
                return Attempt::failed(e, repair);
            }
        };

        let resources = instance.resources().clone();
        let page = Arc::clone(&resources.page);
        let ctx = TaskContext {
            page: Arc::clone(&page),
            resources,
            data: job.data.clone(),
            worker_id: slot.id,
        };

        // own task so a panic surfaces as a failed attempt
        let result = match tokio::spawn(task(ctx)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ClusterError::Task(e)),
            Err(join) => Err(ClusterError::Task(anyhow::anyhow!("task panicked: {join}"))),
        };

        // checked before release: releasing closes the page
        let mut repair = result.is_err() && page.is_closed();
        if let Err(e) = instance.close().await {
            warn!(worker_id = slot.id, job_id = %job.id, error = %e, "unable to release job instance");
            repair = true;
        }

        Attempt { result, repair }
    }

    async fn repair(&self, slot: &WorkerSlot) {
        warn!(worker_id = slot.id, "repairing worker");
        match slot.instance.repair().await {
            Ok(RepairOutcome::Relaunched) => ClusterCounters::bump(&self.counters.repairs),
            Ok(RepairOutcome::Skipped) => debug!(worker_id = slot.id, "fault already repaired"),
            Err(e) if e.is_fatal() => self.mark_fatal(e.fatal_reason()),
            Err(e) => warn!(worker_id = slot.id, error = %e, "repair failed"),
        }
    }

    fn handle_failure(&self, worker_id: usize, mut job: Job<P, R>, error: ClusterError) {
        let retryable = !matches!(error, ClusterError::MissingTask);
        if retryable && job.attempts < self.retry.limit {
            job.attempts += 1;
            let mut state = self.state.lock();
            if !state.closing && state.fatal.is_none() {
                warn!(
                    worker_id,
                    job_id = %job.id,
                    attempt = job.attempts,
                    error = %error,
                    "job failed, retrying"
                );
                ClusterCounters::bump(&self.counters.retried);
                if self.retry.delay.is_zero() {
                    state.queue.requeue(job);
                } else {
                    state.schedule_retry(job, Instant::now() + self.retry.delay);
                }
                return;
            }
        } else {
            job.attempts += 1;
        }

        ClusterCounters::bump(&self.counters.failed);
        warn!(worker_id, job_id = %job.id, attempts = job.attempts, error = %error, "job failed");
        self.deliver_error(job, error);
    }

    /// Final error: to the awaiting caller, or as a `TaskError` event.
    fn deliver_error(&self, mut job: Job<P, R>, error: ClusterError) {
        if let Some(Err(error)) = job.respond(Err(error)) {
            let _ = self.events.send(ClusterEvent::TaskError {
                job_id: job.id,
                error: Arc::new(error),
                data: job.data,
                attempts: job.attempts,
            });
        }
    }

    fn mark_fatal(&self, reason: String) {
        let pending = {
            let mut state = self.state.lock();
            if state.fatal.is_some() {
                return;
            }
            error!(reason = %reason, "cluster cannot run further jobs");
            state.fatal = Some(reason.clone());
            state.drain_pending()
        };

        for job in pending {
            self.deliver_error(job, ClusterError::Unrecoverable(reason.clone()));
        }
        self.wake.notify_one();
        self.settled.notify_waiters();
    }

    fn stats(&self) -> ClusterStats {
        let state = self.state.lock();
        self.counters
            .snapshot(self.workers.len(), state.busy, state.queue.size(), state.delayed.len())
    }
}

async fn dispatch_loop<P: JobData, R: Send + 'static>(shared: Arc<Shared<P, R>>) {
    debug!("dispatcher started");
    loop {
        let Some(deadline) = shared.dispatch() else {
            break;
        };
        match deadline {
            Some(at) => {
                tokio::select! {
                    () = shared.wake.notified() => {}
                    () = sleep_until(at) => {}
                }
            }
            None => shared.wake.notified().await,
        }
    }
    debug!("dispatcher stopped");
}

async fn monitor_loop<P: JobData, R: Send + 'static>(shared: Weak<Shared<P, R>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.state.lock().closing {
            break;
        }
        info!(stats = %shared.stats(), "cluster status");
    }
}

/// A pool of browser workers executing queued jobs.
///
/// `P` is the payload type, `R` what task functions return.
pub struct Cluster<P: JobData, R: Send + 'static> {
    shared: Arc<Shared<P, R>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<P: JobData, R: Send + 'static> Cluster<P, R> {
    /// Launch a cluster using the built-in provider named by the config.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Config`] for invalid options, or whatever the provider
    /// reports while launching browsers.
    pub async fn launch(config: ClusterConfig, engine: Arc<dyn BrowserEngine>) -> Result<Self, ClusterError> {
        let concurrency = Concurrency::from(config.concurrency);
        Self::launch_with(config, concurrency, engine).await
    }

    /// Launch a cluster with an explicit provider, including custom ones.
    ///
    /// # Errors
    ///
    /// Same as [`launch`](Self::launch).
    pub async fn launch_with(
        config: ClusterConfig,
        concurrency: Concurrency,
        engine: Arc<dyn BrowserEngine>,
    ) -> Result<Self, ClusterError> {
        config.validate().map_err(ClusterError::Config)?;

        let settings = ProviderSettings {
            engine,
            launch: config.launch.clone(),
            context: config.context.clone(),
            timeout: config.resource_timeout(),
        };
        let provider = concurrency.build(settings);
        provider.init().await?;

        let mut workers = Vec::with_capacity(config.max_concurrency);
        for id in 0..config.max_concurrency {
            let per_worker = config.per_worker_options.as_ref().and_then(|all| all.get(id));
            match provider.worker_instance(per_worker).await {
                Ok(instance) => workers.push(Arc::new(WorkerSlot { id, instance })),
                Err(e) => {
                    error!(worker_id = id, error = %e, "unable to create worker");
                    for slot in &workers {
                        let _ = slot.instance.close().await;
                    }
                    let _ = provider.close().await;
                    return Err(e);
                }
            }
        }

        let (events, _) = broadcast::channel(config.event_capacity);
        let (completions, _) = broadcast::channel(config.event_capacity);

        let shared = Arc::new(Shared {
            state: Mutex::new(DispatchState {
                queue: JobQueue::new(config.skip_duplicate_jobs),
                delayed: VecDeque::new(),
                throttle: ThrottleTracker::new(config.same_domain_delay()),
                idle: workers.iter().cloned().collect(),
                busy: 0,
                closing: false,
                fatal: None,
            }),
            wake: Notify::new(),
            settled: Notify::new(),
            default_task: RwLock::new(None),
            events,
            completions,
            shut_down: AtomicBool::new(false),
            counters: ClusterCounters::default(),
            provider,
            workers,
            retry: RetryPolicy {
                limit: config.retry_limit,
                delay: config.retry_delay(),
            },
            throttle_policy: config.throttle_policy,
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&shared)));
        let monitor = config
            .monitor
            .then(|| tokio::spawn(monitor_loop(Arc::downgrade(&shared), config.monitor_interval())));

        info!(
            workers = config.max_concurrency,
            concurrency = ?concurrency,
            retry_limit = config.retry_limit,
            same_domain_delay_ms = config.same_domain_delay_ms,
            "cluster launched"
        );

        Ok(Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
            monitor: Mutex::new(monitor),
        })
    }

    /// Set the default task function.
    pub fn task<F, Fut>(&self, f: F)
    where
        F: Fn(TaskContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<R>> + Send + 'static,
    {
        self.set_task(task_fn(f));
    }

    /// Set the default task function from an existing [`TaskFn`].
    pub fn set_task(&self, task: TaskFn<P, R>) {
        *self.shared.default_task.write() = Some(task);
    }

    /// Queue `data` for the default task. Returns `false` if the job was
    /// skipped as a duplicate.
    ///
    /// # Errors
    ///
    /// [`ClusterError::MissingTask`] if no default task is set, or
    /// [`ClusterError::Closed`] / [`ClusterError::Unrecoverable`] once the
    /// cluster stopped accepting jobs.
    pub fn queue(&self, data: P) -> Result<bool, ClusterError> {
        self.enqueue(Job::new(Some(data), None))
    }

    /// Queue a job with its own task function; `data` may be absent.
    ///
    /// # Errors
    ///
    /// Same as [`queue`](Self::queue), minus the missing-task case.
    pub fn queue_task(&self, data: Option<P>, task: TaskFn<P, R>) -> Result<bool, ClusterError> {
        self.enqueue(Job::new(data, Some(task)))
    }

    fn enqueue(&self, job: Job<P, R>) -> Result<bool, ClusterError> {
        match self.shared.submit(job)? {
            Admission::Queued => Ok(true),
            Admission::Duplicate(_) => Ok(false),
        }
    }

    /// Queue `data` for the default task and await its result.
    ///
    /// The job is queued when this is called, not when the future is first
    /// polled. Task errors reach only the caller; no `TaskError` event fires.
    pub fn execute(&self, data: P) -> impl Future<Output = Result<R, ClusterError>> + Send + 'static {
        self.submit_awaited(Job::new(Some(data), None))
    }

    /// Like [`execute`](Self::execute) with a per-job task function.
    pub fn execute_task(
        &self,
        data: Option<P>,
        task: TaskFn<P, R>,
    ) -> impl Future<Output = Result<R, ClusterError>> + Send + 'static {
        self.submit_awaited(Job::new(data, Some(task)))
    }

    fn submit_awaited(&self, job: Job<P, R>) -> impl Future<Output = Result<R, ClusterError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let submitted = match self.shared.submit(job.with_responder(tx)) {
            Ok(Admission::Queued) => Ok(rx),
            Ok(Admission::Duplicate(key)) => Err(ClusterError::Duplicate(key)),
            Err(e) => Err(e),
        };

        async move {
            match submitted {
                Ok(rx) => rx.await.unwrap_or(Err(ClusterError::Dropped)),
                Err(e) => Err(e),
            }
        }
    }

    /// Resolve with the payload of the next job attempt to finish.
    ///
    /// Subscribes when called, so only attempts finishing after this call
    /// count. Fails with [`ClusterError::Closed`] once the cluster is closed.
    pub fn wait_for_one(&self) -> impl Future<Output = Result<Option<P>, ClusterError>> + Send + 'static {
        let mut rx = self.shared.completions.subscribe();
        let shut_down = self.shared.shut_down.load(Ordering::SeqCst);
        async move {
            if shut_down {
                return Err(ClusterError::Closed);
            }
            loop {
                match rx.recv().await {
                    Ok(Completion::Job(data)) => return Ok(data),
                    Ok(Completion::Shutdown) | Err(RecvError::Closed) => return Err(ClusterError::Closed),
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "completion receiver lagged");
                    }
                }
            }
        }
    }

    /// Wait until nothing is queued, delayed or running.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Unrecoverable`] if the cluster can no longer run jobs.
    pub async fn idle(&self) -> Result<(), ClusterError> {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.shared.state.lock();
                if let Some(reason) = &state.fatal {
                    return Err(ClusterError::Unrecoverable(reason.clone()));
                }
                if state.queue.is_empty() && state.delayed.is_empty() && state.busy == 0 {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, let running jobs finish, then tear down every
    /// worker and the provider. Queued and delayed jobs are discarded; their
    /// `execute` callers get [`ClusterError::Closed`].
    ///
    /// # Errors
    ///
    /// [`ClusterError::Unrecoverable`] if the cluster had turned fatal.
    pub async fn close(&self) -> Result<(), ClusterError> {
        let first = {
            let mut state = self.shared.state.lock();
            let first = !state.closing;
            state.closing = true;
            first
        };
        self.shared.wake.notify_one();

        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.state.lock().busy == 0 {
                break;
            }
            notified.await;
        }

        if first {
            let pending = self.shared.state.lock().drain_pending();
            if !pending.is_empty() {
                debug!(discarded = pending.len(), "discarding pending jobs");
            }
            for mut job in pending {
                job.respond(Err(ClusterError::Closed));
            }

            for slot in &self.shared.workers {
                if let Err(e) = slot.instance.close().await {
                    debug!(worker_id = slot.id, error = %e, "unable to close worker");
                }
            }
            if let Err(e) = self.shared.provider.close().await {
                debug!(error = %e, "unable to close provider");
            }

            self.shared.shut_down.store(true, Ordering::SeqCst);
            let _ = self.shared.completions.send(Completion::Shutdown);
            if let Some(handle) = self.dispatcher.lock().take() {
                handle.abort();
            }
            if let Some(handle) = self.monitor.lock().take() {
                handle.abort();
            }
            info!(stats = %self.shared.stats(), "cluster closed");
        }

        let fatal = self.shared.state.lock().fatal.clone();
        fatal.map_or(Ok(()), |reason| Err(ClusterError::Unrecoverable(reason)))
    }

    /// Receive `Queued` and `TaskError` events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent<P, R>> {
        self.shared.events.subscribe()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ClusterStats {
        self.shared.stats()
    }

    /// Number of worker slots.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.shared.workers.len()
    }
}

impl<P: JobData, R: Send + 'static> Drop for Cluster<P, R> {
    fn drop(&mut self) {
        // browsers are left to the engine; only close() tears them down
        self.shared.state.lock().closing = true;
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}

//! Shared-browser providers.
//!
//! All workers draw their resources from one browser process. What a job gets
//! out of that process is decided by a [`ResourceStrategy`]; the provider
//! itself only owns the process and its repair protocol:
//!
//! * a repair never runs while any job instance is open; the repairer waits
//!   for the count to drop to zero,
//! * no instance is handed out while a repair is pending or running,
//! * concurrent repair requests for the same fault collapse into one relaunch,
//! * a failed relaunch marks the provider broken and every later call fails
//!   with [`ClusterError::Unrecoverable`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::{
    with_timeout, ConcurrencyProvider, JobInstance, ProviderSettings, RepairOutcome, ResourceData, WorkerInstance,
};
use crate::core::ClusterError;
use crate::engine::{Browser, LaunchOptions};

/// How jobs carve their resources out of the shared browser.
#[async_trait]
pub trait ResourceStrategy: Send + Sync + 'static {
    /// Called after every (re)launch, before any job sees the browser.
    async fn on_launch(&self, _browser: &Arc<dyn Browser>) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Provision resources for one job.
    async fn create_resources(&self, browser: &Arc<dyn Browser>) -> Result<ResourceData, ClusterError>;

    /// Tear down what [`create_resources`](Self::create_resources) returned.
    async fn free_resources(&self, resources: ResourceData) -> Result<(), ClusterError>;
}

#[derive(Debug, Default)]
struct RepairState {
    repairing: bool,
    requested: bool,
    open_instances: usize,
    generation: u64,
    broken: Option<String>,
}

struct SharedBrowser<S> {
    settings: ProviderSettings,
    strategy: S,
    browser: Mutex<Option<Arc<dyn Browser>>>,
    state: Mutex<RepairState>,
    changed: Notify,
}

/// Provider sharing one browser between all workers.
pub struct SingleBrowserConcurrency<S: ResourceStrategy> {
    shared: Arc<SharedBrowser<S>>,
}

impl<S: ResourceStrategy> SingleBrowserConcurrency<S> {
    /// Create the provider; the browser is launched by `init`.
    pub fn new(settings: ProviderSettings, strategy: S) -> Self {
        Self {
            shared: Arc::new(SharedBrowser {
                settings,
                strategy,
                browser: Mutex::new(None),
                state: Mutex::new(RepairState::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Number of job instances currently open.
    #[must_use]
    pub fn open_instances(&self) -> usize {
        self.shared.state.lock().open_instances
    }
}

impl<S: ResourceStrategy> SharedBrowser<S> {
    fn current(&self) -> Result<Arc<dyn Browser>, ClusterError> {
        self.browser.lock().clone().ok_or(ClusterError::Closed)
    }

    async fn launch(&self) -> Result<Arc<dyn Browser>, ClusterError> {
        let browser = self.settings.engine.launch(&self.settings.launch).await?;
        if let Err(e) = self.strategy.on_launch(&browser).await {
            if let Err(close_err) = browser.close().await {
                debug!(error = %close_err, "unable to close browser after failed setup");
            }
            return Err(e);
        }
        Ok(browser)
    }

    /// Reserve an instance slot, waiting out any pending repair first.
    /// Returns the generation the slot belongs to.
    async fn reserve(&self) -> Result<u64, ClusterError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(reason) = &state.broken {
                    return Err(ClusterError::Unrecoverable(reason.clone()));
                }
                if !state.repairing && !state.requested {
                    state.open_instances += 1;
                    return Ok(state.generation);
                }
            }
            // the requester performs the relaunch; we only wait for it
            notified.await;
        }
    }

    /// Provision one job's resources. `seen` is updated with the browser
    /// generation before provisioning starts, so a failure here still lets
    /// the worker request a repair of that browser.
    async fn job_instance(self: &Arc<Self>, seen: &AtomicU64) -> Result<JobInstance, ClusterError> {
        let generation = self.reserve().await?;
        seen.store(generation, Ordering::SeqCst);

        let created = match self.current() {
            Ok(browser) => {
                with_timeout(
                    "create resources",
                    self.settings.timeout,
                    self.strategy.create_resources(&browser),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match created {
            Ok(resources) => {
                let shared = Arc::clone(self);
                let instance = JobInstance::new(resources, move |resources: ResourceData| async move {
                    shared.release(resources).await
                });
                Ok(instance)
            }
            Err(e) => {
                self.state.lock().open_instances -= 1;
                self.changed.notify_waiters();
                Err(e)
            }
        }
    }

    async fn release(&self, resources: ResourceData) -> Result<(), ClusterError> {
        let result = with_timeout(
            "free resources",
            self.settings.timeout,
            self.strategy.free_resources(resources),
        )
        .await;

        {
            let mut state = self.state.lock();
            state.open_instances = state.open_instances.saturating_sub(1);
        }
        self.changed.notify_waiters();
        result
    }

    /// Ask for a repair of the browser the caller observed at `seen`.
    async fn request_repair(&self, seen: u64) -> Result<RepairOutcome, ClusterError> {
        {
            let mut state = self.state.lock();
            if let Some(reason) = &state.broken {
                return Err(ClusterError::Unrecoverable(reason.clone()));
            }
            if state.generation != seen {
                debug!(seen, current = state.generation, "browser already replaced");
                return Ok(RepairOutcome::Skipped);
            }
            if !state.repairing {
                state.requested = true;
            }
        }
        self.repair().await
    }

    async fn repair(&self) -> Result<RepairOutcome, ClusterError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(reason) = &state.broken {
                    return Err(ClusterError::Unrecoverable(reason.clone()));
                }
                if !state.repairing && !state.requested {
                    return Ok(RepairOutcome::Skipped);
                }
                if !state.repairing && state.open_instances == 0 {
                    state.repairing = true;
                    state.requested = false;
                    break;
                }
                debug!(
                    open_instances = state.open_instances,
                    repairing = state.repairing,
                    "waiting to repair"
                );
            }
            notified.await;
        }

        info!("restarting shared browser");
        let result = self.relaunch().await;
        {
            let mut state = self.state.lock();
            state.repairing = false;
            match &result {
                Ok(()) => state.generation += 1,
                Err(e) => state.broken = Some(e.fatal_reason()),
            }
        }
        self.changed.notify_waiters();
        result.map(|()| RepairOutcome::Relaunched)
    }

    async fn relaunch(&self) -> Result<(), ClusterError> {
        let old = self.browser.lock().take();
        if let Some(old) = old {
            let closed = with_timeout("close browser", self.settings.timeout, async {
                old.close().await.map_err(ClusterError::from)
            })
            .await;
            if let Err(e) = closed {
                debug!(error = %e, "unable to close browser");
            }
        }

        match self.launch().await {
            Ok(browser) => {
                *self.browser.lock() = Some(browser);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "unable to restart browser");
                Err(ClusterError::Unrecoverable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl<S: ResourceStrategy> ConcurrencyProvider for SingleBrowserConcurrency<S> {
    async fn init(&self) -> Result<(), ClusterError> {
        let browser = self.shared.launch().await?;
        *self.shared.browser.lock() = Some(browser);
        debug!("launched shared browser");
        Ok(())
    }

    async fn close(&self) -> Result<(), ClusterError> {
        let browser = self.shared.browser.lock().take();
        match browser {
            Some(browser) => browser.close().await.map_err(ClusterError::from),
            None => Ok(()),
        }
    }

    async fn worker_instance(
        &self,
        per_worker: Option<&LaunchOptions>,
    ) -> Result<Box<dyn WorkerInstance>, ClusterError> {
        if per_worker.is_some() {
            warn!("per-worker launch options are ignored by shared-browser providers");
        }
        let seen = self.shared.state.lock().generation;
        Ok(Box::new(SharedWorker {
            shared: Arc::clone(&self.shared),
            seen: AtomicU64::new(seen),
        }))
    }
}

struct SharedWorker<S> {
    shared: Arc<SharedBrowser<S>>,
    // generation of the browser this worker last provisioned against
    seen: AtomicU64,
}

#[async_trait]
impl<S: ResourceStrategy> WorkerInstance for SharedWorker<S> {
    async fn job_instance(&self) -> Result<JobInstance, ClusterError> {
        self.shared.job_instance(&self.seen).await
    }

    async fn repair(&self) -> Result<RepairOutcome, ClusterError> {
        self.shared.request_repair(self.seen.load(Ordering::SeqCst)).await
    }

    async fn close(&self) -> Result<(), ClusterError> {
        Ok(())
    }
}

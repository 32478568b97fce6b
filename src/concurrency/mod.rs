//! Resource providers: how browsers, contexts and pages are shared between jobs.
//!
//! A [`ConcurrencyProvider`] creates one [`WorkerInstance`] per cluster worker.
//! Each worker instance mints a [`JobInstance`] for every job it runs and can be
//! asked to repair itself after a fault.
//!
//! Built-in granularities, differing only in what jobs on the same worker share:
//!
//! | model     | browser            | context         | page    |
//! |-----------|--------------------|-----------------|---------|
//! | `Browser` | one per worker     | one per job     | per job |
//! | `Context` | one for all workers| one per job     | per job |
//! | `Page`    | one for all workers| one for all jobs| per job |
//!
//! Any other strategy can be plugged in with [`Concurrency::Custom`].

pub mod browser;
pub mod context;
pub mod page;
pub mod single_browser;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::ConcurrencyModel;
use crate::core::ClusterError;
use crate::engine::{BrowserContext, BrowserEngine, ContextOptions, LaunchOptions, Page};

pub use browser::BrowserConcurrency;
pub use context::{ContextConcurrency, ContextStrategy};
pub use page::{PageConcurrency, PageStrategy};
pub use single_browser::{ResourceStrategy, SingleBrowserConcurrency};

/// Default budget for creating or releasing a job's resources.
pub const RESOURCE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Resource handles handed to a task function.
#[derive(Clone)]
pub struct ResourceData {
    /// The page the job works against.
    pub page: Arc<dyn Page>,
    /// The context the page lives in.
    pub context: Arc<dyn BrowserContext>,
    /// Provider-specific extras.
    pub extras: Map<String, Value>,
}

impl ResourceData {
    /// Bundle a page with its context.
    #[must_use]
    pub fn new(page: Arc<dyn Page>, context: Arc<dyn BrowserContext>) -> Self {
        Self {
            page,
            context,
            extras: Map::new(),
        }
    }

    /// Attach a provider-specific value.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Look up a provider-specific value.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}

impl fmt::Debug for ResourceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceData")
            .field("page_url", &self.page.url())
            .field("extras", &self.extras)
            .finish_non_exhaustive()
    }
}

/// Teardown of one job's resources.
///
/// Implemented for any `FnOnce(ResourceData) -> impl Future` so providers can
/// pass a closure.
#[async_trait]
pub trait JobRelease: Send {
    /// Release the resources; called exactly once.
    async fn release(self: Box<Self>, resources: ResourceData) -> Result<(), ClusterError>;
}

#[async_trait]
impl<F, Fut> JobRelease for F
where
    F: FnOnce(ResourceData) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
{
    async fn release(self: Box<Self>, resources: ResourceData) -> Result<(), ClusterError> {
        (self)(resources).await
    }
}

/// Resources provisioned for exactly one job.
///
/// [`close`](Self::close) consumes the instance, so the handle cannot be
/// reached through it once release has started.
pub struct JobInstance {
    resources: ResourceData,
    release: Box<dyn JobRelease>,
}

impl JobInstance {
    /// Pair resources with their teardown.
    pub fn new(resources: ResourceData, release: impl JobRelease + 'static) -> Self {
        Self {
            resources,
            release: Box::new(release),
        }
    }

    /// Borrow the resources.
    #[must_use]
    pub const fn resources(&self) -> &ResourceData {
        &self.resources
    }

    /// Release the resources.
    ///
    /// # Errors
    ///
    /// Whatever the provider's teardown reports, typically a timeout or a
    /// disconnected browser.
    pub async fn close(self) -> Result<(), ClusterError> {
        self.release.release(self.resources).await
    }
}

/// What a call to [`WorkerInstance::repair`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// This call replaced the faulty resources.
    Relaunched,
    /// Nothing to replace, usually because another worker already did.
    Skipped,
}

/// One worker's view of a provider; never shared across worker slots.
#[async_trait]
pub trait WorkerInstance: Send + Sync {
    /// Provision fresh resources for one job.
    async fn job_instance(&self) -> Result<JobInstance, ClusterError>;

    /// Recover after a fault. Idempotent: a repair of a fault that was
    /// already handled reports [`RepairOutcome::Skipped`].
    async fn repair(&self) -> Result<RepairOutcome, ClusterError>;

    /// Tear the worker down at cluster shutdown.
    async fn close(&self) -> Result<(), ClusterError>;
}

/// Creates worker instances and owns any long-lived shared handle.
#[async_trait]
pub trait ConcurrencyProvider: Send + Sync + 'static {
    /// Acquire long-lived resources (e.g. launch a shared browser).
    async fn init(&self) -> Result<(), ClusterError>;

    /// Release long-lived resources. Best effort.
    async fn close(&self) -> Result<(), ClusterError>;

    /// Create the worker instance for one slot. `per_worker` carries that
    /// slot's entry of the per-worker options list, if one was configured.
    async fn worker_instance(
        &self,
        per_worker: Option<&LaunchOptions>,
    ) -> Result<Box<dyn WorkerInstance>, ClusterError>;
}

/// Everything a provider needs to talk to the engine.
#[derive(Clone)]
pub struct ProviderSettings {
    /// Engine used to launch browsers.
    pub engine: Arc<dyn BrowserEngine>,
    /// Cluster-wide launch options.
    pub launch: LaunchOptions,
    /// Options for every context the provider opens.
    pub context: ContextOptions,
    /// Budget for resource creation and release.
    pub timeout: Duration,
}

impl ProviderSettings {
    /// Settings with default options and the default timeout.
    #[must_use]
    pub fn new(engine: Arc<dyn BrowserEngine>) -> Self {
        Self {
            engine,
            launch: LaunchOptions::default(),
            context: ContextOptions::default(),
            timeout: RESOURCE_TIMEOUT,
        }
    }
}

/// Builds a custom provider from the cluster's settings.
pub type ProviderFactory = Arc<dyn Fn(ProviderSettings) -> Arc<dyn ConcurrencyProvider> + Send + Sync>;

/// Provider selection.
#[derive(Clone)]
pub enum Concurrency {
    /// Browser per worker, context per job.
    Browser,
    /// Shared browser, context per job.
    Context,
    /// Shared browser and context, page per job.
    Page,
    /// User-supplied provider.
    Custom(ProviderFactory),
}

impl Concurrency {
    /// Wrap a factory closure.
    pub fn custom<F, C>(factory: F) -> Self
    where
        F: Fn(ProviderSettings) -> C + Send + Sync + 'static,
        C: ConcurrencyProvider,
    {
        Self::Custom(Arc::new(move |settings: ProviderSettings| {
            Arc::new(factory(settings)) as Arc<dyn ConcurrencyProvider>
        }))
    }

    /// Instantiate the provider.
    #[must_use]
    pub fn build(&self, settings: ProviderSettings) -> Arc<dyn ConcurrencyProvider> {
        match self {
            Self::Browser => Arc::new(BrowserConcurrency::new(settings)),
            Self::Context => Arc::new(ContextConcurrency::context(settings)),
            Self::Page => Arc::new(PageConcurrency::page(settings)),
            Self::Custom(factory) => factory(settings),
        }
    }
}

impl From<ConcurrencyModel> for Concurrency {
    fn from(model: ConcurrencyModel) -> Self {
        match model {
            ConcurrencyModel::Browser => Self::Browser,
            ConcurrencyModel::Context => Self::Context,
            ConcurrencyModel::Page => Self::Page,
        }
    }
}

impl fmt::Debug for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Browser => f.write_str("Browser"),
            Self::Context => f.write_str("Context"),
            Self::Page => f.write_str("Page"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Run a resource lifecycle operation under `budget`.
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    budget: Duration,
    fut: F,
) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| ClusterError::Timeout {
            operation,
            after: budget,
        })?
}

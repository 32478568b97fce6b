//! Fluent construction of a [`Cluster`].

use std::sync::Arc;
use std::time::Duration;

use crate::concurrency::{Concurrency, ConcurrencyProvider, ProviderSettings};
use crate::config::{ClusterConfig, ThrottlePolicy};
use crate::core::{Cluster, ClusterError, JobData};
use crate::engine::{BrowserEngine, ContextOptions, LaunchOptions};

/// Builder over [`ClusterConfig`] plus a provider choice.
///
/// ```rust,ignore
/// let cluster: Cluster<String, String> = ClusterBuilder::new(engine)
///     .max_concurrency(4)
///     .retry_limit(2)
///     .same_domain_delay(Duration::from_millis(250))
///     .launch()
///     .await?;
/// ```
pub struct ClusterBuilder {
    engine: Arc<dyn BrowserEngine>,
    config: ClusterConfig,
    concurrency: Option<Concurrency>,
}

impl ClusterBuilder {
    /// Start from default options.
    #[must_use]
    pub fn new(engine: Arc<dyn BrowserEngine>) -> Self {
        Self::from_config(engine, ClusterConfig::default())
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(engine: Arc<dyn BrowserEngine>, config: ClusterConfig) -> Self {
        Self {
            engine,
            config,
            concurrency: None,
        }
    }

    /// Number of workers.
    #[must_use]
    pub const fn max_concurrency(mut self, workers: usize) -> Self {
        self.config.max_concurrency = workers;
        self
    }

    /// Provider to use. Overrides the model in the configuration.
    #[must_use]
    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Use a custom provider built from the cluster's settings.
    #[must_use]
    pub fn custom_provider<F, C>(self, factory: F) -> Self
    where
        F: Fn(ProviderSettings) -> C + Send + Sync + 'static,
        C: ConcurrencyProvider,
    {
        self.concurrency(Concurrency::custom(factory))
    }

    /// Extra attempts after a failure.
    #[must_use]
    pub const fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = limit;
        self
    }

    /// Delay before a failed job is queued again.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Minimum gap between dispatches to the same domain.
    #[must_use]
    pub fn same_domain_delay(mut self, delay: Duration) -> Self {
        self.config.same_domain_delay_ms = duration_ms(delay);
        self
    }

    /// What to do when the oldest queued job is throttled.
    #[must_use]
    pub const fn throttle_policy(mut self, policy: ThrottlePolicy) -> Self {
        self.config.throttle_policy = policy;
        self
    }

    /// Skip submissions whose URL is already queued.
    #[must_use]
    pub const fn skip_duplicate_jobs(mut self, skip: bool) -> Self {
        self.config.skip_duplicate_jobs = skip;
        self
    }

    /// Budget for creating and releasing job resources.
    #[must_use]
    pub fn resource_timeout(mut self, timeout: Duration) -> Self {
        self.config.resource_timeout_ms = duration_ms(timeout);
        self
    }

    /// Options for every browser launch.
    #[must_use]
    pub fn launch_options(mut self, options: LaunchOptions) -> Self {
        self.config.launch = options;
        self
    }

    /// Options for every context.
    #[must_use]
    pub fn context_options(mut self, options: ContextOptions) -> Self {
        self.config.context = options;
        self
    }

    /// One launch option set per worker.
    #[must_use]
    pub fn per_worker_options(mut self, options: Vec<LaunchOptions>) -> Self {
        self.config.per_worker_options = Some(options);
        self
    }

    /// Periodically log a stats snapshot.
    #[must_use]
    pub fn monitor(mut self, every: Duration) -> Self {
        self.config.monitor = true;
        self.config.monitor_interval_ms = duration_ms(every);
        self
    }

    /// The configuration built so far.
    #[must_use]
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Launch the cluster.
    ///
    /// # Errors
    ///
    /// See [`Cluster::launch_with`].
    pub async fn launch<P: JobData, R: Send + 'static>(self) -> Result<Cluster<P, R>, ClusterError> {
        let concurrency = self
            .concurrency
            .unwrap_or_else(|| Concurrency::from(self.config.concurrency));
        Cluster::launch_with(self.config, concurrency, self.engine).await
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

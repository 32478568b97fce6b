//! Browser-grained provider: every worker owns a browser process.
//!
//! Jobs on the same worker reuse the process but each gets a fresh context, so
//! cookies and storage never leak between jobs. Nothing else lives in the
//! process, so repair simply relaunches it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::context::open_context_page;
use super::{
    with_timeout, ConcurrencyProvider, JobInstance, ProviderSettings, RepairOutcome, ResourceData, WorkerInstance,
};
use crate::core::ClusterError;
use crate::engine::{Browser, BrowserEngine, ContextOptions, LaunchOptions};

/// Provider launching one browser per worker.
pub struct BrowserConcurrency {
    settings: ProviderSettings,
}

impl BrowserConcurrency {
    /// Create the provider.
    #[must_use]
    pub const fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ConcurrencyProvider for BrowserConcurrency {
    async fn init(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn worker_instance(
        &self,
        per_worker: Option<&LaunchOptions>,
    ) -> Result<Box<dyn WorkerInstance>, ClusterError> {
        let options = per_worker.cloned().unwrap_or_else(|| self.settings.launch.clone());
        let browser = self.settings.engine.launch(&options).await?;
        debug!(args = ?options.args, "launched worker browser");

        Ok(Box::new(BrowserWorker {
            engine: Arc::clone(&self.settings.engine),
            options,
            context_options: self.settings.context.clone(),
            timeout: self.settings.timeout,
            browser: Mutex::new(browser),
        }))
    }
}

struct BrowserWorker {
    engine: Arc<dyn BrowserEngine>,
    options: LaunchOptions,
    context_options: ContextOptions,
    timeout: Duration,
    browser: Mutex<Arc<dyn Browser>>,
}

impl BrowserWorker {
    fn current(&self) -> Arc<dyn Browser> {
        Arc::clone(&self.browser.lock())
    }
}

#[async_trait]
impl WorkerInstance for BrowserWorker {
    async fn job_instance(&self) -> Result<JobInstance, ClusterError> {
        let browser = self.current();
        let resources = with_timeout(
            "create context",
            self.timeout,
            open_context_page(browser.as_ref(), &self.context_options),
        )
        .await?;

        let timeout = self.timeout;
        Ok(JobInstance::new(resources, move |resources: ResourceData| async move {
            with_timeout("close context", timeout, async move {
                resources.context.close().await.map_err(ClusterError::from)
            })
            .await
        }))
    }

    async fn repair(&self) -> Result<RepairOutcome, ClusterError> {
        debug!("starting repair");
        let old = self.current();
        // usually fails: the process is the reason we are here
        let closed = with_timeout("close browser", self.timeout, async {
            old.close().await.map_err(ClusterError::from)
        })
        .await;
        if let Err(e) = closed {
            debug!(error = %e, "unable to close browser");
        }

        let browser = self
            .engine
            .launch(&self.options)
            .await
            .map_err(|e| ClusterError::Unrecoverable(e.to_string()))?;
        *self.browser.lock() = browser;
        debug!("repair finished");
        Ok(RepairOutcome::Relaunched)
    }

    async fn close(&self) -> Result<(), ClusterError> {
        self.current().close().await.map_err(ClusterError::from)
    }
}

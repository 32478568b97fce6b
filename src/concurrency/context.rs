//! Context-grained strategy: a fresh incognito context per job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::single_browser::{ResourceStrategy, SingleBrowserConcurrency};
use super::{ProviderSettings, ResourceData};
use crate::core::ClusterError;
use crate::engine::{Browser, ContextOptions};

/// Open a context and one page in it. The context is closed again if the
/// page cannot be opened.
pub(crate) async fn open_context_page(
    browser: &dyn Browser,
    options: &ContextOptions,
) -> Result<ResourceData, ClusterError> {
    let context = browser.new_context(options).await?;
    match context.new_page().await {
        Ok(page) => Ok(ResourceData::new(page, context)),
        Err(e) => {
            if let Err(close_err) = context.close().await {
                debug!(error = %close_err, "unable to close context after failed page");
            }
            Err(e.into())
        }
    }
}

/// Every job gets its own context; nothing is shared between jobs.
#[derive(Debug, Clone, Default)]
pub struct ContextStrategy {
    options: ContextOptions,
}

impl ContextStrategy {
    /// Strategy opening contexts with `options`.
    #[must_use]
    pub const fn new(options: ContextOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ResourceStrategy for ContextStrategy {
    async fn create_resources(&self, browser: &Arc<dyn Browser>) -> Result<ResourceData, ClusterError> {
        open_context_page(browser.as_ref(), &self.options).await
    }

    async fn free_resources(&self, resources: ResourceData) -> Result<(), ClusterError> {
        resources.context.close().await?;
        Ok(())
    }
}

/// Shared browser, one context per job.
pub type ContextConcurrency = SingleBrowserConcurrency<ContextStrategy>;

impl SingleBrowserConcurrency<ContextStrategy> {
    /// Context-grained provider using the settings' context options.
    #[must_use]
    pub fn context(settings: ProviderSettings) -> Self {
        let strategy = ContextStrategy::new(settings.context.clone());
        Self::new(settings, strategy)
    }
}

//! Page-grained strategy: one context shared by every job, a page per job.
//!
//! Cookies and storage set by one job are visible to all later jobs. The
//! shared context is recreated whenever the browser is (re)launched.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::single_browser::{ResourceStrategy, SingleBrowserConcurrency};
use super::{ProviderSettings, ResourceData};
use crate::core::ClusterError;
use crate::engine::{Browser, BrowserContext, ContextOptions};

/// Shares one context between all jobs.
#[derive(Default)]
pub struct PageStrategy {
    options: ContextOptions,
    context: Mutex<Option<Arc<dyn BrowserContext>>>,
}

impl PageStrategy {
    /// Strategy whose shared context is opened with `options`.
    #[must_use]
    pub fn new(options: ContextOptions) -> Self {
        Self {
            options,
            context: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ResourceStrategy for PageStrategy {
    async fn on_launch(&self, browser: &Arc<dyn Browser>) -> Result<(), ClusterError> {
        let context = browser.new_context(&self.options).await?;
        *self.context.lock() = Some(context);
        Ok(())
    }

    async fn create_resources(&self, _browser: &Arc<dyn Browser>) -> Result<ResourceData, ClusterError> {
        let context = self.context.lock().clone().ok_or(ClusterError::Closed)?;
        let page = context.new_page().await?;
        Ok(ResourceData::new(page, context))
    }

    async fn free_resources(&self, resources: ResourceData) -> Result<(), ClusterError> {
        resources.page.close().await?;
        Ok(())
    }
}

/// Shared browser and context, one page per job.
pub type PageConcurrency = SingleBrowserConcurrency<PageStrategy>;

impl SingleBrowserConcurrency<PageStrategy> {
    /// Page-grained provider using the settings' context options.
    #[must_use]
    pub fn page(settings: ProviderSettings) -> Self {
        let strategy = PageStrategy::new(settings.context.clone());
        Self::new(settings, strategy)
    }
}

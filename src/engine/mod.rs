//! Automation-engine seam.
//!
//! The cluster never drives a browser itself. Everything it needs from the
//! engine (launch a browser, open an isolated context, open a page, tear them
//! down) goes through the object-safe traits below, so a real CDP/WebDriver
//! binding and the bundled [`InMemoryEngine`](crate::infra::InMemoryEngine)
//! are interchangeable.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::EngineError;

/// Options passed to [`BrowserEngine::launch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Run without a visible window.
    pub headless: bool,
    /// Extra command line arguments for the browser process.
    pub args: Vec<String>,
    /// Explicit browser binary; engine default when absent.
    pub executable_path: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
            executable_path: None,
        }
    }
}

impl LaunchOptions {
    /// Append a command line argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Options for a new browser context (the cookie/storage isolation unit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// User agent override.
    pub user_agent: Option<String>,
    /// Accept invalid TLS certificates.
    pub ignore_https_errors: bool,
    /// Headers sent with every request from this context.
    pub extra_http_headers: BTreeMap<String, String>,
}

/// A cookie stored in a browser context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// URL the cookie is scoped to.
    pub url: String,
}

impl Cookie {
    /// Build a cookie.
    pub fn new(name: impl Into<String>, value: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            url: url.into(),
        }
    }
}

/// Entry point of an automation engine.
#[async_trait]
pub trait BrowserEngine: Send + Sync + 'static {
    /// Start a browser process.
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>, EngineError>;
}

/// A running browser process.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh, isolated context.
    async fn new_context(
        &self,
        options: &ContextOptions,
    ) -> Result<Arc<dyn BrowserContext>, EngineError>;

    /// Terminate the process. Fails if it is already gone.
    async fn close(&self) -> Result<(), EngineError>;

    /// Whether the process is still reachable.
    fn is_connected(&self) -> bool;
}

/// An isolated session inside a browser.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Open a page in this context.
    async fn new_page(&self) -> Result<Arc<dyn Page>, EngineError>;

    /// Cookies currently stored in this context.
    async fn cookies(&self) -> Result<Vec<Cookie>, EngineError>;

    /// Store cookies in this context.
    async fn add_cookies(&self, cookies: Vec<Cookie>) -> Result<(), EngineError>;

    /// Close the context and every page in it.
    async fn close(&self) -> Result<(), EngineError>;
}

/// A single tab; the resource handle task functions work against.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to `url`.
    async fn goto(&self, url: &str) -> Result<(), EngineError>;

    /// Current URL (`about:blank` for a fresh page).
    fn url(&self) -> String;

    /// Close the page.
    async fn close(&self) -> Result<(), EngineError>;

    /// Whether the page, or the browser behind it, is gone.
    fn is_closed(&self) -> bool;

    /// Downcast hook for engine-specific page types.
    fn as_any(&self) -> &dyn Any;
}

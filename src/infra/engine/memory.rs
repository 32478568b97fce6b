//! In-memory automation engine for development and testing.
//!
//! Browsers, contexts and pages are plain structs; nothing is rendered and
//! navigation only records the URL. What the engine does model faithfully is
//! the lifecycle the cluster cares about: per-context cookie jars, open page
//! accounting and browser crashes.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::EngineError;
use crate::engine::{Browser, BrowserContext, BrowserEngine, ContextOptions, Cookie, LaunchOptions, Page};

#[derive(Default)]
struct EngineState {
    next_id: AtomicU64,
    launches: AtomicUsize,
    pending_launch_failures: AtomicUsize,
    pending_context_failures: AtomicUsize,
    open_pages: AtomicUsize,
    peak_open_pages: AtomicUsize,
    page_delay: Mutex<Option<Duration>>,
    /// Connection flags of every browser ever launched.
    browsers: Mutex<Vec<Arc<AtomicBool>>>,
    launch_log: Mutex<Vec<LaunchOptions>>,
}

impl EngineState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn page_opened(&self) {
        let open = self.open_pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open_pages.fetch_max(open, Ordering::SeqCst);
    }

    fn page_closed(&self) {
        self.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Consume one pending injected failure, if any.
fn take_one(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn disconnected() -> EngineError {
    EngineError::Closed("browser has disconnected".into())
}

/// Simulated engine with fault injection.
///
/// Clones share state, so a test can keep one handle for assertions and give
/// another to the cluster.
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<EngineState>,
}

impl InMemoryEngine {
    /// Create an engine with no browsers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful launches so far.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Browsers that are launched and still connected.
    #[must_use]
    pub fn live_browsers(&self) -> usize {
        self.state
            .browsers
            .lock()
            .iter()
            .filter(|c| c.load(Ordering::SeqCst))
            .count()
    }

    /// Pages opened and not yet closed.
    #[must_use]
    pub fn open_pages(&self) -> usize {
        self.state.open_pages.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open pages observed.
    #[must_use]
    pub fn peak_open_pages(&self) -> usize {
        self.state.peak_open_pages.load(Ordering::SeqCst)
    }

    /// Disconnect every live browser, as if the processes died.
    pub fn crash(&self) {
        for connected in self.state.browsers.lock().iter() {
            connected.store(false, Ordering::SeqCst);
        }
    }

    /// Make the next `n` launches fail.
    pub fn fail_next_launches(&self, n: usize) {
        self.state.pending_launch_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` context creations fail, on any browser.
    pub fn fail_next_contexts(&self, n: usize) {
        self.state.pending_context_failures.store(n, Ordering::SeqCst);
    }

    /// Delay every page creation, or clear the delay with `None`.
    pub fn set_page_delay(&self, delay: Option<Duration>) {
        *self.state.page_delay.lock() = delay;
    }

    /// Options of every successful launch, in order.
    #[must_use]
    pub fn launch_log(&self) -> Vec<LaunchOptions> {
        self.state.launch_log.lock().clone()
    }
}

#[async_trait]
impl BrowserEngine for InMemoryEngine {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>, EngineError> {
        if take_one(&self.state.pending_launch_failures) {
            return Err(EngineError::Launch("simulated launch failure".into()));
        }

        let connected = Arc::new(AtomicBool::new(true));
        self.state.browsers.lock().push(Arc::clone(&connected));
        self.state.launch_log.lock().push(options.clone());
        self.state.launches.fetch_add(1, Ordering::SeqCst);

        let browser = MemoryBrowser {
            id: self.state.next_id(),
            connected,
            state: Arc::clone(&self.state),
        };
        tracing::trace!(browser_id = browser.id, "in-memory browser launched");
        Ok(Arc::new(browser))
    }
}

/// Browser handle of the [`InMemoryEngine`].
pub struct MemoryBrowser {
    id: u64,
    connected: Arc<AtomicBool>,
    state: Arc<EngineState>,
}

impl MemoryBrowser {
    /// Engine-unique browser id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Browser for MemoryBrowser {
    async fn new_context(
        &self,
        _options: &ContextOptions,
    ) -> Result<Arc<dyn BrowserContext>, EngineError> {
        if !self.is_connected() {
            return Err(disconnected());
        }
        if take_one(&self.state.pending_context_failures) {
            return Err(EngineError::Protocol("simulated context failure".into()));
        }
        Ok(Arc::new(MemoryContext {
            id: self.state.next_id(),
            browser_id: self.id,
            connected: Arc::clone(&self.connected),
            closed: AtomicBool::new(false),
            cookies: Mutex::new(Vec::new()),
            pages: Mutex::new(Vec::new()),
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(disconnected())
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Context handle of the [`InMemoryEngine`]; owns the cookie jar.
pub struct MemoryContext {
    id: u64,
    browser_id: u64,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    cookies: Mutex<Vec<Cookie>>,
    pages: Mutex<Vec<Arc<MemoryPage>>>,
    state: Arc<EngineState>,
}

impl MemoryContext {
    /// Engine-unique context id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    fn ensure_usable(&self) -> Result<(), EngineError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(disconnected());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed("context has been closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for MemoryContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>, EngineError> {
        self.ensure_usable()?;
        let delay = *self.state.page_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.ensure_usable()?;
        }

        let page = Arc::new(MemoryPage {
            id: self.state.next_id(),
            context_id: self.id,
            browser_id: self.browser_id,
            url: Mutex::new("about:blank".to_string()),
            closed: AtomicBool::new(false),
            connected: Arc::clone(&self.connected),
            state: Arc::clone(&self.state),
        });
        self.state.page_opened();
        self.pages.lock().push(Arc::clone(&page));
        Ok(page)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, EngineError> {
        self.ensure_usable()?;
        Ok(self.cookies.lock().clone())
    }

    async fn add_cookies(&self, cookies: Vec<Cookie>) -> Result<(), EngineError> {
        self.ensure_usable()?;
        let mut jar = self.cookies.lock();
        for cookie in cookies {
            jar.retain(|c| !(c.name == cookie.name && c.url == cookie.url));
            jar.push(cookie);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for page in self.pages.lock().drain(..) {
            page.mark_closed();
        }
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(disconnected())
        }
    }
}

/// Page handle of the [`InMemoryEngine`].
pub struct MemoryPage {
    id: u64,
    context_id: u64,
    browser_id: u64,
    url: Mutex<String>,
    closed: AtomicBool,
    connected: Arc<AtomicBool>,
    state: Arc<EngineState>,
}

impl MemoryPage {
    /// Engine-unique page id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Id of the context this page belongs to.
    #[must_use]
    pub const fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Id of the browser this page belongs to.
    #[must_use]
    pub const fn browser_id(&self) -> u64 {
        self.browser_id
    }

    /// Returns true if this call closed the page.
    fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            self.state.page_closed();
        }
        first
    }
}

#[async_trait]
impl Page for MemoryPage {
    async fn goto(&self, url: &str) -> Result<(), EngineError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(disconnected());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed("page has been closed".into()));
        }
        *self.url.lock() = url.to_string();
        Ok(())
    }

    fn url(&self) -> String {
        self.url.lock().clone()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.mark_closed();
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(disconnected())
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.connected.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

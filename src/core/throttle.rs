//! Same-key dispatch throttling.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Last dispatch time per throttle key.
///
/// Timestamps are taken at dispatch, not completion, and only ever move
/// forward.
#[derive(Debug, Default)]
pub struct ThrottleTracker {
    delay: Duration,
    last_dispatch: HashMap<String, Instant>,
}

impl ThrottleTracker {
    /// Tracker enforcing `delay` between same-key dispatches. A zero delay
    /// disables throttling.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_dispatch: HashMap::new(),
        }
    }

    /// Whether throttling is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    /// When a job with `key` may next be dispatched, or `None` if it may be
    /// dispatched at `now`.
    #[must_use]
    pub fn blocked_until(&self, key: &str, now: Instant) -> Option<Instant> {
        if !self.is_enabled() {
            return None;
        }
        let ready = *self.last_dispatch.get(key)? + self.delay;
        (ready > now).then_some(ready)
    }

    /// Record a dispatch of `key` at `now`.
    pub fn record(&mut self, key: String, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        let entry = self.last_dispatch.entry(key).or_insert(now);
        if now > *entry {
            *entry = now;
        }
    }

    /// Forget keys whose delay has fully elapsed.
    pub fn prune(&mut self, now: Instant) {
        let delay = self.delay;
        self.last_dispatch.retain(|_, last| *last + delay > now);
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_dispatch.len()
    }

    /// True when no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_dispatch.is_empty()
    }
}

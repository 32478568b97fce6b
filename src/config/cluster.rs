//! Cluster configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ContextOptions, LaunchOptions};

/// Built-in resource granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyModel {
    /// One browser per worker.
    Browser,
    /// Shared browser, one context per job.
    #[default]
    Context,
    /// Shared browser and context, one page per job.
    Page,
}

impl FromStr for ConcurrencyModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "context" => Ok(Self::Context),
            "page" => Ok(Self::Page),
            other => Err(format!("unknown concurrency model `{other}`")),
        }
    }
}

/// What the dispatcher does when the oldest queued job is throttled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Leave the throttled job in place and dispatch the next eligible one.
    #[default]
    Defer,
    /// Wait for the throttled job; nothing behind it is dispatched first.
    Strict,
}

impl FromStr for ThrottlePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defer" => Ok(Self::Defer),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown throttle policy `{other}`")),
        }
    }
}

/// Cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of workers, and so the bound on open job instances.
    pub max_concurrency: usize,
    /// Resource granularity.
    pub concurrency: ConcurrencyModel,
    /// Extra attempts after the first failure.
    pub retry_limit: u32,
    /// Delay before a failed job is queued again.
    pub retry_delay_ms: u64,
    /// Minimum gap between dispatches of jobs sharing a throttle key; 0 disables.
    pub same_domain_delay_ms: u64,
    /// Skip submissions whose identity key is already queued.
    pub skip_duplicate_jobs: bool,
    /// Behaviour for a throttled queue head.
    pub throttle_policy: ThrottlePolicy,
    /// Budget for creating and releasing job resources.
    pub resource_timeout_ms: u64,
    /// Options for every browser launch.
    pub launch: LaunchOptions,
    /// Options for every context opened by a provider.
    pub context: ContextOptions,
    /// One launch option set per worker, in worker order.
    pub per_worker_options: Option<Vec<LaunchOptions>>,
    /// Periodically log a stats snapshot.
    pub monitor: bool,
    /// Interval of the stats log.
    pub monitor_interval_ms: u64,
    /// Buffer size of the event channel.
    pub event_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            concurrency: ConcurrencyModel::default(),
            retry_limit: 0,
            retry_delay_ms: 0,
            same_domain_delay_ms: 0,
            skip_duplicate_jobs: false,
            throttle_policy: ThrottlePolicy::default(),
            resource_timeout_ms: 5000,
            launch: LaunchOptions::default(),
            context: ContextOptions::default(),
            per_worker_options: None,
            monitor: false,
            monitor_interval_ms: 500,
            event_capacity: 1024,
        }
    }
}

impl ClusterConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        if let Some(options) = &self.per_worker_options {
            if options.len() != self.max_concurrency {
                return Err("per_worker_options length must equal max_concurrency".into());
            }
        }
        if self.resource_timeout_ms == 0 {
            return Err("resource_timeout_ms must be greater than 0".into());
        }
        if self.monitor && self.monitor_interval_ms == 0 {
            return Err("monitor_interval_ms must be greater than 0".into());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `CLUSTER_*` environment variables, loading a
    /// `.env` file first if present. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Some(v) = env_value("CLUSTER_MAX_CONCURRENCY")? {
            cfg.max_concurrency = v;
        }
        if let Some(v) = env_value("CLUSTER_CONCURRENCY")? {
            cfg.concurrency = v;
        }
        if let Some(v) = env_value("CLUSTER_RETRY_LIMIT")? {
            cfg.retry_limit = v;
        }
        if let Some(v) = env_value("CLUSTER_RETRY_DELAY_MS")? {
            cfg.retry_delay_ms = v;
        }
        if let Some(v) = env_value("CLUSTER_SAME_DOMAIN_DELAY_MS")? {
            cfg.same_domain_delay_ms = v;
        }
        if let Some(v) = env_value("CLUSTER_SKIP_DUPLICATE_JOBS")? {
            cfg.skip_duplicate_jobs = v;
        }
        if let Some(v) = env_value("CLUSTER_THROTTLE_POLICY")? {
            cfg.throttle_policy = v;
        }
        if let Some(v) = env_value("CLUSTER_RESOURCE_TIMEOUT_MS")? {
            cfg.resource_timeout_ms = v;
        }
        if let Some(v) = env_value("CLUSTER_HEADLESS")? {
            cfg.launch.headless = v;
        }
        if let Some(v) = env_value("CLUSTER_MONITOR")? {
            cfg.monitor = v;
        }
        if let Some(v) = env_value("CLUSTER_MONITOR_INTERVAL_MS")? {
            cfg.monitor_interval_ms = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Retry delay as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Throttle delay as a [`Duration`].
    #[must_use]
    pub const fn same_domain_delay(&self) -> Duration {
        Duration::from_millis(self.same_domain_delay_ms)
    }

    /// Resource budget as a [`Duration`].
    #[must_use]
    pub const fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_timeout_ms)
    }

    /// Monitor interval as a [`Duration`].
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(_) => Ok(None),
    }
}

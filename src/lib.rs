//! # Prometheus Cluster
//!
//! A bounded, self-repairing pool of browser workers.
//!
//! Callers submit many independent jobs; each job runs against a browser
//! resource (a page, inside a context, inside a browser process) provisioned
//! just for it. The cluster keeps the number of open resources bounded,
//! retries failed jobs, throttles jobs aimed at the same domain and relaunches
//! browsers that crash, without disturbing jobs still running on a shared
//! browser.
//!
//! ## Key Features
//!
//! - **Bounded concurrency**: at most `max_concurrency` jobs, and job resources, at once
//! - **Resource granularity**: browser, context or page per job, or a custom provider
//! - **Retries**: per-job attempt budget with an optional delay between attempts
//! - **Same-domain throttling**: minimum gap between dispatches to one host
//! - **Duplicate skipping**: ignore submissions whose URL is already queued
//! - **Crash repair**: coalesced relaunch of a shared browser once no job is using it
//! - **Two submission modes**: fire-and-forget `queue` and awaited `execute`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_cluster::config::ClusterConfig;
//! use prometheus_cluster::core::{Cluster, TaskContext};
//! use prometheus_cluster::infra::InMemoryEngine;
//!
//! let cluster: Cluster<String, String> = Cluster::launch(
//!     ClusterConfig { max_concurrency: 2, ..ClusterConfig::default() },
//!     Arc::new(InMemoryEngine::new()),
//! )
//! .await?;
//!
//! cluster.task(|ctx: TaskContext<String>| async move {
//!     let url = ctx.data.unwrap_or_default();
//!     ctx.page.goto(&url).await?;
//!     Ok(ctx.page.url())
//! });
//!
//! cluster.queue("http://www.example.com/".into())?;
//! let landed = cluster.execute("http://www.example.org/".into()).await?;
//!
//! cluster.idle().await?;
//! cluster.close().await?;
//! ```
//!
//! The browser itself sits behind the traits in [`engine`]; the bundled
//! [`infra::InMemoryEngine`] implements them for tests and development.
//!
//! For complete examples, see:
//! - `tests/cluster_test.rs` - scheduling, retries, throttling and events
//! - `tests/repair_test.rs` - crash recovery

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Resource providers deciding what jobs share.
pub mod concurrency;
/// Configuration models for the cluster and its providers.
pub mod config;
/// Builders to construct a cluster from configuration.
pub mod builders;
/// Core scheduling: jobs, queue, throttling and the cluster.
pub mod core;
/// Automation-engine traits.
pub mod engine;
/// Bundled engine adapters.
pub mod infra;
/// Shared utilities.
pub mod util;

pub use builders::ClusterBuilder;
pub use concurrency::Concurrency;
pub use config::ClusterConfig;
pub use crate::core::{Cluster, ClusterError, ClusterEvent, JobData, TaskContext};

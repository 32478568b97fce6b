//! Configuration models for the cluster and its providers.

pub mod cluster;

pub use cluster::{ClusterConfig, ConcurrencyModel, ThrottlePolicy};

//! Builders to construct a cluster from configuration.

pub mod cluster_builder;

pub use cluster_builder::ClusterBuilder;

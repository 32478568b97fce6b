//! Tests for the cluster builder

use std::sync::Arc;
use std::time::Duration;

use prometheus_cluster::builders::ClusterBuilder;
use prometheus_cluster::concurrency::Concurrency;
use prometheus_cluster::config::{ClusterConfig, ConcurrencyModel};
use prometheus_cluster::core::{Cluster, TaskContext};
use prometheus_cluster::infra::InMemoryEngine;

#[tokio::test]
async fn test_builder_from_config() {
    let engine = InMemoryEngine::new();
    let config = ClusterConfig {
        max_concurrency: 2,
        concurrency: ConcurrencyModel::Browser,
        ..ClusterConfig::default()
    };

    let cluster: Cluster<String, ()> = ClusterBuilder::from_config(Arc::new(engine.clone()), config)
        .launch()
        .await
        .unwrap();
    assert_eq!(cluster.workers(), 2);
    assert_eq!(engine.launches(), 2);
    cluster.close().await.unwrap();
}

#[tokio::test]
async fn test_explicit_concurrency_overrides_config() {
    let engine = InMemoryEngine::new();
    let cluster: Cluster<String, ()> = ClusterBuilder::new(Arc::new(engine.clone()))
        .max_concurrency(3)
        .concurrency(Concurrency::Page)
        .launch()
        .await
        .unwrap();
    assert_eq!(engine.launches(), 1);
    cluster.close().await.unwrap();
}

#[tokio::test]
async fn test_builder_cluster_runs_jobs() {
    let engine = InMemoryEngine::new();
    let cluster: Cluster<String, String> = ClusterBuilder::new(Arc::new(engine))
        .max_concurrency(2)
        .retry_limit(1)
        .resource_timeout(Duration::from_secs(1))
        .monitor(Duration::from_millis(10))
        .launch()
        .await
        .unwrap();

    cluster.task(|ctx: TaskContext<String>| async move {
        let url = ctx.data.unwrap_or_default();
        ctx.page.goto(&url).await?;
        anyhow::Ok(ctx.page.url())
    });
    assert_eq!(cluster.execute("http://a.test/".into()).await.unwrap(), "http://a.test/");
    cluster.close().await.unwrap();
}

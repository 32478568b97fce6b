//! Crash recovery tests
//!
//! - browser crash in the middle of a job
//! - coalesced relaunch of a shared browser
//! - back-to-back crashes of a relaunched browser
//! - relaunch failure turning the cluster fatal
//! - resource timeouts

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_cluster::config::{ClusterConfig, ConcurrencyModel};
use prometheus_cluster::core::{Cluster, ClusterError, TaskContext};
use prometheus_cluster::infra::InMemoryEngine;

async fn launch(engine: &InMemoryEngine, config: ClusterConfig) -> Cluster<String, String> {
    Cluster::launch(config, Arc::new(engine.clone())).await.unwrap()
}

/// Task that crashes every browser on its first run, then navigates normally.
fn crash_once(cluster: &Cluster<String, String>, engine: &InMemoryEngine) {
    let engine = engine.clone();
    let crashed = Arc::new(AtomicBool::new(false));
    cluster.task(move |ctx: TaskContext<String>| {
        let engine = engine.clone();
        let crashed = Arc::clone(&crashed);
        async move {
            if !crashed.swap(true, Ordering::SeqCst) {
                engine.crash();
            }
            let url = ctx.data.unwrap_or_default();
            ctx.page.goto(&url).await?;
            anyhow::Ok(ctx.page.url())
        }
    });
}

// ============================================================================
// CRASH MID-JOB
// ============================================================================

async fn recovers_from_crash(model: ConcurrencyModel) {
    println!("\n=== Test: crash mid-job ({model:?}) ===");

    let engine = InMemoryEngine::new();
    let cluster = launch(
        &engine,
        ClusterConfig {
            concurrency: model,
            retry_limit: 1,
            ..ClusterConfig::default()
        },
    )
    .await;
    crash_once(&cluster, &engine);

    let landed = cluster.execute("http://a.test/".into()).await.unwrap();
    assert_eq!(landed, "http://a.test/");
    assert_eq!(engine.launches(), 2);
    assert_eq!(engine.live_browsers(), 1);

    // later jobs run on the replacement browser
    let landed = cluster.execute("http://b.test/".into()).await.unwrap();
    assert_eq!(landed, "http://b.test/");

    let stats = cluster.stats();
    assert_eq!(stats.repairs, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.completed, 2);

    cluster.close().await.unwrap();
    assert_eq!(engine.live_browsers(), 0);
    println!("✅ {stats}");
}

#[tokio::test]
async fn test_context_model_recovers_from_crash() {
    recovers_from_crash(ConcurrencyModel::Context).await;
}

#[tokio::test]
async fn test_page_model_recovers_from_crash() {
    recovers_from_crash(ConcurrencyModel::Page).await;
}

#[tokio::test]
async fn test_browser_model_recovers_from_crash() {
    recovers_from_crash(ConcurrencyModel::Browser).await;
}

#[tokio::test]
async fn test_crash_without_retry_reports_error() {
    let engine = InMemoryEngine::new();
    let cluster = launch(&engine, ClusterConfig::default()).await;
    crash_once(&cluster, &engine);

    let err = cluster.execute("http://a.test/".into()).await.unwrap_err();
    assert!(err.is_task_error());

    // the worker was repaired before the next job
    let landed = cluster.execute("http://b.test/".into()).await.unwrap();
    assert_eq!(landed, "http://b.test/");
    cluster.close().await.unwrap();
}

// ============================================================================
// COALESCED REPAIR
// ============================================================================

#[tokio::test]
async fn test_shared_browser_relaunched_once() {
    println!("\n=== Test: three workers, one relaunch ===");

    let engine = InMemoryEngine::new();
    let cluster = launch(
        &engine,
        ClusterConfig {
            max_concurrency: 3,
            concurrency: ConcurrencyModel::Context,
            retry_limit: 1,
            ..ClusterConfig::default()
        },
    )
    .await;

    cluster.task(|ctx: TaskContext<String>| async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let url = ctx.data.unwrap_or_default();
        ctx.page.goto(&url).await?;
        anyhow::Ok(ctx.page.url())
    });

    let jobs: Vec<_> = ["http://a.test/", "http://b.test/", "http://c.test/"]
        .into_iter()
        .map(|url| cluster.execute(url.to_string()))
        .collect();

    let crasher = engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        crasher.crash();
    });

    for result in futures::future::join_all(jobs).await {
        assert!(result.is_ok(), "job failed: {result:?}");
    }
    assert_eq!(engine.launches(), 2, "repairs must collapse into one relaunch");
    assert_eq!(engine.live_browsers(), 1);
    assert_eq!(cluster.stats().repairs, 1);

    cluster.close().await.unwrap();
    println!("✅ launches: {}", engine.launches());
}

// ============================================================================
// REPEATED CRASHES
// ============================================================================

fn navigate(cluster: &Cluster<String, String>) {
    cluster.task(|ctx: TaskContext<String>| async move {
        let url = ctx.data.unwrap_or_default();
        ctx.page.goto(&url).await?;
        anyhow::Ok(ctx.page.url())
    });
}

/// The replacement browser dies before any job got an instance on it.
async fn relaunched_browser_crashes_before_use(model: ConcurrencyModel) {
    println!("\n=== Test: relaunched browser crashes before use ({model:?}) ===");

    let engine = InMemoryEngine::new();
    let cluster = launch(
        &engine,
        ClusterConfig {
            concurrency: model,
            retry_limit: 3,
            retry_delay_ms: 100,
            ..ClusterConfig::default()
        },
    )
    .await;
    navigate(&cluster);

    engine.crash();
    let pending = cluster.execute("http://a.test/".into());

    // first attempt failed to provision, browser relaunched, retry delayed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.launches(), 2);
    assert_eq!(cluster.stats().delayed, 1);

    engine.crash();
    assert_eq!(pending.await.unwrap(), "http://a.test/");
    assert_eq!(engine.launches(), 3);
    assert_eq!(engine.live_browsers(), 1);

    let stats = cluster.stats();
    assert_eq!(stats.repairs, 2);
    assert_eq!(stats.retried, 2);

    cluster.close().await.unwrap();
    println!("✅ {stats}");
}

#[tokio::test(start_paused = true)]
async fn test_context_model_relaunched_browser_crashes_before_use() {
    relaunched_browser_crashes_before_use(ConcurrencyModel::Context).await;
}

#[tokio::test(start_paused = true)]
async fn test_page_model_relaunched_browser_crashes_before_use() {
    relaunched_browser_crashes_before_use(ConcurrencyModel::Page).await;
}

async fn back_to_back_crashes(model: ConcurrencyModel) {
    println!("\n=== Test: back-to-back crashes ({model:?}) ===");

    let engine = InMemoryEngine::new();
    let cluster = launch(
        &engine,
        ClusterConfig {
            max_concurrency: 2,
            concurrency: model,
            retry_limit: 3,
            ..ClusterConfig::default()
        },
    )
    .await;
    navigate(&cluster);

    assert!(cluster.execute("http://a.test/".into()).await.is_ok());

    engine.crash();
    assert!(cluster.execute("http://b.test/".into()).await.is_ok());
    assert_eq!(engine.launches(), 2);

    engine.crash();
    let jobs = vec![
        cluster.execute("http://c.test/".into()),
        cluster.execute("http://d.test/".into()),
    ];
    for result in futures::future::join_all(jobs).await {
        assert!(result.is_ok(), "job failed: {result:?}");
    }
    assert_eq!(engine.launches(), 3);

    assert!(cluster.execute("http://e.test/".into()).await.is_ok());
    assert_eq!(cluster.stats().repairs, 2);

    cluster.close().await.unwrap();
    assert_eq!(engine.live_browsers(), 0);
    println!("✅ launches: {}", engine.launches());
}

#[tokio::test]
async fn test_context_model_back_to_back_crashes() {
    back_to_back_crashes(ConcurrencyModel::Context).await;
}

#[tokio::test]
async fn test_page_model_back_to_back_crashes() {
    back_to_back_crashes(ConcurrencyModel::Page).await;
}

// ============================================================================
// UNRECOVERABLE
// ============================================================================

#[tokio::test]
async fn test_failed_shared_context_setup_leaves_no_browser() {
    let engine = InMemoryEngine::new();
    engine.fail_next_contexts(1);

    let result = Cluster::<String, String>::launch(
        ClusterConfig {
            concurrency: ConcurrencyModel::Page,
            ..ClusterConfig::default()
        },
        Arc::new(engine.clone()),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(engine.launches(), 1);
    assert_eq!(engine.live_browsers(), 0);
}

#[tokio::test]
async fn test_failed_relaunch_is_fatal() {
    println!("\n=== Test: relaunch failure ===");

    let engine = InMemoryEngine::new();
    let cluster = launch(&engine, ClusterConfig::default()).await;
    crash_once(&cluster, &engine);
    engine.fail_next_launches(1);

    let first = cluster.execute("http://a.test/".into());
    let second = cluster.execute("http://b.test/".into());

    let err = first.await.unwrap_err();
    assert!(err.is_task_error(), "the job keeps its own error: {err}");

    let err = second.await.unwrap_err();
    assert!(err.is_fatal(), "pending job: {err}");

    assert!(matches!(cluster.idle().await, Err(ClusterError::Unrecoverable(_))));
    assert!(matches!(
        cluster.execute("http://c.test/".into()).await,
        Err(ClusterError::Unrecoverable(_))
    ));
    assert!(matches!(cluster.queue("http://d.test/".into()), Err(ClusterError::Unrecoverable(_))));
    assert!(matches!(cluster.close().await, Err(ClusterError::Unrecoverable(_))));
    println!("✅ cluster refused further work");
}

#[tokio::test]
async fn test_failed_relaunch_emits_task_errors_for_queued_jobs() {
    let engine = InMemoryEngine::new();
    let cluster = launch(&engine, ClusterConfig::default()).await;
    crash_once(&cluster, &engine);
    engine.fail_next_launches(1);
    let mut events = cluster.subscribe();

    cluster.queue("http://a.test/".into()).unwrap();
    cluster.queue("http://b.test/".into()).unwrap();
    assert!(cluster.idle().await.is_err());

    let mut errors = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.name() == "taskerror" {
            errors.push(event);
        }
    }
    assert_eq!(errors.len(), 2);
    let _ = cluster.close().await;
}

#[tokio::test]
async fn test_browser_model_failed_relaunch_is_fatal() {
    let engine = InMemoryEngine::new();
    let cluster = launch(
        &engine,
        ClusterConfig {
            concurrency: ConcurrencyModel::Browser,
            ..ClusterConfig::default()
        },
    )
    .await;
    crash_once(&cluster, &engine);
    engine.fail_next_launches(1);

    assert!(cluster.execute("http://a.test/".into()).await.is_err());
    assert!(matches!(cluster.idle().await, Err(ClusterError::Unrecoverable(_))));
}

// ============================================================================
// RESOURCE TIMEOUTS
// ============================================================================

#[tokio::test]
async fn test_resource_timeout_is_distinguishable() {
    println!("\n=== Test: resource timeout ===");

    let engine = InMemoryEngine::new();
    let cluster = launch(
        &engine,
        ClusterConfig {
            resource_timeout_ms: 50,
            ..ClusterConfig::default()
        },
    )
    .await;
    cluster.task(|ctx: TaskContext<String>| async move { anyhow::Ok(ctx.page.url()) });

    engine.set_page_delay(Some(Duration::from_millis(500)));
    let err = cluster.execute("http://a.test/".into()).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(!err.is_task_error());
    assert!(matches!(err, ClusterError::Timeout { operation: "create resources", .. }));

    engine.set_page_delay(None);
    assert!(cluster.execute("http://b.test/".into()).await.is_ok());
    cluster.close().await.unwrap();
    println!("✅ {err}");
}

//! Tests for configuration validation and parsing

use prometheus_cluster::config::{ClusterConfig, ConcurrencyModel, ThrottlePolicy};
use prometheus_cluster::engine::LaunchOptions;

#[test]
fn test_defaults() {
    let cfg = ClusterConfig::default();
    assert_eq!(cfg.max_concurrency, 1);
    assert_eq!(cfg.concurrency, ConcurrencyModel::Context);
    assert_eq!(cfg.retry_limit, 0);
    assert_eq!(cfg.retry_delay_ms, 0);
    assert_eq!(cfg.same_domain_delay_ms, 0);
    assert!(!cfg.skip_duplicate_jobs);
    assert_eq!(cfg.throttle_policy, ThrottlePolicy::Defer);
    assert_eq!(cfg.resource_timeout_ms, 5000);
    assert!(cfg.per_worker_options.is_none());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_zero_workers_rejected() {
    let cfg = ClusterConfig {
        max_concurrency: 0,
        ..ClusterConfig::default()
    };
    assert_eq!(cfg.validate().unwrap_err(), "max_concurrency must be greater than 0");
}

#[test]
fn test_per_worker_length_must_match() {
    let mut cfg = ClusterConfig {
        max_concurrency: 2,
        per_worker_options: Some(vec![LaunchOptions::default()]),
        ..ClusterConfig::default()
    };
    assert!(cfg.validate().is_err());

    cfg.per_worker_options = Some(vec![LaunchOptions::default(), LaunchOptions::default()]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_zero_budgets_rejected() {
    let cfg = ClusterConfig {
        resource_timeout_ms: 0,
        ..ClusterConfig::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = ClusterConfig {
        event_capacity: 0,
        ..ClusterConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_partial() {
    let cfg = ClusterConfig::from_json_str(
        r#"{
            "max_concurrency": 4,
            "concurrency": "page",
            "retry_limit": 2,
            "same_domain_delay_ms": 250,
            "throttle_policy": "strict",
            "launch": { "args": ["--no-sandbox"] }
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.max_concurrency, 4);
    assert_eq!(cfg.concurrency, ConcurrencyModel::Page);
    assert_eq!(cfg.retry_limit, 2);
    assert_eq!(cfg.same_domain_delay().as_millis(), 250);
    assert_eq!(cfg.throttle_policy, ThrottlePolicy::Strict);
    assert!(cfg.launch.headless);
    assert_eq!(cfg.launch.args, vec!["--no-sandbox".to_string()]);
    assert_eq!(cfg.resource_timeout_ms, 5000);
}

#[test]
fn test_from_json_invalid() {
    let err = ClusterConfig::from_json_str(r#"{"max_concurrency": 0}"#).unwrap_err();
    assert_eq!(err, "max_concurrency must be greater than 0");

    let err = ClusterConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));

    assert!(ClusterConfig::from_json_str(r#"{"concurrency": "tab"}"#).is_err());
}

#[test]
fn test_model_and_policy_from_str() {
    assert_eq!("Browser".parse::<ConcurrencyModel>(), Ok(ConcurrencyModel::Browser));
    assert_eq!(" page ".parse::<ConcurrencyModel>(), Ok(ConcurrencyModel::Page));
    assert!("tab".parse::<ConcurrencyModel>().is_err());

    assert_eq!("strict".parse::<ThrottlePolicy>(), Ok(ThrottlePolicy::Strict));
    assert_eq!(
        "fifo".parse::<ThrottlePolicy>().unwrap_err(),
        "unknown throttle policy `fifo`"
    );
}

#[test]
fn test_serialized_config_roundtrips_through_json() {
    let cfg = ClusterConfig {
        max_concurrency: 3,
        concurrency: ConcurrencyModel::Browser,
        skip_duplicate_jobs: true,
        ..ClusterConfig::default()
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert!(json.contains(r#""concurrency":"browser""#));
    assert_eq!(ClusterConfig::from_json_str(&json).unwrap(), cfg);
}

//! Tests for error types

use std::time::Duration;

use prometheus_cluster::core::{ClusterError, EngineError};

#[test]
fn test_timeout_error() {
    let err = ClusterError::Timeout {
        operation: "create resources",
        after: Duration::from_millis(5000),
    };
    assert_eq!(format!("{err}"), "create resources timed out after 5000ms");
    assert!(err.is_timeout());
    assert!(!err.is_task_error());
    assert!(!err.is_fatal());
}

#[test]
fn test_task_error_is_transparent() {
    let err = ClusterError::Task(anyhow::anyhow!("selector not found"));
    assert_eq!(format!("{err}"), "selector not found");
    assert!(err.is_task_error());
    assert!(!err.is_timeout());
}

#[test]
fn test_engine_error_conversion() {
    let err: ClusterError = EngineError::Closed("browser has disconnected".into()).into();
    assert!(matches!(err, ClusterError::Engine(EngineError::Closed(_))));
    assert!(err.is_provisioning());
}

#[test]
fn test_unrecoverable_error() {
    let err = ClusterError::Unrecoverable("simulated launch failure".into());
    assert_eq!(format!("{err}"), "unable to restart browser: simulated launch failure");
    assert!(err.is_fatal());
}

#[test]
fn test_simple_errors() {
    assert_eq!(ClusterError::MissingTask.to_string(), "no task function defined");
    assert_eq!(ClusterError::Closed.to_string(), "cluster is closed");
    assert_eq!(
        ClusterError::Config("max_concurrency must be greater than 0".into()).to_string(),
        "invalid configuration: max_concurrency must be greater than 0"
    );
}

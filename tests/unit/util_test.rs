//! Tests for utility helpers

use prometheus_cluster::core::JobData;
use prometheus_cluster::util::{domain_of, init_tracing, now_ms};
use serde_json::json;

#[test]
fn test_domain_of_variants() {
    assert_eq!(domain_of("http://www.example.com/"), Some("www.example.com".into()));
    assert_eq!(domain_of("https://EXAMPLE.org:443/a#b"), Some("example.org".into()));
    assert_eq!(domain_of("http://127.0.0.1:3001/"), Some("127.0.0.1".into()));
    assert_eq!(domain_of("no scheme"), None);
}

#[test]
fn test_job_data_keys() {
    let url = "http://a.test/page".to_string();
    assert_eq!(url.identity_key(), Some("http://a.test/page".into()));
    assert_eq!(url.throttle_key(), Some("a.test".into()));

    let object = json!({ "url": "http://b.test/x", "depth": 2 });
    assert_eq!(object.throttle_key(), Some("b.test".into()));

    assert_eq!(json!({ "depth": 2 }).identity_key(), None);
    assert_eq!(42u32.identity_key(), None);
    assert_eq!("relative/path".throttle_key(), None);
}

#[test]
fn test_now_ms() {
    assert!(now_ms() > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

//! Tests for the job queue and throttle tracker

use std::time::Duration;

use prometheus_cluster::core::{Job, JobQueue, Selection, ThrottleTracker};
use tokio::time::Instant;

fn job(url: &str) -> Job<String, ()> {
    Job::new(Some(url.to_string()), None)
}

#[test]
fn test_fifo_order() {
    let mut queue = JobQueue::new(false);
    for url in ["http://a.test/1", "http://b.test/2", "http://c.test/3"] {
        queue.push(job(url)).unwrap();
    }
    let order: Vec<String> = std::iter::from_fn(|| queue.shift())
        .filter_map(|j| j.data)
        .collect();
    assert_eq!(order, vec!["http://a.test/1", "http://b.test/2", "http://c.test/3"]);
    assert!(queue.is_empty());
}

#[test]
fn test_duplicate_rejected_only_while_queued() {
    let mut queue = JobQueue::new(true);
    queue.push(job("http://a.test/")).unwrap();
    assert!(queue.contains_key("http://a.test/"));
    assert!(queue.push(job("http://a.test/")).is_err());

    assert!(queue.shift().is_some());
    assert!(!queue.contains_key("http://a.test/"));
    assert!(queue.push(job("http://a.test/")).is_ok());
}

#[test]
fn test_duplicates_allowed_when_disabled() {
    let mut queue = JobQueue::new(false);
    queue.push(job("http://a.test/")).unwrap();
    queue.push(job("http://a.test/")).unwrap();
    assert_eq!(queue.size(), 2);
}

#[test]
fn test_take_first_skips_and_stops() {
    let mut queue = JobQueue::new(false);
    for url in ["http://a.test/1", "http://a.test/2", "http://b.test/"] {
        queue.push(job(url)).unwrap();
    }

    let picked = queue.take_first(|j| {
        if j.throttle_key().as_deref() == Some("a.test") {
            Selection::Skip
        } else {
            Selection::Take
        }
    });
    assert_eq!(picked.and_then(|j| j.data).as_deref(), Some("http://b.test/"));

    assert!(queue.take_first(|_| Selection::Stop).is_none());
    assert_eq!(queue.size(), 2);
}

#[test]
fn test_requeue_goes_to_tail() {
    let mut queue = JobQueue::new(false);
    queue.push(job("http://a.test/")).unwrap();
    let first = queue.shift().unwrap();
    queue.push(job("http://b.test/")).unwrap();
    queue.requeue(first);

    let urls: Vec<_> = queue.iter().filter_map(|j| j.url()).collect();
    assert_eq!(urls, vec!["http://b.test/", "http://a.test/"]);
}

#[test]
fn test_throttle_tracker() {
    let delay = Duration::from_millis(100);
    let mut tracker = ThrottleTracker::new(delay);
    assert!(tracker.is_enabled());

    let start = Instant::now();
    assert!(tracker.blocked_until("a.test", start).is_none());
    tracker.record("a.test".into(), start);
    assert_eq!(tracker.blocked_until("a.test", start), Some(start + delay));
    assert!(tracker.blocked_until("b.test", start).is_none());

    tracker.prune(start + delay);
    assert!(tracker.is_empty());
}

#[test]
fn test_throttle_disabled() {
    let mut tracker = ThrottleTracker::new(Duration::ZERO);
    assert!(!tracker.is_enabled());
    let now = Instant::now();
    tracker.record("a.test".into(), now);
    assert!(tracker.blocked_until("a.test", now).is_none());
}

//! Lecture session manager tests.
//!
//! Start/stop semantics, end-of-stream cleanup and shutdown against the
//! in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use attendance_service::broker::ConsumerSettings;
use attendance_service::errors::AttendanceError;
use attendance_service::hub::SubscriberHub;
use attendance_service::sessions::{LectureSessionManager, StartOutcome};
use attendance_test_utils::{end_of_lecture_payload, presence_payload, MockBroker, MockRecorder};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn manager(broker: &MockBroker) -> LectureSessionManager {
    let recorder = Arc::new(MockRecorder::new().with_person("12345", "A", "B", None));
    let hub = Arc::new(SubscriberHub::new(recorder, Duration::from_secs(5)));
    LectureSessionManager::new(
        Arc::new(broker.clone()),
        hub,
        ConsumerSettings::default(),
        CancellationToken::new(),
    )
}

/// Poll `check` every 10ms for up to 5s.
async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_spawns_one_consumer() {
    let broker = MockBroker::new();
    let manager = manager(&broker);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move { manager.start(42, "q42").await }));
    }

    let mut started = 0;
    let mut already_running = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            StartOutcome::Started => started += 1,
            StartOutcome::AlreadyRunning => already_running += 1,
        }
    }

    assert_eq!(started, 1);
    assert_eq!(already_running, 15);
    assert_eq!(manager.active_count().await, 1);

    assert!(eventually(|| broker.active_subscriptions("q42") == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.dial_count(), 1, "exactly one consumer loop dialed");

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_stop_unknown_lecture_changes_nothing() {
    let broker = MockBroker::new();
    let manager = manager(&broker);
    manager.start(1, "q1").await.unwrap();

    let err = manager.stop(42).await.unwrap_err();

    assert!(matches!(err, AttendanceError::NotFound(ref m) if m == "Lecture not found"));
    assert_eq!(manager.active_count().await, 1);
    assert!(manager.is_running(1).await);
}

#[tokio::test]
async fn test_start_with_empty_queue_is_rejected() {
    let broker = MockBroker::new();
    let manager = manager(&broker);

    let err = manager.start(42, "").await.unwrap_err();

    assert!(matches!(err, AttendanceError::BadRequest(_)));
    assert_eq!(manager.active_count().await, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.dial_count(), 0);
}

#[tokio::test]
async fn test_end_of_lecture_removes_session() {
    let broker = MockBroker::new();
    let manager = manager(&broker);
    broker.publish("q42", presence_payload("12345"));
    broker.publish("q42", end_of_lecture_payload());

    manager.start(42, "q42").await.unwrap();

    let mut removed = false;
    for _ in 0..500 {
        if !manager.is_running(42).await {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(removed, "session should be removed after the sentinel");
    assert_eq!(broker.acked("q42").len(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.dial_count(), 1, "no redial after the sentinel");

    // A later start spawns a fresh loop
    assert_eq!(manager.start(42, "q42").await.unwrap(), StartOutcome::Started);
    assert!(eventually(|| broker.dial_count() == 2).await);

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_with_unreachable_broker_retries_then_connects() {
    let broker = MockBroker::unreachable();
    let manager = manager(&broker);

    let outcome = tokio::time::timeout(Duration::from_millis(10), manager.start(42, "q42"))
        .await
        .expect("start must not wait for the broker")
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(
        broker.dial_count() >= 2,
        "expected at least two dials within 5s, got {}",
        broker.dial_count()
    );
    assert_eq!(broker.active_subscriptions("q42"), 0);

    broker.set_reachable(true);
    assert!(eventually(|| broker.active_subscriptions("q42") == 1).await);
    assert!(manager.is_running(42).await);

    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_prevents_further_dials() {
    let broker = MockBroker::unreachable();
    let manager = manager(&broker);
    manager.start(42, "q42").await.unwrap();

    // Dials at 0s and 1s; the loop now waits 2s
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(broker.dial_count(), 2);

    manager.stop(42).await.unwrap();
    assert!(!manager.is_running(42).await);

    broker.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.dial_count(), 2);
}

#[tokio::test]
async fn test_stop_closes_broker_subscription() {
    let broker = MockBroker::new();
    let manager = manager(&broker);
    manager.start(42, "q42").await.unwrap();
    assert!(eventually(|| broker.active_subscriptions("q42") == 1).await);

    manager.stop(42).await.unwrap();

    assert!(eventually(|| broker.active_subscriptions("q42") == 0).await);
}

#[tokio::test]
async fn test_shutdown_stops_every_session() {
    let broker = MockBroker::new();
    let manager = manager(&broker);
    manager.start(1, "q1").await.unwrap();
    manager.start(2, "q2").await.unwrap();
    assert!(
        eventually(|| {
            broker.active_subscriptions("q1") == 1 && broker.active_subscriptions("q2") == 1
        })
        .await
    );

    manager.shutdown(Duration::from_secs(1)).await;

    assert_eq!(manager.active_count().await, 0);
    assert_eq!(broker.active_subscriptions("q1"), 0);
    assert_eq!(broker.active_subscriptions("q2"), 0);
    assert!(matches!(
        manager.start(3, "q3").await,
        Err(AttendanceError::ServiceUnavailable(_))
    ));
}

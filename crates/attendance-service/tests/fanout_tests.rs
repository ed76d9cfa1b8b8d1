//! Subscriber hub fanout tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use attendance_service::broker::{ConsumerExit, ConsumerSettings, LectureConsumer};
use attendance_service::errors::AttendanceError;
use attendance_service::hub::{BroadcastReport, ClientHandle, SubscriberHub};
use attendance_service::models::AttendanceEvent;
use attendance_test_utils::{
    end_of_lecture_payload, presence_payload, presence_payload_for, MockBroker, MockRecorder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn recorder() -> Arc<MockRecorder> {
    Arc::new(
        MockRecorder::new()
            .with_person("12345", "Ivan", "Petrov", Some("P3212"))
            .with_person("777", "Anna", "Orlova", None),
    )
}

#[tokio::test]
async fn test_every_subscriber_gets_identical_text() {
    let hub = SubscriberHub::new(recorder(), Duration::from_secs(5));
    let (first, mut first_rx) = ClientHandle::channel(8);
    let (second, mut second_rx) = ClientHandle::channel(8);
    hub.subscribe(&first, 7).await;
    hub.subscribe(&second, 7).await;

    let report = hub.broadcast(7, &presence_payload("12345")).await.unwrap();

    assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
    let a = first_rx.try_recv().unwrap();
    let b = second_rx.try_recv().unwrap();
    assert_eq!(a, b);

    let event: AttendanceEvent = serde_json::from_str(&a).unwrap();
    assert_eq!(event.lecture_id, 7);
    assert_eq!(event.user.isu, "12345");
    assert_eq!(event.user.name, "Ivan");
    assert_eq!(event.group.as_deref(), Some("P3212"));
}

#[tokio::test]
async fn test_other_lectures_receive_nothing() {
    let hub = SubscriberHub::new(recorder(), Duration::from_secs(5));
    let (watching_7, mut rx_7) = ClientHandle::channel(8);
    let (watching_9, mut rx_9) = ClientHandle::channel(8);
    hub.subscribe(&watching_7, 7).await;
    hub.subscribe(&watching_9, 9).await;

    hub.broadcast(7, &presence_payload("12345")).await.unwrap();

    assert!(rx_7.try_recv().is_ok());
    assert!(rx_9.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribed_and_removed_clients_receive_nothing() {
    let hub = SubscriberHub::new(recorder(), Duration::from_secs(5));
    let (leaver, mut leaver_rx) = ClientHandle::channel(8);
    let (closer, mut closer_rx) = ClientHandle::channel(8);
    let (stayer, mut stayer_rx) = ClientHandle::channel(8);
    hub.subscribe(&leaver, 7).await;
    hub.subscribe(&closer, 7).await;
    hub.subscribe(&closer, 8).await;
    hub.subscribe(&stayer, 7).await;

    hub.unsubscribe(leaver.id(), 7).await;
    hub.remove_client(closer.id()).await;

    assert_eq!(hub.subscriber_count(7).await, 1);
    assert_eq!(hub.subscriber_count(8).await, 0);
    assert_eq!(hub.lecture_count().await, 1);

    let report = hub.broadcast(7, &presence_payload("12345")).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(stayer_rx.try_recv().is_ok());
    assert!(leaver_rx.try_recv().is_err());
    assert!(closer_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_full_queue_drops_for_slow_client_only() {
    let hub = SubscriberHub::new(recorder(), Duration::from_secs(5));
    let (slow, mut slow_rx) = ClientHandle::channel(1);
    let (fast, mut fast_rx) = ClientHandle::channel(8);
    hub.subscribe(&slow, 7).await;
    hub.subscribe(&fast, 7).await;

    let first = hub.broadcast(7, &presence_payload("12345")).await.unwrap();
    let second = hub.broadcast(7, &presence_payload("777")).await.unwrap();

    assert_eq!(first, BroadcastReport { delivered: 2, dropped: 0 });
    assert_eq!(second, BroadcastReport { delivered: 1, dropped: 1 });

    let fast_ids: Vec<String> = std::iter::from_fn(|| fast_rx.try_recv().ok())
        .map(|text| serde_json::from_str::<AttendanceEvent>(&text).unwrap().user.isu)
        .collect();
    assert_eq!(fast_ids, vec!["12345", "777"]);

    let slow_event: AttendanceEvent = serde_json::from_str(&slow_rx.try_recv().unwrap()).unwrap();
    assert_eq!(slow_event.user.isu, "12345");
    assert!(slow_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_records_without_subscribers() {
    let recorder = recorder();
    let hub = SubscriberHub::new(recorder.clone(), Duration::from_secs(5));

    let report = hub.broadcast(7, &presence_payload("12345")).await.unwrap();

    assert_eq!(report, BroadcastReport::default());
    assert_eq!(recorder.calls(), vec![(7, "12345".to_string())]);
}

#[tokio::test]
async fn test_queue_lecture_wins_over_payload_lecture() {
    let recorder = recorder();
    let hub = SubscriberHub::new(recorder.clone(), Duration::from_secs(5));
    let (client, mut rx) = ClientHandle::channel(8);
    hub.subscribe(&client, 7).await;

    hub.broadcast(7, &presence_payload_for("12345", 99))
        .await
        .unwrap();

    assert_eq!(recorder.calls(), vec![(7, "12345".to_string())]);
    let event: AttendanceEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(event.lecture_id, 7);
}

#[tokio::test(start_paused = true)]
async fn test_slow_recorder_times_out() {
    let recorder = Arc::new(
        MockRecorder::new()
            .with_person("12345", "Ivan", "Petrov", None)
            .with_delay(Duration::from_secs(10)),
    );
    let hub = SubscriberHub::new(recorder.clone(), Duration::from_secs(5));
    let (client, mut rx) = ClientHandle::channel(8);
    hub.subscribe(&client, 7).await;

    let err = hub
        .broadcast(7, &presence_payload("12345"))
        .await
        .unwrap_err();

    assert!(matches!(err, AttendanceError::RecorderTimeout(d) if d == Duration::from_secs(5)));
    assert_eq!(recorder.call_count(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_consumer_to_client_end_to_end() {
    let broker = MockBroker::new();
    let hub = Arc::new(SubscriberHub::new(recorder(), Duration::from_secs(5)));
    let (client, mut rx) = ClientHandle::channel(8);
    hub.subscribe(&client, 7).await;

    broker.publish("lecture-7", presence_payload("12345"));
    broker.publish("lecture-7", presence_payload("777"));
    broker.publish("lecture-7", end_of_lecture_payload());

    let consumer = LectureConsumer::new(
        7,
        "lecture-7".to_string(),
        Arc::new(broker.clone()),
        Arc::clone(&hub),
        ConsumerSettings::default(),
    );
    let exit = tokio::time::timeout(Duration::from_secs(5), consumer.run(CancellationToken::new()))
        .await
        .expect("consumer should finish on the sentinel");
    assert_eq!(exit, ConsumerExit::Finished);

    let first: AttendanceEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    let second: AttendanceEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(first.user.isu, "12345");
    assert_eq!(second.user.isu, "777");
    assert_eq!(second.group, None);
    assert!(rx.try_recv().is_err());
}

//! MemoryLog behaviour: ordering, group positions, and lifecycle errors.

use std::time::Duration;

use shopstream_events::{LogConsumer, LogProducer, MemoryLog, TransportError};

const WAIT: Duration = Duration::from_millis(50);

fn topics(names: &[&str]) -> Vec<String> {
    names.iter().map(|t| t.to_string()).collect()
}

// =========================================================================
// Producing and consuming
// =========================================================================

#[tokio::test]
async fn messages_arrive_in_append_order() {
    let log = MemoryLog::new();
    log.append("product-updates", b"a".to_vec());
    log.append("product-updates", b"b".to_vec());

    let mut consumer = log.consumer("g");
    consumer.subscribe(&topics(&["product-updates"])).await.unwrap();

    let first = consumer.poll(WAIT).await.unwrap().unwrap();
    let second = consumer.poll(WAIT).await.unwrap().unwrap();
    assert_eq!(first.payload, b"a");
    assert_eq!(first.position.offset, 0);
    assert_eq!(second.payload, b"b");
    assert_eq!(second.position.offset, 1);

    assert!(consumer.poll(WAIT).await.unwrap().is_none(), "empty poll is a timeout, not an error");
}

#[tokio::test]
async fn poll_wakes_on_append() {
    let log = MemoryLog::new();
    let mut consumer = log.consumer("g");
    consumer.subscribe(&topics(&["user-updates"])).await.unwrap();

    let writer = log.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.append("user-updates", b"late".to_vec());
    });

    let message = consumer.poll(Duration::from_secs(5)).await.unwrap();
    assert_eq!(message.map(|m| m.payload), Some(b"late".to_vec()));
}

#[tokio::test]
async fn producer_reports_final_position() {
    let log = MemoryLog::new();
    let producer = log.producer();

    let report = producer.send("product-updates", b"{}".to_vec()).await.unwrap();
    match report.await.unwrap() {
        shopstream_events::DeliveryReport::Delivered(position) => {
            assert_eq!(position.topic, "product-updates");
            assert_eq!(position.offset, 0);
        }
        other => panic!("unexpected report: {other:?}"),
    }
    assert_eq!(log.len("product-updates"), 1);
}

#[tokio::test]
async fn consumer_reads_all_subscribed_topics() {
    let log = MemoryLog::new();
    log.append("product-updates", b"p".to_vec());
    log.append("user-updates", b"u".to_vec());

    let mut consumer = log.consumer("g");
    consumer
        .subscribe(&topics(&["product-updates", "user-updates"]))
        .await
        .unwrap();

    let mut seen = vec![
        consumer.poll(WAIT).await.unwrap().unwrap().payload,
        consumer.poll(WAIT).await.unwrap().unwrap().payload,
    ];
    seen.sort();
    assert_eq!(seen, vec![b"p".to_vec(), b"u".to_vec()]);
}

// =========================================================================
// Group positions
// =========================================================================

#[tokio::test]
async fn uncommitted_messages_are_redelivered_to_the_next_consumer() {
    let log = MemoryLog::new();
    log.append("product-updates", b"a".to_vec());
    log.append("product-updates", b"b".to_vec());

    let mut first = log.consumer("analytics_service");
    first.subscribe(&topics(&["product-updates"])).await.unwrap();
    let a = first.poll(WAIT).await.unwrap().unwrap();
    first.store_offset(&a.position).await.unwrap();
    let _b = first.poll(WAIT).await.unwrap().unwrap();
    first.close().await.unwrap();

    assert_eq!(log.committed_offset("analytics_service", "product-updates", 0), Some(1));

    let mut second = log.consumer("analytics_service");
    second.subscribe(&topics(&["product-updates"])).await.unwrap();
    let redelivered = second.poll(WAIT).await.unwrap().unwrap();
    assert_eq!(redelivered.payload, b"b");
}

#[tokio::test]
async fn groups_track_positions_independently() {
    let log = MemoryLog::new();
    log.append("product-updates", b"a".to_vec());

    let mut analytics = log.consumer("analytics_service");
    analytics.subscribe(&topics(&["product-updates"])).await.unwrap();
    let message = analytics.poll(WAIT).await.unwrap().unwrap();
    analytics.store_offset(&message.position).await.unwrap();

    let mut recommendations = log.consumer("recommendation_service");
    recommendations.subscribe(&topics(&["product-updates"])).await.unwrap();
    assert!(recommendations.poll(WAIT).await.unwrap().is_some());
    assert_eq!(log.committed_offset("recommendation_service", "product-updates", 0), None);
}

#[tokio::test]
async fn stored_offset_never_moves_back() {
    let log = MemoryLog::new();
    for payload in ["a", "b", "c"] {
        log.append("product-updates", payload.as_bytes().to_vec());
    }

    let mut consumer = log.consumer("g");
    consumer.subscribe(&topics(&["product-updates"])).await.unwrap();
    let a = consumer.poll(WAIT).await.unwrap().unwrap();
    let _ = consumer.poll(WAIT).await.unwrap().unwrap();
    let c = consumer.poll(WAIT).await.unwrap().unwrap();

    consumer.store_offset(&c.position).await.unwrap();
    consumer.store_offset(&a.position).await.unwrap();
    assert_eq!(log.committed_offset("g", "product-updates", 0), Some(3));
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn subscribe_rejects_empty_topic_list() {
    let log = MemoryLog::new();
    let mut consumer = log.consumer("g");
    let err = consumer.subscribe(&[]).await.unwrap_err();
    assert!(matches!(err, TransportError::Subscribe(_)));
}

#[tokio::test]
async fn closed_consumer_refuses_work() {
    let log = MemoryLog::new();
    let mut consumer = log.consumer("g");
    consumer.subscribe(&topics(&["product-updates"])).await.unwrap();
    consumer.close().await.unwrap();

    assert!(matches!(consumer.poll(WAIT).await, Err(TransportError::Closed)));
    assert!(matches!(consumer.close().await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn closed_producer_rejects_sends() {
    let log = MemoryLog::new();
    let producer = log.producer();
    producer.close().await;

    let err = producer.send("product-updates", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed));
    assert_eq!(log.len("product-updates"), 0);
}

#[tokio::test]
async fn partitions_are_filled_round_robin() {
    let log = MemoryLog::with_partitions(2);
    let a = log.append("user-updates", b"a".to_vec());
    let b = log.append("user-updates", b"b".to_vec());
    let c = log.append("user-updates", b"c".to_vec());

    assert_eq!((a.partition, a.offset), (0, 0));
    assert_eq!((b.partition, b.offset), (1, 0));
    assert_eq!((c.partition, c.offset), (0, 1));
}

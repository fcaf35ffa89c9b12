//! Integration tests for PgLog.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::time::Duration;

use shopstream_events::{LogConsumer, LogProducer, PgLog, Publisher};
use sqlx::PgPool;
use uuid::Uuid;

/// Get a migrated test pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    sqlx::migrate!("../../migrations").run(&pool).await.ok()?;
    Some(pool)
}

/// Topics and groups are unique per test so tests can share one database.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn appends_get_consecutive_offsets() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let log = PgLog::new(pool);
    let topic = unique("product-updates");

    let a = log.append(&topic, b"a").await?;
    let b = log.append(&topic, b"b").await?;
    assert_eq!((a.offset, b.offset), (0, 1));
    Ok(())
}

#[tokio::test]
async fn published_message_is_consumed_and_committed() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let log = PgLog::new(pool);
    let topic = unique("user-updates");
    let group = unique("analytics_service");

    let publisher = Publisher::new(
        std::sync::Arc::new(log.producer()),
        topic.clone(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    );
    let position = publisher.publish(br#"{"id":"u1"}"#).await?;

    let mut consumer = log.consumer(group.clone());
    consumer.subscribe(&[topic.clone()]).await?;
    let message = consumer
        .poll(Duration::from_secs(2))
        .await?
        .expect("message should be readable after confirmation");
    assert_eq!(message.position, position);
    assert_eq!(message.payload, br#"{"id":"u1"}"#);

    consumer.store_offset(&message.position).await?;
    assert_eq!(log.committed_offset(&group, &topic).await?, Some(1));

    publisher.close().await;
    Ok(())
}

#[tokio::test]
async fn restart_resumes_from_committed_offset() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let log = PgLog::new(pool);
    let topic = unique("product-updates");
    let group = unique("recommendation_service");
    log.append(&topic, b"a").await?;
    log.append(&topic, b"b").await?;

    let mut first = log.consumer(group.clone());
    first.subscribe(&[topic.clone()]).await?;
    let a = first.poll(Duration::from_secs(1)).await?.expect("a");
    first.store_offset(&a.position).await?;
    let _b = first.poll(Duration::from_secs(1)).await?.expect("b");
    first.close().await?;

    let mut second = log.consumer(group.clone());
    second.subscribe(&[topic.clone()]).await?;
    let redelivered = second.poll(Duration::from_secs(1)).await?.expect("redelivery");
    assert_eq!(redelivered.payload, b"b");
    Ok(())
}

#[tokio::test]
async fn committed_offset_never_moves_back() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let log = PgLog::new(pool);
    let topic = unique("product-updates");
    let group = unique("g");
    let a = log.append(&topic, b"a").await?;
    let b = log.append(&topic, b"b").await?;

    let mut consumer = log.consumer(group.clone());
    consumer.subscribe(&[topic.clone()]).await?;
    consumer.store_offset(&b).await?;
    consumer.store_offset(&a).await?;

    assert_eq!(log.committed_offset(&group, &topic).await?, Some(2));
    Ok(())
}

#[tokio::test]
async fn empty_poll_times_out_quietly() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let log = PgLog::new(pool);
    let mut consumer = log.consumer(unique("g"));
    consumer.subscribe(&[unique("quiet")]).await?;

    assert!(consumer.poll(Duration::from_millis(150)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn flush_waits_for_in_flight_appends() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let log = PgLog::new(pool);
    let topic = unique("product-updates");
    let producer = log.producer();

    let mut reports = Vec::new();
    for i in 0..5 {
        reports.push(producer.send(&topic, format!("{i}").into_bytes()).await?);
    }
    producer.flush(Duration::from_secs(5)).await?;

    for report in reports {
        assert!(matches!(
            report.await?,
            shopstream_events::DeliveryReport::Delivered(_)
        ));
    }
    Ok(())
}

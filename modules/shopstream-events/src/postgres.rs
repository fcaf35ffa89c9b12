//! PgLog: a durable log on three Postgres tables.
//!
//! * `log_topics` holds the next offset per topic. Appends bump it inside the
//!   same transaction that inserts the record, so the row lock serialises
//!   appends and offsets become visible in order without gaps.
//! * `log_messages` is append-only.
//! * `log_consumer_offsets` holds each group's next offset per partition.
//!   Writes go through `GREATEST`, so a committed position never moves back.
//!
//! Everything lives on partition 0. Consumers poll on an interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{LogConsumer, LogProducer};
use crate::types::{DeliveryReport, LogMessage, TopicPartition};

const PARTITION: i32 = 0;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// PgLog
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgLog {
    pool: PgPool,
}

impl PgLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn producer(&self) -> PgProducer {
        PgProducer {
            pool: self.pool.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn consumer(&self, group: impl Into<String>) -> PgConsumer {
        PgConsumer {
            pool: self.pool.clone(),
            group: group.into(),
            topics: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        }
    }

    /// Append one record and return its position.
    pub async fn append(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<TopicPartition, TransportError> {
        append(&self.pool, topic, payload).await
    }

    /// The group's next offset to read, if it ever committed.
    pub async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
    ) -> Result<Option<i64>, TransportError> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT next_offset FROM log_consumer_offsets
             WHERE group_id = $1 AND topic = $2 AND partition_id = $3",
        )
        .bind(group)
        .bind(topic)
        .bind(PARTITION)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }
}

async fn append(
    pool: &PgPool,
    topic: &str,
    payload: &[u8],
) -> Result<TopicPartition, TransportError> {
    let mut tx = pool.begin().await?;

    let (offset,) = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO log_topics (topic, next_offset) VALUES ($1, 1)
        ON CONFLICT (topic) DO UPDATE SET next_offset = log_topics.next_offset + 1
        RETURNING next_offset - 1
        "#,
    )
    .bind(topic)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO log_messages (topic, partition_id, log_offset, payload)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(topic)
    .bind(PARTITION)
    .bind(offset)
    .bind(payload)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(TopicPartition::new(topic, PARTITION, offset))
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Each `send` runs its append on a spawned task and reports on a oneshot.
pub struct PgProducer {
    pool: PgPool,
    closed: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

#[async_trait]
impl LogProducer for PgProducer {
    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<oneshot::Receiver<DeliveryReport>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if topic.is_empty() {
            return Err(TransportError::SendRejected {
                topic: String::new(),
                reason: "topic name is empty".to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let pool = self.pool.clone();
        let in_flight = self.in_flight.clone();
        let topic = topic.to_string();
        in_flight.count.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let report = match append(&pool, &topic, &payload).await {
                Ok(position) => DeliveryReport::Delivered(position),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Append failed");
                    DeliveryReport::Failed {
                        topic,
                        reason: e.to_string(),
                    }
                }
            };
            let _ = tx.send(report);
            if in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
                in_flight.idle.notify_waiters();
            }
        });

        Ok(rx)
    }

    async fn flush(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            let pending = self.in_flight.count.load(Ordering::Acquire);
            if pending == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return Err(TransportError::FlushTimeout {
                    pending: self.in_flight.count.load(Ordering::Acquire),
                });
            }
        }
    }

    /// The pool is shared with the rest of the process and stays open.
    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

pub struct PgConsumer {
    pool: PgPool,
    group: String,
    topics: Vec<String>,
    /// Next offset to fetch per topic.
    positions: HashMap<String, i64>,
    cursor: usize,
    closed: bool,
}

impl PgConsumer {
    async fn fetch_next(&mut self) -> Result<Option<LogMessage>, TransportError> {
        for step in 0..self.topics.len() {
            let index = (self.cursor + step) % self.topics.len();
            let topic = &self.topics[index];
            let from = self.positions.get(topic).copied().unwrap_or(0);

            let row = sqlx::query_as::<_, (i64, Vec<u8>, DateTime<Utc>)>(
                r#"
                SELECT log_offset, payload, produced_at
                FROM log_messages
                WHERE topic = $1 AND partition_id = $2 AND log_offset >= $3
                ORDER BY log_offset ASC
                LIMIT 1
                "#,
            )
            .bind(topic)
            .bind(PARTITION)
            .bind(from)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((offset, payload, ts)) = row {
                let message = LogMessage {
                    position: TopicPartition::new(topic.clone(), PARTITION, offset),
                    payload,
                    ts,
                };
                self.positions.insert(topic.clone(), offset + 1);
                self.cursor = (index + 1) % self.topics.len();
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LogConsumer for PgConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if topics.is_empty() {
            return Err(TransportError::Subscribe("no topics given".to_string()));
        }
        if let Some(bad) = topics.iter().find(|t| t.is_empty()) {
            return Err(TransportError::Subscribe(format!("invalid topic name '{bad}'")));
        }

        let committed = sqlx::query_as::<_, (String, i64)>(
            "SELECT topic, next_offset FROM log_consumer_offsets
             WHERE group_id = $1 AND partition_id = $2 AND topic = ANY($3)",
        )
        .bind(&self.group)
        .bind(PARTITION)
        .bind(topics)
        .fetch_all(&self.pool)
        .await?;

        self.topics = topics.to_vec();
        self.positions = committed.into_iter().collect();
        self.cursor = 0;

        debug!(
            group = %self.group,
            topics = ?self.topics,
            positions = ?self.positions,
            "Subscribed"
        );
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.fetch_next().await? {
                return Ok(Some(message));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn store_offset(&mut self, position: &TopicPartition) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        sqlx::query(
            r#"
            INSERT INTO log_consumer_offsets (group_id, topic, partition_id, next_offset)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, topic, partition_id) DO UPDATE
            SET next_offset = GREATEST(log_consumer_offsets.next_offset, EXCLUDED.next_offset),
                updated_at = now()
            "#,
        )
        .bind(&self.group)
        .bind(&position.topic)
        .bind(position.partition)
        .bind(position.offset + 1)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        Ok(())
    }
}

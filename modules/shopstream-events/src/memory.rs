//! In-process log. Topics are created on first use, records are kept for the
//! life of the `MemoryLog`, and committed positions are tracked per group so
//! that a fresh consumer in the same group resumes where the last one
//! committed. Used by tests and by the single-process `all` role.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Notify};

use crate::error::TransportError;
use crate::transport::{LogConsumer, LogProducer};
use crate::types::{DeliveryReport, LogMessage, TopicPartition};

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Record {
    payload: Vec<u8>,
    ts: DateTime<Utc>,
}

#[derive(Default)]
struct TopicLog {
    partitions: Vec<Vec<Record>>,
    next_partition: usize,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    /// (group, topic, partition) -> next offset to read.
    committed: HashMap<(String, String, i32), i64>,
    /// Topics whose deliveries are reported as failed, with the reason.
    rejected: HashMap<String, String>,
}

struct Inner {
    state: Mutex<BrokerState>,
    appended: Notify,
    partitions: usize,
}

/// Shared handle to an in-process log. Cloning shares the same topics.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Messages are spread over partitions round-robin.
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
                partitions: partitions.max(1),
            }),
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            log: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn consumer(&self, group: impl Into<String>) -> MemoryConsumer {
        MemoryConsumer {
            log: self.clone(),
            group: group.into(),
            assigned: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        }
    }

    /// Append directly, bypassing any producer. Returns the final position.
    pub fn append(&self, topic: &str, payload: impl Into<Vec<u8>>) -> TopicPartition {
        let position = {
            let mut state = self.state();
            self.append_locked(&mut state, topic, payload.into())
        };
        self.inner.appended.notify_waiters();
        position
    }

    /// Every delivery to `topic` is reported as failed with `reason` until
    /// `accept_topic` is called. Nothing is appended.
    pub fn reject_topic(&self, topic: &str, reason: &str) {
        self.state()
            .rejected
            .insert(topic.to_string(), reason.to_string());
    }

    pub fn accept_topic(&self, topic: &str) {
        self.state().rejected.remove(topic);
    }

    /// The group's next offset to read for a partition, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Number of records across all partitions of `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.state()
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state()
            .topics
            .get(topic)
            .map(|log| {
                log.partitions
                    .iter()
                    .flatten()
                    .map(|r| r.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn topic_log<'a>(&self, state: &'a mut BrokerState, topic: &str) -> &'a mut TopicLog {
        let partitions = self.inner.partitions;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog {
                partitions: vec![Vec::new(); partitions],
                next_partition: 0,
            })
    }

    fn append_locked(
        &self,
        state: &mut BrokerState,
        topic: &str,
        payload: Vec<u8>,
    ) -> TopicPartition {
        let log = self.topic_log(state, topic);
        let partition = log.next_partition;
        log.next_partition = (partition + 1) % log.partitions.len();

        let records = &mut log.partitions[partition];
        records.push(Record {
            payload,
            ts: Utc::now(),
        });
        TopicPartition::new(topic, partition as i32, records.len() as i64 - 1)
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

pub struct MemoryProducer {
    log: MemoryLog,
    closed: AtomicBool,
}

#[async_trait]
impl LogProducer for MemoryProducer {
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
        let report = {
            let mut state = self.log.state();
            let rejected = state.rejected.get(topic).cloned();
            match rejected {
                Some(reason) => DeliveryReport::Failed {
                    topic: topic.to_string(),
                    reason,
                },
                None => {
                    let position = self.log.append_locked(&mut state, topic, payload);
                    DeliveryReport::Delivered(position)
                }
            }
        };
        if matches!(report, DeliveryReport::Delivered(_)) {
            self.log.inner.appended.notify_waiters();
        }
        // The caller may have stopped waiting; that is its business.
        let _ = tx.send(report);
        Ok(rx)
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), TransportError> {
        // Deliveries complete inside `send`.
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

pub struct MemoryConsumer {
    log: MemoryLog,
    group: String,
    assigned: Vec<String>,
    /// Fetch positions. Advanced on poll; committed positions move only on
    /// `store_offset`.
    positions: HashMap<(String, i32), i64>,
    cursor: usize,
    closed: bool,
}

impl MemoryConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    fn next_record(&mut self) -> Option<LogMessage> {
        let state = self.log.state();

        let mut slots = Vec::new();
        for topic in &self.assigned {
            if let Some(log) = state.topics.get(topic) {
                for partition in 0..log.partitions.len() {
                    slots.push((topic.clone(), partition));
                }
            }
        }
        if slots.is_empty() {
            return None;
        }

        for step in 0..slots.len() {
            let (topic, partition) = &slots[(self.cursor + step) % slots.len()];
            let key = (topic.clone(), *partition as i32);
            let position = match self.positions.get(&key) {
                Some(p) => *p,
                None => state
                    .committed
                    .get(&(self.group.clone(), topic.clone(), *partition as i32))
                    .copied()
                    .unwrap_or(0),
            };

            let records = &state.topics[topic].partitions[*partition];
            if let Some(record) = records.get(position as usize) {
                let message = LogMessage {
                    position: TopicPartition::new(topic.clone(), *partition as i32, position),
                    payload: record.payload.clone(),
                    ts: record.ts,
                };
                self.positions.insert(key, position + 1);
                self.cursor = (self.cursor + step + 1) % slots.len();
                return Some(message);
            }
        }
        None
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
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

        {
            let mut state = self.log.state();
            for topic in topics {
                self.log.topic_log(&mut state, topic);
            }
        }
        self.assigned = topics.to_vec();
        self.positions.clear();
        self.cursor = 0;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        let log = self.log.clone();

        loop {
            // Register interest before checking so an append between the
            // check and the wait is not missed.
            let appended = log.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(message) = self.next_record() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn store_offset(&mut self, position: &TopicPartition) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.log.state();
        let next = position.offset + 1;
        let entry = state
            .committed
            .entry((
                self.group.clone(),
                position.topic.clone(),
                position.partition,
            ))
            .or_insert(next);
        *entry = (*entry).max(next);
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

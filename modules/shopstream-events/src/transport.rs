//! The seam between the pipeline and a concrete log.
//!
//! Implemented by `MemoryLog` (tests, single-process) and `PgLog` (Postgres).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::types::{DeliveryReport, LogMessage, TopicPartition};

/// Appends messages to topics.
///
/// `send` only hands the message over. The outcome arrives later on the
/// returned channel, mirroring a broker's asynchronous delivery reports.
#[async_trait]
pub trait LogProducer: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<oneshot::Receiver<DeliveryReport>, TransportError>;

    /// Wait for every outstanding delivery, up to `timeout`.
    async fn flush(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Release the producer. Later sends fail with `TransportError::Closed`.
    async fn close(&self);
}

/// Reads messages for one consumer group.
#[async_trait]
pub trait LogConsumer: Send {
    /// Bind to `topics`. Reading resumes from the group's committed positions.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Next message, or `Ok(None)` if nothing arrived within `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>, TransportError>;

    /// Record that `position` has been handled. The group resumes from
    /// `position.offset + 1`; a stored position never moves backwards.
    async fn store_offset(&mut self, position: &TopicPartition) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

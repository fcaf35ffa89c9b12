use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PublishError, TransportError};
use crate::transport::LogProducer;
use crate::types::{DeliveryReport, TopicPartition};

pub const MESSAGES_PUBLISHED: &str = "shopstream_messages_published_total";

/// Publishes to one topic and waits for the delivery report before
/// returning, so a write request can tell its caller the event was lost.
///
/// Cheap to clone; every clone shares the producer.
#[derive(Clone)]
pub struct Publisher {
    producer: Arc<dyn LogProducer>,
    topic: String,
    confirm_timeout: Duration,
    flush_timeout: Duration,
}

impl Publisher {
    pub fn new(
        producer: Arc<dyn LogProducer>,
        topic: impl Into<String>,
        confirm_timeout: Duration,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            confirm_timeout,
            flush_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, payload: &[u8]) -> Result<TopicPartition, PublishError> {
        self.publish_to(&self.topic, payload).await
    }

    pub async fn publish_json<T: Serialize>(
        &self,
        event: &T,
    ) -> Result<TopicPartition, PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.publish(&payload).await
    }

    pub async fn publish_to(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<TopicPartition, PublishError> {
        let result = self.send_and_confirm(topic, payload).await;

        let status = if result.is_ok() { "delivered" } else { "failed" };
        metrics::counter!(
            MESSAGES_PUBLISHED,
            "topic" => topic.to_string(),
            "status" => status,
        )
        .increment(1);
        result
    }

    async fn send_and_confirm(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<TopicPartition, PublishError> {
        let report = self
            .producer
            .send(topic, payload.to_vec())
            .await
            .map_err(PublishError::Send)?;

        let outcome = match tokio::time::timeout(self.confirm_timeout, report).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                return Err(PublishError::ConfirmationDropped {
                    topic: topic.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    topic,
                    timeout_ms = self.confirm_timeout.as_millis() as u64,
                    "No delivery confirmation"
                );
                return Err(PublishError::ConfirmationTimeout {
                    topic: topic.to_string(),
                    waited: self.confirm_timeout,
                });
            }
        };

        match outcome {
            DeliveryReport::Delivered(position) => {
                debug!(position = %position, "Delivered");
                Ok(position)
            }
            DeliveryReport::Failed { topic, reason } => {
                Err(PublishError::Delivery { topic, reason })
            }
            DeliveryReport::Other(kind) => Err(PublishError::UnknownOutcome(kind)),
        }
    }

    /// Flush outstanding deliveries, then release the producer. A flush
    /// timeout is logged and does not stop the close.
    pub async fn close(&self) {
        match self.producer.flush(self.flush_timeout).await {
            Ok(()) => {}
            Err(TransportError::FlushTimeout { pending }) => {
                warn!(topic = %self.topic, pending, "Flush timed out, closing anyway");
            }
            Err(e) => warn!(topic = %self.topic, error = %e, "Flush failed, closing anyway"),
        }
        self.producer.close().await;
        info!(topic = %self.topic, "Publisher closed");
    }
}

//! Core types for the log. Domain-agnostic.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a message lives in the log. Offsets are opaque to callers and only
/// compared within one (topic, partition).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A consumed message. The payload is the producer's bytes, untouched.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub position: TopicPartition,
    pub payload: Vec<u8>,
    pub ts: DateTime<Utc>,
}

impl LogMessage {
    pub fn topic(&self) -> &str {
        &self.position.topic
    }

    /// Lossy text view of the payload, for log lines.
    pub fn payload_preview(&self) -> String {
        const MAX: usize = 256;
        let text = String::from_utf8_lossy(&self.payload);
        if text.chars().count() > MAX {
            let cut: String = text.chars().take(MAX).collect();
            format!("{cut}...")
        } else {
            text.into_owned()
        }
    }
}

/// What the transport reports back for one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Appended; the position is final.
    Delivered(TopicPartition),
    /// The broker refused or lost the message.
    Failed { topic: String, reason: String },
    /// The transport answered with something that is not a delivery report.
    /// Signals a transport contract violation, not a business failure.
    Other(String),
}

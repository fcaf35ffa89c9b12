//! Outcome counters and timings around a handler, recorded through the
//! `metrics` facade. Whatever recorder the process installed receives them.

use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::error::HandlerError;
use crate::handler::EventHandler;

pub const MESSAGES_CONSUMED: &str = "shopstream_messages_consumed_total";
pub const MESSAGE_PROCESSING_SECONDS: &str = "shopstream_message_processing_duration_seconds";

pub struct Instrumented<H> {
    inner: H,
    topic: String,
}

impl<H: EventHandler> Instrumented<H> {
    pub fn new(topic: impl Into<String>, inner: H) -> Self {
        Self {
            inner,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for Instrumented<H> {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let started = Instant::now();
        let result = self.inner.handle(payload).await;
        let elapsed = started.elapsed();

        let status = match &result {
            Ok(()) => "success",
            Err(e) if e.is_permanent() => "invalid",
            Err(_) => "error",
        };
        metrics::counter!(
            MESSAGES_CONSUMED,
            "topic" => self.topic.clone(),
            "handler" => self.inner.name().to_string(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(
            MESSAGE_PROCESSING_SECONDS,
            "topic" => self.topic.clone(),
            "handler" => self.inner.name().to_string(),
        )
        .record(elapsed.as_secs_f64());

        debug!(
            topic = %self.topic,
            handler = self.inner.name(),
            status,
            elapsed_us = elapsed.as_micros() as u64,
            "Handler call"
        );
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

//! Typed errors for the log, the publisher, the dispatcher, and handlers.

use std::time::Duration;

use shopstream_common::ValidationError;
use thiserror::Error;

use crate::dispatcher::DispatcherState;

/// Errors raised by a log backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The producer or consumer was already closed.
    #[error("transport closed")]
    Closed,

    /// The consumer could not bind to its topics.
    #[error("subscription rejected: {0}")]
    Subscribe(String),

    /// The transport refused to accept a message for sending.
    #[error("send rejected for topic '{topic}': {reason}")]
    SendRejected { topic: String, reason: String },

    /// Outstanding deliveries did not finish before the flush deadline.
    #[error("flush timed out with {pending} deliveries outstanding")]
    FlushTimeout { pending: usize },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced synchronously to a publishing caller.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("error sending message to the log: {0}")]
    Send(#[source] TransportError),

    #[error("delivery to '{topic}' failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("unknown delivery outcome: {0}")]
    UnknownOutcome(String),

    #[error("no delivery confirmation from '{topic}' within {waited:?}")]
    ConfirmationTimeout { topic: String, waited: Duration },

    #[error("delivery report for '{topic}' was dropped by the transport")]
    ConfirmationDropped { topic: String },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A handler could not apply an event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HandlerError::Store(Box::new(err))
    }

    /// Decode and validation failures can never succeed on redelivery.
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Decode(_) | HandlerError::Validation(_))
    }
}

/// Errors from the dispatcher lifecycle.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot {action} while {state:?}")]
    State {
        action: &'static str,
        state: DispatcherState,
    },

    #[error("subscribing group '{group}' failed: {source}")]
    Subscribe {
        group: String,
        #[source]
        source: TransportError,
    },

    #[error("consumer closed underneath the poll loop")]
    ConsumerClosed,

    #[error("closing consumer failed: {0}")]
    Close(#[source] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence() {
        let decode = serde_json::from_slice::<serde_json::Value>(b"{nope").unwrap_err();
        assert!(HandlerError::Decode(decode).is_permanent());
        assert!(HandlerError::Validation(ValidationError::Required("id")).is_permanent());
        assert!(!HandlerError::store(TransportError::Closed).is_permanent());
    }
}

//! The consume loop.
//!
//! One dispatcher owns one consumer and handles one message at a time.
//! A position is stored only after its handler succeeded. Stored positions
//! are per partition and only move forward, so a later success on the same
//! partition commits past an earlier failure. A restart redelivers a failed
//! message only when nothing after it on its partition was committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shopstream_common::{FailurePolicy, Topic};
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, TransportError};
use crate::handler::HandlerBindings;
use crate::transport::LogConsumer;
use crate::types::LogMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Subscribed,
    Running,
    Stopping,
    Closed,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Longest single wait for a message. Also bounds how long a stop
    /// request can go unnoticed.
    pub poll_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            failure_policy: FailurePolicy::Redeliver,
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Handler succeeded, position stored.
    Committed,
    /// No handler for the topic. Position stored.
    Skipped,
    /// Handler failed permanently under `FailurePolicy::Skip`. Position stored.
    Discarded,
    /// Handler failed. Position not stored.
    Failed,
    /// Handler succeeded but storing the position failed.
    CommitFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub committed: u64,
    pub skipped: u64,
    pub discarded: u64,
    pub failed: u64,
    pub commit_failed: u64,
    pub poll_errors: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: Dispatched) {
        match outcome {
            Dispatched::Committed => self.committed += 1,
            Dispatched::Skipped => self.skipped += 1,
            Dispatched::Discarded => self.discarded += 1,
            Dispatched::Failed => self.failed += 1,
            Dispatched::CommitFailed => self.commit_failed += 1,
        }
    }
}

pub struct Dispatcher {
    consumer: Box<dyn LogConsumer>,
    group: String,
    topics: Vec<String>,
    bindings: HandlerBindings,
    config: DispatcherConfig,
    state: DispatcherState,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        consumer: Box<dyn LogConsumer>,
        group: impl Into<String>,
        topics: Vec<String>,
        bindings: HandlerBindings,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            consumer,
            group: group.into(),
            topics,
            bindings,
            config,
            state: DispatcherState::Created,
            stats: DispatchStats::default(),
        }
    }

    /// Subscribe to exactly the topics that have a handler bound.
    pub fn for_bindings(
        consumer: Box<dyn LogConsumer>,
        group: impl Into<String>,
        bindings: HandlerBindings,
        config: DispatcherConfig,
    ) -> Self {
        let topics = bindings.topics();
        Self::new(consumer, group, topics, bindings, config)
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// `Created → Subscribed`. A failure here means the process cannot do
    /// its job; callers treat it as fatal.
    pub async fn subscribe(&mut self) -> Result<(), DispatchError> {
        self.expect_state(DispatcherState::Created, "subscribe")?;

        self.consumer
            .subscribe(&self.topics)
            .await
            .map_err(|source| DispatchError::Subscribe {
                group: self.group.clone(),
                source,
            })?;

        self.state = DispatcherState::Subscribed;
        info!(group = %self.group, topics = ?self.topics, "Subscribed");
        Ok(())
    }

    /// `Subscribed → Running → Stopping`. Returns once `stop` is observed.
    ///
    /// The flag is checked before every poll and again when a message
    /// arrives; a message that arrives after the stop request is left
    /// unhandled and uncommitted.
    pub async fn run(&mut self, stop: &AtomicBool) -> Result<DispatchStats, DispatchError> {
        self.expect_state(DispatcherState::Subscribed, "run")?;
        self.state = DispatcherState::Running;
        info!(group = %self.group, "Dispatcher running");

        while !stop.load(Ordering::Acquire) {
            let message = match self.consumer.poll(self.config.poll_timeout).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(TransportError::Closed) => {
                    self.state = DispatcherState::Stopping;
                    return Err(DispatchError::ConsumerClosed);
                }
                Err(e) => {
                    self.stats.poll_errors += 1;
                    warn!(group = %self.group, error = %e, "Poll failed, continuing");
                    continue;
                }
            };

            if stop.load(Ordering::Acquire) {
                debug!(
                    position = %message.position,
                    "Stop requested, leaving message for redelivery"
                );
                break;
            }

            self.dispatch(&message).await;
        }

        self.state = DispatcherState::Stopping;
        info!(group = %self.group, stats = ?self.stats, "Dispatcher stopping");
        Ok(self.stats)
    }

    /// Route one message and store its position if that is allowed.
    pub async fn dispatch(&mut self, message: &LogMessage) -> Dispatched {
        let outcome = self.route(message).await;
        self.stats.record(outcome);
        outcome
    }

    async fn route(&mut self, message: &LogMessage) -> Dispatched {
        let topic = Topic::parse(message.topic());

        // 1. Resolve the handler
        let handler = match self.bindings.handler_for(&topic) {
            Some(handler) => handler.clone(),
            None => {
                warn!(
                    group = %self.group,
                    position = %message.position,
                    known = topic.is_known(),
                    "No handler for topic, skipping"
                );
                return match self.commit(message).await {
                    true => Dispatched::Skipped,
                    false => Dispatched::CommitFailed,
                };
            }
        };

        // 2. Handle
        match handler.handle(&message.payload).await {
            Ok(()) => match self.commit(message).await {
                true => {
                    debug!(handler = handler.name(), position = %message.position, "Handled");
                    Dispatched::Committed
                }
                false => Dispatched::CommitFailed,
            },
            Err(e) if e.is_permanent() && self.config.failure_policy == FailurePolicy::Skip => {
                error!(
                    handler = handler.name(),
                    position = %message.position,
                    payload = %message.payload_preview(),
                    error = %e,
                    "Discarding message that can never be handled"
                );
                match self.commit(message).await {
                    true => Dispatched::Discarded,
                    false => Dispatched::CommitFailed,
                }
            }
            // 3. Leave the position where it is
            Err(e) => {
                error!(
                    handler = handler.name(),
                    position = %message.position,
                    permanent = e.is_permanent(),
                    error = %e,
                    "Handler failed, message not committed"
                );
                Dispatched::Failed
            }
        }
    }

    async fn commit(&mut self, message: &LogMessage) -> bool {
        match self.consumer.store_offset(&message.position).await {
            Ok(()) => true,
            Err(e) => {
                warn!(position = %message.position, error = %e, "Failed to store position");
                false
            }
        }
    }

    /// `→ Closed`. Consumes the dispatcher; the error is for the caller to
    /// log, shutdown should carry on regardless.
    pub async fn close(mut self) -> Result<DispatchStats, DispatchError> {
        self.state = DispatcherState::Closed;
        self.consumer.close().await.map_err(DispatchError::Close)?;
        info!(group = %self.group, "Consumer closed");
        Ok(self.stats)
    }

    fn expect_state(
        &self,
        expected: DispatcherState,
        action: &'static str,
    ) -> Result<(), DispatchError> {
        if self.state != expected {
            return Err(DispatchError::State {
                action,
                state: self.state,
            });
        }
        Ok(())
    }
}

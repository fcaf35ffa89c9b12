use std::sync::Arc;

use async_trait::async_trait;
use shopstream_common::{Topic, PRODUCT_UPDATES, USER_UPDATES};

use crate::error::HandlerError;

/// Applies one consumed payload. Called sequentially by the dispatcher.
///
/// Delivery is at-least-once: a handler may see the same payload again
/// after a failure or a restart.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;

    /// Stable name for logs and metrics.
    fn name(&self) -> &str;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        (**self).handle(payload).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Which handler runs for which topic. Built explicitly by each service
/// role and handed to its dispatcher.
#[derive(Clone, Default)]
pub struct HandlerBindings {
    product_updates: Option<Arc<dyn EventHandler>>,
    user_updates: Option<Arc<dyn EventHandler>>,
}

impl HandlerBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_product_updates(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.product_updates = Some(handler);
        self
    }

    pub fn on_user_updates(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.user_updates = Some(handler);
        self
    }

    /// `None` for unknown topics and for known topics this role ignores.
    pub fn handler_for(&self, topic: &Topic) -> Option<&Arc<dyn EventHandler>> {
        match topic {
            Topic::ProductUpdates => self.product_updates.as_ref(),
            Topic::UserUpdates => self.user_updates.as_ref(),
            Topic::Unknown(_) => None,
        }
    }

    /// Topic names with a bound handler, for subscribing.
    pub fn topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        if self.product_updates.is_some() {
            topics.push(PRODUCT_UPDATES.to_string());
        }
        if self.user_updates.is_some() {
            topics.push(USER_UPDATES.to_string());
        }
        topics
    }
}

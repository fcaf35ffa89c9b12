//! Event handlers that maintain the aggregates.
//!
//! Each handler decodes, validates, then increments. Redelivery of the same
//! event increments again; delivery is at-least-once and nothing here
//! deduplicates.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shopstream_common::{ProductEvent, UserEvent};
use shopstream_events::{EventHandler, HandlerError};
use tracing::{debug, info};

use crate::store::{ProductRef, RecommendationStore, StatisticsStore};

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(payload).map_err(HandlerError::Decode)
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// `product-updates` → `product_statistics.update_count`.
pub struct ProductActivityHandler {
    store: Arc<dyn StatisticsStore>,
}

impl ProductActivityHandler {
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ProductActivityHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: ProductEvent = decode(payload)?;
        event.validate()?;

        let count = self
            .store
            .record_product_update(&event.id)
            .await
            .map_err(HandlerError::store)?;

        info!(product_id = %event.id, update_count = count, "Product statistics updated");
        Ok(())
    }

    fn name(&self) -> &str {
        "product_activity"
    }
}

/// `user-updates` → `user_statistics.activity_count`.
pub struct UserActivityHandler {
    store: Arc<dyn StatisticsStore>,
}

impl UserActivityHandler {
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for UserActivityHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: UserEvent = decode(payload)?;
        event.validate()?;

        let count = self
            .store
            .record_user_activity(&event.id)
            .await
            .map_err(HandlerError::store)?;

        info!(user_id = %event.id, activity_count = count, "User statistics updated");
        Ok(())
    }

    fn name(&self) -> &str {
        "user_activity"
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// `product-updates` → `recommendations.popularity_score`, carrying the
/// product's name and price onto the row.
pub struct ProductPopularityHandler {
    store: Arc<dyn RecommendationStore>,
}

impl ProductPopularityHandler {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ProductPopularityHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: ProductEvent = decode(payload)?;
        event.validate()?;

        let score = self
            .store
            .bump_popularity(ProductRef {
                id: &event.id,
                name: event.name.as_deref(),
                price: event.price,
            })
            .await
            .map_err(HandlerError::store)?;

        info!(product_id = %event.id, popularity_score = score, "Recommendation updated");
        Ok(())
    }

    fn name(&self) -> &str {
        "product_popularity"
    }
}

/// `user-updates` → one popularity increment per cart line.
///
/// Lines are applied in order and the first failure fails the whole event.
/// Increments already applied stay; the redelivered event applies them again.
pub struct CartPopularityHandler {
    store: Arc<dyn RecommendationStore>,
}

impl CartPopularityHandler {
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for CartPopularityHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: UserEvent = decode(payload)?;
        event.validate()?;
        event.validate_cart()?;

        for item in &event.cart {
            let score = self
                .store
                .bump_popularity(ProductRef::id(&item.product_id))
                .await
                .map_err(HandlerError::store)?;
            debug!(
                user_id = %event.id,
                product_id = %item.product_id,
                popularity_score = score,
                "Cart item counted"
            );
        }

        info!(user_id = %event.id, items = event.cart.len(), "Cart popularity applied");
        Ok(())
    }

    fn name(&self) -> &str {
        "cart_popularity"
    }
}

//! Storage seams for the aggregates.
//!
//! Every `record_*`/`bump_*` call is find-or-create-increment done as one
//! atomic step: the first observation of an id creates its row with the
//! counter at 1, later ones add exactly 1. Returns the new counter value.

use async_trait::async_trait;
use shopstream_common::{ProductStatistics, Recommendation, UserStatistics};

use crate::error::StoreError;

#[async_trait]
pub trait StatisticsStore: Send + Sync {
    async fn record_product_update(&self, product_id: &str) -> Result<i64, StoreError>;

    async fn record_user_activity(&self, user_id: &str) -> Result<i64, StoreError>;

    async fn product_statistics(
        &self,
        product_id: &str,
    ) -> Result<Option<ProductStatistics>, StoreError>;

    async fn user_statistics(&self, user_id: &str) -> Result<Option<UserStatistics>, StoreError>;
}

/// The product a popularity bump applies to. `name` and `price` are only
/// known when the bump comes from a product event; when present they
/// replace what the row holds.
#[derive(Debug, Clone, Copy)]
pub struct ProductRef<'a> {
    pub id: &'a str,
    pub name: Option<&'a str>,
    pub price: Option<f64>,
}

impl<'a> ProductRef<'a> {
    pub fn id(id: &'a str) -> Self {
        Self {
            id,
            name: None,
            price: None,
        }
    }
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn bump_popularity(&self, product: ProductRef<'_>) -> Result<i64, StoreError>;

    /// Highest `popularity_score` first. Order among equal scores is
    /// whatever the backend yields.
    async fn top_recommendations(&self, limit: i64) -> Result<Vec<Recommendation>, StoreError>;

    async fn recommendation(&self, id: &str) -> Result<Option<Recommendation>, StoreError>;
}

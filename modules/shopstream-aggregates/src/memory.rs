//! In-memory aggregate store for tests and the single-process deployment.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use shopstream_common::{ProductStatistics, Recommendation, UserStatistics};

use crate::error::StoreError;
use crate::store::{ProductRef, RecommendationStore, StatisticsStore};

#[derive(Default)]
struct Aggregates {
    product_updates: HashMap<String, i64>,
    user_activity: HashMap<String, i64>,
    recommendations: HashMap<String, Recommendation>,
}

/// Both stores behind one lock. Increments happen under the lock, so
/// concurrent callers never lose an update.
#[derive(Default)]
pub struct MemoryAggregateStore {
    inner: Mutex<Aggregates>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a recommendation row as-is.
    pub fn seed_recommendation(&self, recommendation: Recommendation) {
        self.lock()
            .recommendations
            .insert(recommendation.id.clone(), recommendation);
    }

    fn lock(&self) -> MutexGuard<'_, Aggregates> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn increment(counters: &mut HashMap<String, i64>, id: &str) -> i64 {
    let counter = counters.entry(id.to_string()).or_insert(0);
    *counter += 1;
    *counter
}

#[async_trait]
impl StatisticsStore for MemoryAggregateStore {
    async fn record_product_update(&self, product_id: &str) -> Result<i64, StoreError> {
        Ok(increment(&mut self.lock().product_updates, product_id))
    }

    async fn record_user_activity(&self, user_id: &str) -> Result<i64, StoreError> {
        Ok(increment(&mut self.lock().user_activity, user_id))
    }

    async fn product_statistics(
        &self,
        product_id: &str,
    ) -> Result<Option<ProductStatistics>, StoreError> {
        Ok(self
            .lock()
            .product_updates
            .get(product_id)
            .map(|count| ProductStatistics {
                product_id: product_id.to_string(),
                update_count: *count,
            }))
    }

    async fn user_statistics(&self, user_id: &str) -> Result<Option<UserStatistics>, StoreError> {
        Ok(self
            .lock()
            .user_activity
            .get(user_id)
            .map(|count| UserStatistics {
                user_id: user_id.to_string(),
                activity_count: *count,
            }))
    }
}

#[async_trait]
impl RecommendationStore for MemoryAggregateStore {
    async fn bump_popularity(&self, product: ProductRef<'_>) -> Result<i64, StoreError> {
        let mut aggregates = self.lock();
        let row = aggregates
            .recommendations
            .entry(product.id.to_string())
            .or_insert_with(|| Recommendation {
                id: product.id.to_string(),
                name: String::new(),
                price: 0.0,
                popularity_score: 0,
            });

        row.popularity_score += 1;
        if let Some(name) = product.name.filter(|n| !n.is_empty()) {
            row.name = name.to_string();
        }
        if let Some(price) = product.price {
            row.price = price;
        }
        Ok(row.popularity_score)
    }

    /// Ties are broken by id so in-memory results are repeatable.
    async fn top_recommendations(&self, limit: i64) -> Result<Vec<Recommendation>, StoreError> {
        let mut rows: Vec<Recommendation> = self.lock().recommendations.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.popularity_score
                .cmp(&a.popularity_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn recommendation(&self, id: &str) -> Result<Option<Recommendation>, StoreError> {
        Ok(self.lock().recommendations.get(id).cloned())
    }
}

//! Cache-aside read of the ranked recommendations list.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::error::{CacheError, ReadError};
use crate::store::RecommendationStore;

pub const DEFAULT_LIMIT: i64 = 10;

pub const CACHE_REQUESTS: &str = "shopstream_cache_requests_total";

fn count_cache(operation: &'static str, status: &'static str) {
    metrics::counter!(CACHE_REQUESTS, "operation" => operation, "status" => status).increment(1);
}

/// `recommendations:limit:<N>`
pub fn cache_key(limit: i64) -> String {
    format!("recommendations:limit:{limit}")
}

/// The `limit` query parameter. Absent, non-numeric, zero, or negative
/// values all fall back to the default.
pub fn resolve_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_LIMIT)
}

/// A serialized response and whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationsBody {
    pub body: String,
    pub cached: bool,
}

#[derive(Clone)]
pub struct RecommendationReader {
    store: Arc<dyn RecommendationStore>,
    cache: Arc<dyn ResponseCache>,
    ttl: Duration,
}

impl RecommendationReader {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        cache: Arc<dyn ResponseCache>,
        ttl: Duration,
    ) -> Self {
        Self { store, cache, ttl }
    }

    pub async fn read(&self, limit: i64) -> Result<RecommendationsBody, ReadError> {
        let key = cache_key(limit);

        match self.cache.get(&key).await {
            Ok(Some(body)) => {
                count_cache("get", "hit");
                debug!(key = %key, "Cache hit");
                return Ok(RecommendationsBody { body, cached: true });
            }
            Ok(None) => {
                count_cache("get", "miss");
                debug!(key = %key, "Cache miss");
            }
            Err(e) => {
                count_cache("get", "error");
                warn!(key = %key, error = %e, "Cache read failed, falling back to store");
            }
        }

        let rows = self.store.top_recommendations(limit).await?;
        let body = serde_json::to_string(&rows)?;

        match self.cache.set(&key, &body, self.ttl).await {
            Ok(()) => count_cache("set", "success"),
            Err(e) => {
                count_cache("set", "error");
                warn!(key = %key, error = %e, "Failed to cache recommendations");
            }
        }

        Ok(RecommendationsBody {
            body,
            cached: false,
        })
    }

    /// Release entries past their TTL so unread keys do not pile up.
    pub async fn evict_expired(&self) -> Result<u64, CacheError> {
        let removed = self.cache.evict_expired().await?;
        if removed > 0 {
            debug!(removed, "Evicted expired cache entries");
        }
        Ok(removed)
    }

    pub async fn close(&self) {
        if let Err(e) = self.cache.close().await {
            warn!(error = %e, "Closing cache failed");
        }
    }
}

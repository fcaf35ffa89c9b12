//! Response cache for pre-serialized read bodies.
//!
//! Entries are advisory: a miss, an expired entry, or a cache error only
//! costs a store query.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;

use crate::error::CacheError;

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// `None` when the key is absent, expired, or holds an empty value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Drop every expired entry. Returns how many were removed.
    async fn evict_expired(&self) -> Result<u64, CacheError>;

    async fn close(&self) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Map behind a read/write lock. `None` once closed.
pub struct MemoryCache {
    entries: RwLock<Option<HashMap<String, Entry>>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Entries held right now, expired or not.
    pub async fn len(&self) -> Result<usize, CacheError> {
        let guard = self.entries.read().await;
        guard.as_ref().map(HashMap::len).ok_or(CacheError::Closed)
    }

    async fn remove_if_expired(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.entries.write().await;
        let entries = guard.as_mut().ok_or(CacheError::Closed)?;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let expired = {
            let guard = self.entries.read().await;
            let entries = guard.as_ref().ok_or(CacheError::Closed)?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at <= Instant::now() => true,
                Some(entry) if entry.value.is_empty() => return Ok(None),
                Some(entry) => return Ok(Some(entry.value.clone())),
            }
        };

        if expired {
            self.remove_if_expired(key).await?;
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut guard = self.entries.write().await;
        let entries = guard.as_mut().ok_or(CacheError::Closed)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn evict_expired(&self) -> Result<u64, CacheError> {
        let mut guard = self.entries.write().await;
        let entries = guard.as_mut().ok_or(CacheError::Closed)?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok((before - entries.len()) as u64)
    }

    async fn close(&self) -> Result<(), CacheError> {
        let mut guard = self.entries.write().await;
        match guard.take() {
            Some(_) => Ok(()),
            None => Err(CacheError::Closed),
        }
    }
}

// ---------------------------------------------------------------------------
// PgCache
// ---------------------------------------------------------------------------

/// `response_cache` table with an `expires_at` column. A read that finds
/// an expired row deletes it; `evict_expired` sweeps the rest.
#[derive(Clone)]
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResponseCache for PgCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM response_cache
             WHERE cache_key = $1 AND expires_at > now() AND body <> ''",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            sqlx::query("DELETE FROM response_cache WHERE cache_key = $1 AND expires_at <= now()")
                .bind(key)
                .execute(&self.pool)
                .await?;
        }
        Ok(row.map(|(body,)| body))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        sqlx::query(
            r#"
            INSERT INTO response_cache (cache_key, body, expires_at)
            VALUES ($1, $2, now() + ($3 * interval '1 millisecond'))
            ON CONFLICT (cache_key) DO UPDATE
            SET body = EXCLUDED.body,
                expires_at = EXCLUDED.expires_at,
                created_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn evict_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// The pool belongs to the process; closing the cache leaves it open.
    async fn close(&self) -> Result<(), CacheError> {
        info!("Response cache released");
        Ok(())
    }
}

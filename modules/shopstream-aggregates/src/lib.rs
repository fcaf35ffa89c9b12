//! Aggregates derived from the event log, and the cached read path over them.
//!
//! Handlers turn product and user events into counter increments. The
//! recommendations reader serves the ranked popularity list cache-aside.

pub mod cache;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod postgres;
pub mod recommendations;
pub mod store;

pub use cache::{MemoryCache, PgCache, ResponseCache};
pub use error::{CacheError, ReadError, StoreError};
pub use handlers::{
    CartPopularityHandler, ProductActivityHandler, ProductPopularityHandler, UserActivityHandler,
};
pub use memory::MemoryAggregateStore;
pub use postgres::PgAggregateStore;
pub use recommendations::{
    cache_key, resolve_limit, RecommendationReader, RecommendationsBody, DEFAULT_LIMIT,
};
pub use store::{ProductRef, RecommendationStore, StatisticsStore};

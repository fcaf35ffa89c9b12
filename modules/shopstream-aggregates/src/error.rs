use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache closed")]
    Closed,

    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// The ranked read failed. Cache trouble never ends up here.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to fetch recommendations: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode recommendations: {0}")]
    Encode(#[from] serde_json::Error),
}

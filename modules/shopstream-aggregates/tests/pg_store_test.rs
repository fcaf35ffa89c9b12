//! Integration tests for PgAggregateStore and PgCache.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::time::Duration;

use shopstream_aggregates::{
    PgAggregateStore, PgCache, ProductRef, RecommendationStore, ResponseCache, StatisticsStore,
};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    sqlx::migrate!("../../migrations").run(&pool).await.ok()?;
    Some(pool)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn upsert_creates_at_one_then_increments() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let store = PgAggregateStore::new(pool);
    let product = unique("p");
    let user = unique("u");

    assert_eq!(store.record_product_update(&product).await?, 1);
    assert_eq!(store.record_product_update(&product).await?, 2);
    assert_eq!(store.record_user_activity(&user).await?, 1);

    let stats = store.product_statistics(&product).await?.expect("row");
    assert_eq!(stats.update_count, 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_increments_are_not_lost() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let store = PgAggregateStore::new(pool);
    let product = unique("p");

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let product = product.clone();
        tasks.push(tokio::spawn(async move {
            store.bump_popularity(ProductRef::id(&product)).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let row = store.recommendation(&product).await?.expect("row");
    assert_eq!(row.popularity_score, 10);
    Ok(())
}

#[tokio::test]
async fn product_details_fill_in_and_refresh() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let store = PgAggregateStore::new(pool);
    let id = unique("p");

    store.bump_popularity(ProductRef::id(&id)).await?;
    store
        .bump_popularity(ProductRef {
            id: &id,
            name: Some("Lamp"),
            price: Some(12.5),
        })
        .await?;
    store
        .bump_popularity(ProductRef {
            id: &id,
            name: Some(""),
            price: None,
        })
        .await?;

    let row = store.recommendation(&id).await?.expect("row");
    assert_eq!(row.name, "Lamp");
    assert_eq!(row.price, 12.5);
    assert_eq!(row.popularity_score, 3);
    Ok(())
}

#[tokio::test]
async fn pg_cache_honours_ttl() -> anyhow::Result<()> {
    let Some(pool) = test_pool().await else {
        return Ok(());
    };
    let cache = PgCache::new(pool.clone());
    let live = unique("recommendations:limit");
    let dead = unique("recommendations:limit");
    let unread = unique("recommendations:limit");

    cache.set(&live, "[1]", Duration::from_secs(60)).await?;
    cache.set(&dead, "[2]", Duration::ZERO).await?;
    cache.set(&unread, "[3]", Duration::ZERO).await?;

    assert_eq!(cache.get(&live).await?.as_deref(), Some("[1]"));
    assert_eq!(cache.get(&dead).await?, None);

    let (held,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM response_cache WHERE cache_key = $1")
            .bind(&dead)
            .fetch_one(&pool)
            .await?;
    assert_eq!(held, 0, "expired row deleted on read");

    assert!(cache.evict_expired().await? >= 1);
    assert_eq!(cache.get(&live).await?.as_deref(), Some("[1]"));
    Ok(())
}

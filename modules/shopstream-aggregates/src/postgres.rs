//! Postgres aggregate store.
//!
//! Find-or-create-increment is a single `INSERT ... ON CONFLICT DO UPDATE`,
//! so two dispatchers sharing a partition cannot lose an update.

use async_trait::async_trait;
use shopstream_common::{ProductStatistics, Recommendation, UserStatistics};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::store::{ProductRef, RecommendationStore, StatisticsStore};

#[derive(Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a recommendation row as-is.
    pub async fn seed_recommendation(&self, row: &Recommendation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO recommendations (id, name, price, popularity_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price = EXCLUDED.price,
                popularity_score = EXCLUDED.popularity_score,
                updated_at = now()
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(row.price)
        .bind(row.popularity_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    id: String,
    name: String,
    price: f64,
    popularity_score: i64,
}

impl From<RecommendationRow> for Recommendation {
    fn from(row: RecommendationRow) -> Self {
        Recommendation {
            id: row.id,
            name: row.name,
            price: row.price,
            popularity_score: row.popularity_score,
        }
    }
}

#[async_trait]
impl StatisticsStore for PgAggregateStore {
    async fn record_product_update(&self, product_id: &str) -> Result<i64, StoreError> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO product_statistics (product_id, update_count)
            VALUES ($1, 1)
            ON CONFLICT (product_id) DO UPDATE
            SET update_count = product_statistics.update_count + 1,
                updated_at = now()
            RETURNING update_count
            "#,
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn record_user_activity(&self, user_id: &str) -> Result<i64, StoreError> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO user_statistics (user_id, activity_count)
            VALUES ($1, 1)
            ON CONFLICT (user_id) DO UPDATE
            SET activity_count = user_statistics.activity_count + 1,
                updated_at = now()
            RETURNING activity_count
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn product_statistics(
        &self,
        product_id: &str,
    ) -> Result<Option<ProductStatistics>, StoreError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT product_id, update_count FROM product_statistics WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(product_id, update_count)| ProductStatistics {
            product_id,
            update_count,
        }))
    }

    async fn user_statistics(&self, user_id: &str) -> Result<Option<UserStatistics>, StoreError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT user_id, activity_count FROM user_statistics WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, activity_count)| UserStatistics {
            user_id,
            activity_count,
        }))
    }
}

#[async_trait]
impl RecommendationStore for PgAggregateStore {
    async fn bump_popularity(&self, product: ProductRef<'_>) -> Result<i64, StoreError> {
        let name = product.name.filter(|n| !n.is_empty());

        let (score,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO recommendations (id, name, price, popularity_score)
            VALUES ($1, COALESCE($2, ''), COALESCE($3, 0), 1)
            ON CONFLICT (id) DO UPDATE
            SET popularity_score = recommendations.popularity_score + 1,
                name = COALESCE($2, recommendations.name),
                price = COALESCE($3, recommendations.price),
                updated_at = now()
            RETURNING popularity_score
            "#,
        )
        .bind(product.id)
        .bind(name)
        .bind(product.price)
        .fetch_one(&self.pool)
        .await?;
        Ok(score)
    }

    async fn top_recommendations(&self, limit: i64) -> Result<Vec<Recommendation>, StoreError> {
        let rows = sqlx::query_as::<_, RecommendationRow>(
            r#"
            SELECT id, name, price, popularity_score
            FROM recommendations
            ORDER BY popularity_score DESC
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Recommendation::from).collect())
    }

    async fn recommendation(&self, id: &str) -> Result<Option<Recommendation>, StoreError> {
        let row = sqlx::query_as::<_, RecommendationRow>(
            "SELECT id, name, price, popularity_score FROM recommendations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Recommendation::from))
    }
}

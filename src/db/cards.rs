use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

use crate::models::snapshot::{
    CardSnapshot, LegacyMetrics, PostRow, ReviewRow, ServiceRow, StatsRow, SOURCE_YANDEX_MAPS,
};
use crate::services::gateway::{CardWrite, PersistError, PersistenceGateway};

/// Postgres INTEGER columns for optional counters.
fn int(value: Option<u32>) -> Option<i32> {
    value.map(|v| i32::try_from(v).unwrap_or(i32::MAX))
}

#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_card_version(
    conn: &mut PgConnection,
    business_id: &str,
    mut snapshot: CardSnapshot,
) -> Result<i32, PersistError> {
    let prior = sqlx::query(
        r#"
        SELECT version, snapshot FROM card_versions
        WHERE business_id = $1
        ORDER BY version DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?;

    let version = match prior {
        Some(row) => {
            let version: i32 = row.try_get("version")?;
            let Json(value): Json<serde_json::Value> = row.try_get("snapshot")?;
            match serde_json::from_value::<CardSnapshot>(value) {
                Ok(prior) => snapshot.inherit_rich_fields(&prior),
                Err(e) => tracing::warn!(business_id, version, error = %e, "Prior snapshot unreadable, not inheriting"),
            }
            version + 1
        }
        None => 1,
    };

    sqlx::query(
        r#"
        INSERT INTO card_versions (business_id, version, url, title, rating, reviews_count,
                                   quality_score, snapshot)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(business_id)
    .bind(version)
    .bind(&snapshot.url)
    .bind(&snapshot.title)
    .bind(snapshot.rating)
    .bind(int(snapshot.reviews_count))
    .bind(snapshot.quality_score)
    .bind(Json(serde_json::to_value(&snapshot)?))
    .execute(&mut *conn)
    .await?;

    Ok(version)
}

async fn upsert_review_rows(conn: &mut PgConnection, rows: &[ReviewRow]) -> Result<(), PersistError> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO external_reviews (id, business_id, source, author, rating, text,
                                          response_text, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET rating = COALESCE(EXCLUDED.rating, external_reviews.rating),
                text = EXCLUDED.text,
                response_text = COALESCE(EXCLUDED.response_text, external_reviews.response_text),
                published_at = COALESCE(EXCLUDED.published_at, external_reviews.published_at),
                updated_at = NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.business_id)
        .bind(&row.source)
        .bind(&row.author)
        .bind(row.rating)
        .bind(&row.text)
        .bind(&row.response_text)
        .bind(&row.published_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_post_rows(conn: &mut PgConnection, rows: &[PostRow]) -> Result<(), PersistError> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO external_posts (id, business_id, source, title, text, published_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET title = COALESCE(EXCLUDED.title, external_posts.title),
                text = EXCLUDED.text,
                updated_at = NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.business_id)
        .bind(&row.source)
        .bind(&row.title)
        .bind(&row.text)
        .bind(&row.published_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_stats_rows(conn: &mut PgConnection, rows: &[StatsRow]) -> Result<(), PersistError> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO external_stats (id, business_id, source, date, rating, reviews_count,
                                        photos_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET rating = EXCLUDED.rating,
                reviews_count = EXCLUDED.reviews_count,
                photos_count = EXCLUDED.photos_count,
                updated_at = NOW()
            "#,
        )
        .bind(&row.id)
        .bind(&row.business_id)
        .bind(&row.source)
        .bind(row.date)
        .bind(row.rating)
        .bind(int(row.reviews_count))
        .bind(int(row.photos_count))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn replace_parsed_services(
    conn: &mut PgConnection,
    business_id: &str,
    owner_id: Option<&str>,
    rows: &[ServiceRow],
) -> Result<usize, PersistError> {
    // Manual rows are never touched.
    sqlx::query("DELETE FROM services WHERE business_id = $1 AND source = $2")
        .bind(business_id)
        .bind(SOURCE_YANDEX_MAPS)
        .execute(&mut *conn)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO services (business_id, owner_id, category, name, price_from, price_to,
                                  description, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(business_id)
        .bind(owner_id)
        .bind(&row.category)
        .bind(&row.name)
        .bind(row.price_from)
        .bind(row.price_to)
        .bind(&row.description)
        .bind(&row.source)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

async fn upsert_legacy_metrics(
    conn: &mut PgConnection,
    business_id: &str,
    metrics: &LegacyMetrics,
) -> Result<(), PersistError> {
    sqlx::query(
        r#"
        INSERT INTO business_metrics (business_id, rating, reviews_count, photos_count,
                                      news_count, products_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (business_id) DO UPDATE
        SET rating = EXCLUDED.rating,
            reviews_count = EXCLUDED.reviews_count,
            photos_count = EXCLUDED.photos_count,
            news_count = EXCLUDED.news_count,
            products_count = EXCLUDED.products_count,
            updated_at = NOW()
        "#,
    )
    .bind(business_id)
    .bind(metrics.rating)
    .bind(int(metrics.reviews_count))
    .bind(int(metrics.photos_count))
    .bind(int(Some(metrics.news_count)))
    .bind(int(Some(metrics.products_count)))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn save_new_card_version(
        &self,
        business_id: &str,
        snapshot: CardSnapshot,
    ) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;
        let version = insert_card_version(&mut *tx, business_id, snapshot).await?;
        tx.commit().await?;
        tracing::info!(business_id, version, "Card version saved");
        Ok(())
    }

    async fn upsert_reviews(&self, rows: &[ReviewRow]) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;
        upsert_review_rows(&mut *tx, rows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_posts(&self, rows: &[PostRow]) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;
        upsert_post_rows(&mut *tx, rows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_stats(&self, rows: &[StatsRow]) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;
        upsert_stats_rows(&mut *tx, rows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_parsed_services(
        &self,
        business_id: &str,
        owner_id: Option<&str>,
        rows: &[ServiceRow],
    ) -> Result<usize, PersistError> {
        let mut tx = self.pool.begin().await?;
        let saved = replace_parsed_services(&mut *tx, business_id, owner_id, rows).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn write_legacy_metrics(
        &self,
        business_id: &str,
        metrics: &LegacyMetrics,
    ) -> Result<(), PersistError> {
        let mut conn = self.pool.acquire().await?;
        upsert_legacy_metrics(&mut *conn, business_id, metrics).await
    }

    async fn persist_card(&self, write: CardWrite) -> Result<(), PersistError> {
        let business_id = write.business_id.as_str();
        let mut tx = self.pool.begin().await?;

        let version = insert_card_version(&mut *tx, business_id, write.snapshot).await?;
        let services = match &write.services {
            Some(rows) => {
                Some(replace_parsed_services(&mut *tx, business_id, write.owner_id.as_deref(), rows).await?)
            }
            None => None,
        };
        upsert_review_rows(&mut *tx, &write.reviews).await?;
        upsert_post_rows(&mut *tx, &write.posts).await?;
        upsert_stats_rows(&mut *tx, &write.stats).await?;
        upsert_legacy_metrics(&mut *tx, business_id, &write.legacy).await?;

        tx.commit().await?;
        tracing::info!(
            business_id,
            version,
            services = ?services,
            reviews = write.reviews.len(),
            posts = write.posts.len(),
            "Card persisted"
        );
        Ok(())
    }

    async fn resolve_map_url(&self, business_id: &str) -> Result<Option<String>, PersistError> {
        let row = sqlx::query("SELECT yandex_url FROM businesses WHERE id = $1")
            .bind(business_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => r.try_get::<Option<String>, _>("yandex_url")?,
            None => None,
        })
    }
}

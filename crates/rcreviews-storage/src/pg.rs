use async_trait::async_trait;
use rcreviews_core::{ReviewRecord, StoredReview};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;

use crate::{ReviewQuery, ReviewQueryResult, ReviewStore, SettingsStore, StoreError, UpsertOutcome};

const REVIEW_COLUMNS: &str = "id, post_type, unique_id, title, rating, reviewer_role, reviewer_name, \
     created_date, content, agent_id, agent_name, listing_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn review_from_row(row: &PgRow) -> Result<StoredReview, sqlx::Error> {
    Ok(StoredReview {
        id: row.try_get("id")?,
        post_type: row.try_get("post_type")?,
        record: ReviewRecord {
            unique_id: row.try_get("unique_id")?,
            title: row.try_get("title")?,
            rating: row.try_get("rating")?,
            reviewer_role: row.try_get("reviewer_role")?,
            reviewer_name: row.try_get("reviewer_name")?,
            created_date: row.try_get("created_date")?,
            content: row.try_get("content")?,
            agent_id: row.try_get("agent_id")?,
            agent_name: row.try_get("agent_name")?,
            listing_id: row.try_get("listing_id")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, post_type: &str, query: &ReviewQuery) {
    qb.push(" WHERE post_type = ")
        .push_bind(post_type.to_string())
        .push(" AND unique_id <> ''");
    if let Some(min) = query.min_rating {
        qb.push(" AND rating >= ").push_bind(min);
    }
    let by_id = !query.agent_ids.is_empty();
    let by_name = !query.agent_names.is_empty();
    if by_id && by_name {
        qb.push(" AND (agent_id = ANY(")
            .push_bind(query.agent_ids.clone())
            .push(") OR agent_name = ANY(")
            .push_bind(query.agent_names.clone())
            .push("))");
    } else if by_id {
        qb.push(" AND agent_id = ANY(")
            .push_bind(query.agent_ids.clone())
            .push(")");
    } else if by_name {
        qb.push(" AND agent_name = ANY(")
            .push_bind(query.agent_names.clone())
            .push(")");
    }
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn find_by_unique_id(
        &self,
        post_type: &str,
        unique_id: &str,
    ) -> Result<Option<StoredReview>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE post_type = $1 AND unique_id = $2 LIMIT 1"
        ))
        .bind(post_type)
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(review_from_row).transpose()?)
    }

    async fn insert(&self, post_type: &str, record: &ReviewRecord) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reviews (post_type, unique_id, title, rating, reviewer_role, reviewer_name,
                                 created_date, content, agent_id, agent_name, listing_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(post_type)
        .bind(&record.unique_id)
        .bind(&record.title)
        .bind(record.rating)
        .bind(&record.reviewer_role)
        .bind(&record.reviewer_name)
        .bind(record.created_date)
        .bind(&record.content)
        .bind(&record.agent_id)
        .bind(&record.agent_name)
        .bind(&record.listing_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update(&self, id: i64, post_type: &str, record: &ReviewRecord) -> Result<(), StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE reviews
               SET post_type = $2, unique_id = $3, title = $4, rating = $5, reviewer_role = $6,
                   reviewer_name = $7, created_date = $8, content = $9, agent_id = $10,
                   agent_name = $11, listing_id = $12, updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(post_type)
        .bind(&record.unique_id)
        .bind(&record.title)
        .bind(record.rating)
        .bind(&record.reviewer_role)
        .bind(&record.reviewer_name)
        .bind(record.created_date)
        .bind(&record.content)
        .bind(&record.agent_id)
        .bind(&record.agent_name)
        .bind(&record.listing_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Missing(id));
        }
        Ok(())
    }

    async fn upsert(&self, post_type: &str, record: &ReviewRecord) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO reviews (post_type, unique_id, title, rating, reviewer_role, reviewer_name,
                                 created_date, content, agent_id, agent_name, listing_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (post_type, unique_id) DO UPDATE
               SET title = EXCLUDED.title,
                   rating = EXCLUDED.rating,
                   reviewer_role = EXCLUDED.reviewer_role,
                   reviewer_name = EXCLUDED.reviewer_name,
                   created_date = EXCLUDED.created_date,
                   content = EXCLUDED.content,
                   agent_id = EXCLUDED.agent_id,
                   agent_name = EXCLUDED.agent_name,
                   listing_id = EXCLUDED.listing_id,
                   updated_at = NOW()
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(post_type)
        .bind(&record.unique_id)
        .bind(&record.title)
        .bind(record.rating)
        .bind(&record.reviewer_role)
        .bind(&record.reviewer_name)
        .bind(record.created_date)
        .bind(&record.content)
        .bind(&record.agent_id)
        .bind(&record.agent_name)
        .bind(&record.listing_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(UpsertOutcome {
            id: row.try_get("id")?,
            inserted: row.try_get("inserted")?,
        })
    }

    async fn count(&self, post_type: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reviews WHERE post_type = $1 AND unique_id <> ''",
        )
        .bind(post_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn delete_all(&self, post_type: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM reviews WHERE post_type = $1 AND unique_id <> ''")
            .bind(post_type)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn reassign_post_type(&self, from: &str, to: &str) -> Result<usize, StoreError> {
        if from == to {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM reviews r
             WHERE r.post_type = $1
               AND EXISTS (SELECT 1 FROM reviews t WHERE t.post_type = $2 AND t.unique_id = r.unique_id)
            "#,
        )
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?;
        let moved = sqlx::query(
            "UPDATE reviews SET post_type = $2, updated_at = NOW() WHERE post_type = $1 AND unique_id <> ''",
        )
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(moved.rows_affected() as usize)
    }

    async fn query(&self, post_type: &str, query: &ReviewQuery) -> Result<ReviewQueryResult, StoreError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reviews");
        push_filters(&mut count_qb, post_type, query);
        let found: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {REVIEW_COLUMNS} FROM reviews"));
        push_filters(&mut qb, post_type, query);
        qb.push(" ORDER BY created_date DESC, id DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        let reviews = rows
            .iter()
            .map(review_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReviewQueryResult {
            reviews,
            found: found.max(0) as usize,
        })
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get_option(&self, name: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM options WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_option(&self, name: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO options (name, value) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_option(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM options WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

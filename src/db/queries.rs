use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::models::job::StyleId;
use crate::services::collaborators::{RestyleRecord, ResultStore, StoreError};

/// Insert a restyle record, replacing any earlier record for the same job
pub async fn insert_record(pool: &PgPool, record: &RestyleRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO restyle_records
            (job_id, original_url, empty_url, styled_url, style_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (job_id) DO UPDATE
        SET original_url = EXCLUDED.original_url,
            empty_url = EXCLUDED.empty_url,
            styled_url = EXCLUDED.styled_url,
            style_id = EXCLUDED.style_id,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&record.job_id)
    .bind(&record.original_url)
    .bind(&record.empty_url)
    .bind(&record.styled_url)
    .bind(record.style_id.as_ref().map(StyleId::as_str))
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a record by job ID
pub async fn get_record(pool: &PgPool, job_id: &str) -> Result<Option<PgRow>, sqlx::Error> {
    sqlx::query(
        r#"
        SELECT job_id, original_url, empty_url, styled_url, style_id, created_at, updated_at
        FROM restyle_records
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

/// Update the artifact fields of an existing record. Returns the number of rows touched.
pub async fn update_record(pool: &PgPool, record: &RestyleRecord) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE restyle_records
        SET original_url = $2,
            empty_url = $3,
            styled_url = $4,
            style_id = $5,
            updated_at = NOW()
        WHERE job_id = $1
        "#,
    )
    .bind(&record.job_id)
    .bind(&record.original_url)
    .bind(&record.empty_url)
    .bind(&record.styled_url)
    .bind(record.style_id.as_ref().map(StyleId::as_str))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete a record by job ID
pub async fn delete_record(pool: &PgPool, job_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM restyle_records WHERE job_id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    Ok(())
}

fn record_from_row(row: &PgRow) -> Result<RestyleRecord, StoreError> {
    let style_id: Option<String> = row.try_get("style_id")?;
    let style_id = style_id
        .map(StyleId::parse)
        .transpose()
        .map_err(|e| StoreError::Invalid(e.to_string()))?;

    Ok(RestyleRecord {
        job_id: row.try_get("job_id")?,
        original_url: row.try_get("original_url")?,
        empty_url: row.try_get("empty_url")?,
        styled_url: row.try_get("styled_url")?,
        style_id,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// [`ResultStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn save(&self, record: &RestyleRecord) -> Result<(), StoreError> {
        insert_record(&self.pool, record).await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<RestyleRecord>, StoreError> {
        get_record(&self.pool, job_id)
            .await?
            .as_ref()
            .map(record_from_row)
            .transpose()
    }

    async fn update(&self, record: &RestyleRecord) -> Result<(), StoreError> {
        match update_record(&self.pool, record).await? {
            0 => Err(StoreError::NotFound(record.job_id.clone())),
            _ => Ok(()),
        }
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        delete_record(&self.pool, job_id).await?;
        Ok(())
    }
}

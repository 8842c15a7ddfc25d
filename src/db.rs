use crate::host::{JobId, JobItemId, RemoteMapping, RemoteMappingStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

/// PostgreSQL-backed remote mapping store
#[derive(Clone)]
pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    /// Connect and make sure the mapping table exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables (safe to run always)
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS oht_remote_mappings (
                id BIGSERIAL PRIMARY KEY,
                job_id BIGINT NOT NULL,
                job_item_id BIGINT NOT NULL,
                remote_project_id TEXT,
                remote_resource_uuid TEXT,
                word_count BIGINT NOT NULL DEFAULT 0,
                credits DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (job_item_id, remote_project_id)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create oht_remote_mappings table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_oht_remote_mappings_job_id
                ON oht_remote_mappings (job_id)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create oht_remote_mappings index")?;

        Ok(())
    }
}

fn to_bigint(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{} {} does not fit in BIGINT", column, value))
}

fn from_bigint(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("Negative {} {} in database", column, value))
}

fn from_row(row: &PgRow) -> Result<RemoteMapping> {
    Ok(RemoteMapping {
        job_id: JobId(from_bigint(row.try_get("job_id")?, "job_id")?),
        job_item_id: JobItemId(from_bigint(row.try_get("job_item_id")?, "job_item_id")?),
        remote_project_id: row.try_get("remote_project_id")?,
        remote_resource_uuid: row.try_get("remote_resource_uuid")?,
        word_count: from_bigint(row.try_get("word_count")?, "word_count")?,
        credits: row.try_get("credits")?,
    })
}

const SELECT_MAPPINGS: &str = "SELECT job_id, job_item_id, remote_project_id, remote_resource_uuid,
        word_count, credits
    FROM oht_remote_mappings";

#[async_trait]
impl RemoteMappingStore for PgMappingStore {
    async fn create(&self, mapping: RemoteMapping) -> Result<()> {
        sqlx::query(
            "INSERT INTO oht_remote_mappings
                (job_id, job_item_id, remote_project_id, remote_resource_uuid, word_count, credits)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(to_bigint(mapping.job_id.0, "job_id")?)
        .bind(to_bigint(mapping.job_item_id.0, "job_item_id")?)
        .bind(&mapping.remote_project_id)
        .bind(&mapping.remote_resource_uuid)
        .bind(to_bigint(mapping.word_count, "word_count")?)
        .bind(mapping.credits)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to store remote mapping for job item {}",
                mapping.job_item_id
            )
        })?;

        Ok(())
    }

    async fn load_by_job(&self, job_id: JobId) -> Result<Vec<RemoteMapping>> {
        let rows = sqlx::query(&format!("{} WHERE job_id = $1 ORDER BY id", SELECT_MAPPINGS))
            .bind(to_bigint(job_id.0, "job_id")?)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load remote mappings by job")?;

        rows.iter().map(from_row).collect()
    }

    async fn load_by_item(&self, job_item_id: JobItemId) -> Result<Vec<RemoteMapping>> {
        let rows = sqlx::query(&format!(
            "{} WHERE job_item_id = $1 ORDER BY id",
            SELECT_MAPPINGS
        ))
        .bind(to_bigint(job_item_id.0, "job_item_id")?)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load remote mappings by job item")?;

        rows.iter().map(from_row).collect()
    }
}

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Postgres, Transaction,
};
use tracing::{debug, info, warn};

use crate::errors::{Result, SegError};
use crate::job::{JobArtifacts, JobId, JobStatus, NewJob};
use crate::traits::JobStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS segmentation_jobs (
    id BIGSERIAL PRIMARY KEY,
    image_id UUID NOT NULL UNIQUE,
    image_url TEXT NOT NULL,
    model_name TEXT NOT NULL,
    status TEXT NOT NULL,
    mask_url TEXT,
    overlay_url TEXT,
    inference_time_ms DOUBLE PRECISION,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    completed_at TIMESTAMPTZ
)
"#;

/// PostgreSQL-backed [`JobStore`].
///
/// Every operation borrows one pooled connection for one transaction. The
/// transaction is committed on success and rolled back otherwise; dropping
/// an uncommitted [`Transaction`] also rolls it back, so the connection is
/// returned clean on every path.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to job database");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .test_before_acquire(true)
            .connect(database_url)
            .await
            .map_err(|e| SegError::database("connect", e))?;
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| SegError::database("create schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| SegError::database("begin transaction", e))
    }

    async fn finish<T>(
        tx: Transaction<'static, Postgres>,
        operation: &str,
        outcome: Result<T>,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| SegError::database(operation, e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed {} failed: {}", operation, rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn finish_job(
        &self,
        job_id: JobId,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        let outcome = match query.execute(&mut *tx).await {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(SegError::JobNotFound { job_id }),
            Err(e) => Err(SegError::database(operation, e)),
        };
        Self::finish(tx, operation, outcome).await
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new_job: &NewJob) -> Result<JobId> {
        let mut tx = self.begin().await?;
        let outcome = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO segmentation_jobs (image_id, image_url, model_name, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(new_job.image_id)
        .bind(&new_job.image_url)
        .bind(&new_job.model_name)
        .bind(JobStatus::Processing.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| SegError::database("create job", e));

        let job_id = Self::finish(tx, "create job", outcome).await?;
        debug!("Created job {} for image {}", job_id, new_job.image_id);
        Ok(job_id)
    }

    async fn complete_job(&self, job_id: JobId, artifacts: &JobArtifacts) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE segmentation_jobs
            SET mask_url = $2,
                overlay_url = $3,
                inference_time_ms = $4,
                status = $5,
                completed_at = now()
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(job_id)
        .bind(&artifacts.mask_url)
        .bind(&artifacts.overlay_url)
        .bind(artifacts.inference_time_ms)
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Processing.as_str());

        self.finish_job(job_id, "complete job", query).await
    }

    async fn fail_job(&self, job_id: JobId, reason: &str) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE segmentation_jobs
            SET error_message = $2,
                status = $3,
                completed_at = now()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .bind(JobStatus::Failed.as_str())
        .bind(JobStatus::Processing.as_str());

        self.finish_job(job_id, "fail job", query).await
    }
}

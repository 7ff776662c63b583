//! Postgres-backed job store.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED`, so any number of workers (and
//! processes) can poll the same table without handing one job to two workers
//! inside a lease.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database (unique violation `23505`) on enqueue | `AlreadyExists` |
//! | Database (other) | `Storage` |
//! | PoolClosed / Io / other | `Storage` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::{info, instrument};

use scribe_core::{CorrelationId, JobId, MeetingRef};

use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{to_chrono, Job, JobAttemptRecord, JobStatus};

const SCHEMA: &str = include_str!("../../migrations/0001_jobs.sql");

const JOB_COLUMNS: &str = r#"
    id, correlation_id, meeting_id, chat_id, user_id, status, attempts_made,
    last_error, created_at, updated_at, scheduled_at, locked_until, delivered_at, history
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool and make sure the jobs table exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        info!("job schema ready");
        Ok(())
    }

    async fn fetch_job(&self, operation: &str, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM minutes_jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.map(|r| decode(&r)).transpose()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, correlation_id = %job.correlation_id), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO minutes_jobs (
                id, correlation_id, meeting_id, chat_id, user_id, status, attempts_made,
                last_error, created_at, updated_at, scheduled_at, locked_until, delivered_at, history
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.correlation_id.as_uuid())
        .bind(&job.payload.meeting_id)
        .bind(&job.payload.chat_id)
        .bind(&job.payload.user_id)
        .bind(job.status.as_str())
        .bind(job.attempts_made as i32)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.scheduled_at)
        .bind(job.locked_until)
        .bind(job.delivered_at)
        .bind(Json(&job.history))
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("enqueue", e)
            }
        })?;

        Ok(job.id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.fetch_job("get", job_id).await
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            UPDATE minutes_jobs
            SET status = 'in_progress',
                attempts_made = attempts_made + 1,
                locked_until = $1,
                updated_at = $2
            WHERE id = (
                SELECT id FROM minutes_jobs
                WHERE (status = 'queued' AND (scheduled_at IS NULL OR scheduled_at <= $2))
                   OR (status = 'in_progress' AND locked_until <= $2)
                ORDER BY COALESCE(scheduled_at, created_at), id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now + to_chrono(lease))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(|r| decode(&r)).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn finish_attempt(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE minutes_jobs
            SET status = $3,
                last_error = $4,
                updated_at = $5,
                scheduled_at = $6,
                locked_until = $7,
                delivered_at = COALESCE(delivered_at, $8),
                history = $9
            WHERE id = $1 AND status = 'in_progress' AND attempts_made = $2
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.attempts_made as i32)
        .bind(job.status.as_str())
        .bind(&job.last_error)
        .bind(job.updated_at)
        .bind(job.scheduled_at)
        .bind(job.locked_until)
        .bind(job.delivered_at)
        .bind(Json(&job.history))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_attempt", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.fetch_job("finish_attempt", job.id).await? {
            Some(_) => Err(JobStoreError::LeaseLost(job.id)),
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn extend_lease(
        &self,
        job_id: JobId,
        attempts_made: u32,
        lease: Duration,
    ) -> Result<(), JobStoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE minutes_jobs
            SET locked_until = $3, updated_at = $4
            WHERE id = $1 AND status = 'in_progress' AND attempts_made = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(attempts_made as i32)
        .bind(now + to_chrono(lease))
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("extend_lease", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.fetch_job("extend_lease", job_id).await? {
            Some(_) => Err(JobStoreError::LeaseLost(job_id)),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn mark_delivered(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE minutes_jobs
            SET delivered_at = COALESCE(delivered_at, $2), updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_delivered", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM minutes_jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_status", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self), err)]
    async fn requeue_failed(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE minutes_jobs
            SET status = 'queued',
                attempts_made = 0,
                scheduled_at = NULL,
                locked_until = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'failed'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_failed", e))?;

        if let Some(row) = row {
            return decode(&row);
        }
        match self.fetch_job("requeue_failed", job_id).await? {
            Some(job) => Err(JobStoreError::InvalidState {
                id: job_id,
                status: job.status,
                expected: JobStatus::Failed,
            }),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM minutes_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            let status = status.parse::<JobStatus>().map_err(JobStoreError::Storage)?;
            stats.count(status, n.max(0) as u64);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), JobStoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

fn decode(row: &PgRow) -> Result<Job, JobStoreError> {
    JobRow::from_row(row)
        .map_err(|e| JobStoreError::Storage(format!("failed to decode job row: {e}")))?
        .try_into()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    correlation_id: uuid::Uuid,
    meeting_id: String,
    chat_id: String,
    user_id: String,
    status: String,
    attempts_made: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    history: Json<Vec<JobAttemptRecord>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            correlation_id: row.try_get("correlation_id")?,
            meeting_id: row.try_get("meeting_id")?,
            chat_id: row.try_get("chat_id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            attempts_made: row.try_get("attempts_made")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            locked_until: row.try_get("locked_until")?,
            delivered_at: row.try_get("delivered_at")?,
            history: row.try_get("history")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId::from_uuid(row.id),
            correlation_id: CorrelationId::from_uuid(row.correlation_id),
            payload: MeetingRef {
                meeting_id: row.meeting_id,
                chat_id: row.chat_id,
                user_id: row.user_id,
            },
            status: row.status.parse().map_err(JobStoreError::Storage)?,
            attempts_made: row.attempts_made.max(0) as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            scheduled_at: row.scheduled_at,
            locked_until: row.locked_until,
            delivered_at: row.delivered_at,
            history: row.history.0,
        })
    }
}

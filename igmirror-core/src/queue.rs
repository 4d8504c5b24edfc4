//! Job queue on top of the `sync_jobs` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::MirrorError;
use crate::jobs::{JobReport, SyncJob};

/// Producer side: what schedulers and HTTP handlers use.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &SyncJob) -> Result<Uuid, MirrorError>;

    /// Operator view of one job, `None` for unknown ids.
    async fn status(&self, id: Uuid) -> Result<Option<JobStatus>, MirrorError>;
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: SyncJob,
    /// 1-based attempt number of this run.
    pub attempt: u32,
    /// The job was `running` with an expired lease, so an earlier run never settled.
    pub reclaimed: bool,
}

/// Consumer side used by the worker pool.
#[async_trait]
pub trait JobBroker: JobQueue {
    /// Take the oldest due job, marking it running. A job whose lease ran out
    /// while `running` counts as due and is handed out again.
    async fn claim(&self) -> Result<Option<ClaimedJob>, MirrorError>;

    async fn finish(&self, id: Uuid, report: &JobReport) -> Result<(), MirrorError>;

    /// Put the job back to run again after `delay` as attempt `attempt`.
    async fn reschedule(
        &self,
        id: Uuid,
        attempt: u32,
        delay: Duration,
        reason: &str,
    ) -> Result<(), MirrorError>;
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    payload: Value,
    attempt: i32,
    prev_status: String,
}

/// Read-only view of a queue row for operators.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct JobStatus {
    pub id: Uuid,
    pub task: String,
    pub status: String,
    pub attempt: i32,
    pub result: Option<Value>,
    pub last_error: String,
    pub run_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How long a claimed job may stay `running` before another worker takes it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &SyncJob) -> Result<Uuid, MirrorError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (id, task, payload, attempt, status, run_at)
            VALUES ($1, $2, $3, 1, 'queued', NOW())
            "#,
        )
        .bind(id)
        .bind(job.task_name())
        .bind(serde_json::to_value(job)?)
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id = %id, task = job.task_name(), "Job enqueued");
        Ok(id)
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobStatus>, MirrorError> {
        let row = sqlx::query_as::<_, JobStatus>(
            r#"
            SELECT id, task, status, attempt, result, last_error, run_at, updated_at
            FROM sync_jobs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl JobBroker for PgJobQueue {
    async fn claim(&self) -> Result<Option<ClaimedJob>, MirrorError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            WITH next AS (
                SELECT id, status AS prev_status FROM sync_jobs
                WHERE (status = 'queued' AND run_at <= NOW())
                   OR (status = 'running' AND updated_at < NOW() - make_interval(secs => $1))
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE sync_jobs j
            SET status = 'running', updated_at = NOW()
            FROM next
            WHERE j.id = next.id
            RETURNING j.id, j.payload, j.attempt, next.prev_status
            "#,
        )
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let reclaimed = row.prev_status == "running";

        match serde_json::from_value::<SyncJob>(row.payload) {
            Ok(job) => Ok(Some(ClaimedJob {
                id: row.id,
                job,
                attempt: row.attempt.max(1) as u32,
                reclaimed,
            })),
            Err(e) => {
                tracing::error!(job_id = %row.id, error = %e, "Undecodable job payload");
                let report = JobReport::err(format!("Invalid job payload: {e}"), row.attempt as u32);
                self.finish(row.id, &report).await?;
                Ok(None)
            }
        }
    }

    async fn finish(&self, id: Uuid, report: &JobReport) -> Result<(), MirrorError> {
        let status = if report.success { "succeeded" } else { "failed" };
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = $2,
                result = $3,
                last_error = COALESCE($4, last_error),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(report.to_json())
        .bind(report.error.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempt: u32,
        delay: Duration,
        reason: &str,
    ) -> Result<(), MirrorError> {
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).map_err(|e| MirrorError::Other(e.to_string()))?;
        sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'queued',
                attempt = $2,
                run_at = $3,
                last_error = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt as i32)
        .bind(run_at)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

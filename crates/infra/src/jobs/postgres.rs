//! Postgres-backed job store.
//!
//! ## Concurrency
//!
//! - `next` claims with a single `UPDATE … WHERE id = (SELECT … FOR UPDATE SKIP LOCKED)`,
//!   so concurrent claimers skip rows another transaction is already taking
//!   instead of queueing behind it.
//! - `update` locks the one row with `SELECT … FOR UPDATE`, applies the mutator
//!   in Rust, writes the row back, and commits. Other rows are never touched.
//!
//! ## Error Mapping
//!
//! | Outcome | JobStoreError |
//! |---------|---------------|
//! | insert hit an existing id (`ON CONFLICT DO NOTHING`, zero rows) | `AlreadyExists` |
//! | row decode failure | `Corrupt` |
//! | any other SQLx error | `Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use kiln_core::JobId;

use super::store::{JobMutator, JobStore, JobStoreError};
use super::types::{ClaimFilter, Job, JobStatus, JobType};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id           UUID PRIMARY KEY,
    kind         TEXT NOT NULL,
    arch         TEXT NOT NULL,
    args         JSONB NOT NULL,
    dependencies UUID[] NOT NULL DEFAULT '{}',
    status       TEXT NOT NULL,
    canceled     BOOLEAN NOT NULL DEFAULT FALSE,
    result       JSONB,
    queued_at    TIMESTAMPTZ NOT NULL,
    started_at   TIMESTAMPTZ,
    finished_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS jobs_pending_idx ON jobs (queued_at) WHERE status = 'PENDING';
"#;

const COLUMNS: &str = "id, kind, arch, args, dependencies, status, canceled, result, queued_at, started_at, finished_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `jobs` table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        let deps: Vec<Uuid> = job.dependencies.iter().map(|d| *d.as_uuid()).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, arch, args, dependencies, status, canceled, result, queued_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.job_type.kind)
        .bind(&job.job_type.arch)
        .bind(&job.args)
        .bind(&deps)
        .bind(job.status.as_str())
        .bind(job.canceled)
        .bind(&job.result)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or(JobStoreError::NotFound(id))?;
        job_from_row(&row)
    }

    #[instrument(skip(self, mutator), err)]
    async fn update(&self, id: JobId, mutator: JobMutator) -> Result<Job, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update", e))?;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update", e))?
            .ok_or(JobStoreError::NotFound(id))?;

        let mut job = job_from_row(&row)?;
        // Dropping `tx` on error rolls back and releases the row lock.
        mutator(&mut job)?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, canceled = $3, result = $4, started_at = $5, finished_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.canceled)
        .bind(&job.result)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("update", e))?;
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn next(&self, filter: &ClaimFilter) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'RUNNING', started_at = $3
            WHERE status = 'PENDING' AND id = (
                SELECT j.id FROM jobs j
                WHERE j.status = 'PENDING'
                  AND j.kind = ANY($1)
                  AND j.arch = $2
                  AND NOT EXISTS (
                      SELECT 1 FROM jobs d
                      WHERE d.id = ANY(j.dependencies) AND d.status <> 'FINISHED'
                  )
                ORDER BY j.queued_at, j.id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&filter.kinds)
        .bind(&filter.arch)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("next", e))?;

        row.as_ref().map(job_from_row).transpose()
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let corrupt = |e: sqlx::Error| JobStoreError::Corrupt {
        path: "jobs".to_string(),
        message: e.to_string(),
    };

    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let status: JobStatus = status.parse().map_err(|e: kiln_core::DomainError| {
        JobStoreError::Corrupt {
            path: format!("jobs/{id}"),
            message: e.to_string(),
        }
    })?;
    let deps: Vec<Uuid> = row.try_get("dependencies").map_err(corrupt)?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at").map_err(corrupt)?;
    let finished_at: Option<DateTime<Utc>> = row.try_get("finished_at").map_err(corrupt)?;

    Ok(Job {
        id: JobId::from_uuid(id),
        job_type: JobType {
            kind: row.try_get("kind").map_err(corrupt)?,
            arch: row.try_get("arch").map_err(corrupt)?,
        },
        args: row.try_get("args").map_err(corrupt)?,
        dependencies: deps.into_iter().map(JobId::from_uuid).collect(),
        status,
        canceled: row.try_get("canceled").map_err(corrupt)?,
        result: row.try_get("result").map_err(corrupt)?,
        queued_at: row.try_get("queued_at").map_err(corrupt)?,
        started_at,
        finished_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("postgres {operation}: {err}"))
}

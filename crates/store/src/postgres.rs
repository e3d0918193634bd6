//! Postgres-backed job store implementation.
//!
//! All workers share one `offload_jobs` table. The claim protocol relies on a single
//! `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED) RETURNING ...` statement:
//! the row lock taken by the inner select means two workers racing on the same record
//! cannot both update it, and `SKIP LOCKED` lets the loser move on to the next candidate
//! instead of blocking.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | `Connection` |
//! | `Database` and everything else | `Storage` |
//! | Row decode failure / unknown status | `Decode` |
//!
//! Postgres has no native TTL index; `purge_expired` is driven by [`crate::ExpirySweeper`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, Row};
use tracing::{Span, instrument};

use offload_core::{DEFAULT_STALE_AFTER, JobId, JobRecord, JobStats, JobStatus, NewJob};

use crate::store::{JobStore, JobStoreError};

/// Serializes concurrent `ensure_indexes` calls from several workers booting at once.
const SCHEMA_LOCK_KEY: i64 = 0x6f66_666c_6f61_6400;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS offload_jobs (
        id           UUID PRIMARY KEY,
        handler_path TEXT NOT NULL,
        args         JSONB NOT NULL,
        secret       TEXT NOT NULL,
        status       TEXT NOT NULL
                     CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
        result       JSONB,
        error        TEXT,
        created_at   TIMESTAMPTZ NOT NULL,
        started_at   TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        expires_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    // Expiry sweep.
    "CREATE INDEX IF NOT EXISTS offload_jobs_expires_at_idx ON offload_jobs (expires_at)",
    // Oldest pending / stale processing first.
    "CREATE INDEX IF NOT EXISTS offload_jobs_claim_idx ON offload_jobs (status, created_at)",
    // Cache lookup by handler, newest first.
    "CREATE INDEX IF NOT EXISTS offload_jobs_recent_idx ON offload_jobs (handler_path, created_at DESC)",
];

const COLUMNS: &str = "id, handler_path, args, secret, status, result, error, \
                       created_at, started_at, completed_at, expires_at";

/// Postgres-backed job store.
///
/// Uses a SQLx connection pool, which is `Send + Sync` and can be shared across tasks.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    stale_after: Duration,
}

impl PostgresJobStore {
    /// Create a new store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Connect a fresh pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Override the staleness threshold used by `claim_next`.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self), err)]
    async fn ensure_indexes(&self) -> Result<(), JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("schema_lock", e))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("ensure_indexes", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, job),
        fields(handler = %job.handler_path, job_id = tracing::field::Empty),
        err
    )]
    async fn create(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        let id = JobId::new();

        sqlx::query(
            r#"
            INSERT INTO offload_jobs (
                id,
                handler_path,
                args,
                secret,
                status,
                created_at,
                expires_at
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&job.handler_path)
        .bind(&job.args)
        .bind(&job.secret)
        .bind(job.created_at)
        .bind(job.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        Span::current().record("job_id", tracing::field::display(id));
        Ok(id)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM offload_jobs WHERE id = $1 AND expires_at > now()"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.map(decode_row).transpose()
    }

    #[instrument(skip(self, args), err)]
    async fn find_recent(
        &self,
        handler_path: &str,
        args: &Value,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        // jsonb equality ignores key order, matching `serde_json::Value` equality.
        let row = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM offload_jobs
            WHERE handler_path = $1
                AND args = $2
                AND status IN ('pending', 'processing', 'completed')
                AND expires_at > now()
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(handler_path)
        .bind(args)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_recent", e))?;

        row.map(decode_row).transpose()
    }

    #[instrument(skip(self), fields(job_id = tracing::field::Empty), err)]
    async fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE offload_jobs
            SET status = 'processing', started_at = now()
            WHERE id = (
                SELECT id
                FROM offload_jobs
                WHERE expires_at > now()
                    AND (
                        status = 'pending'
                        OR (
                            status = 'processing'
                            AND (started_at IS NULL
                                 OR started_at < now() - make_interval(secs => $1))
                        )
                    )
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.stale_after.as_secs_f64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        let claimed = row.map(decode_row).transpose()?;
        if let Some(job) = &claimed {
            Span::current().record("job_id", tracing::field::display(job.id));
        }
        Ok(claimed)
    }

    #[instrument(skip(self, result), fields(job_id = %id), err)]
    async fn complete(&self, id: JobId, result: Value) -> Result<bool, JobStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE offload_jobs
            SET status = 'completed', result = $2, error = NULL, completed_at = now()
            WHERE id = $1 AND status = 'processing' AND expires_at > now()
            "#,
        )
        .bind(id.as_uuid())
        .bind(&result)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn fail(&self, id: JobId, error: &str) -> Result<bool, JobStoreError> {
        let done = sqlx::query(
            r#"
            UPDATE offload_jobs
            SET status = 'failed', error = $2, result = NULL, completed_at = now()
            WHERE id = $1 AND status = 'processing' AND expires_at > now()
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM offload_jobs
            WHERE expires_at > now()
            GROUP BY status
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| JobStoreError::Decode(format!("failed to read status: {e}")))?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| JobStoreError::Decode(format!("failed to read count: {e}")))?;
            let status: JobStatus = status
                .parse()
                .map_err(|e| JobStoreError::Decode(format!("{e}")))?;
            let total = total.max(0) as usize;
            match status {
                JobStatus::Pending => stats.pending = total,
                JobStatus::Processing => stats.processing = total,
                JobStatus::Completed => stats.completed = total,
                JobStatus::Failed => stats.failed = total,
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self) -> Result<u64, JobStoreError> {
        let done = sqlx::query("DELETE FROM offload_jobs WHERE expires_at <= now()")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(done.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map SQLx errors to job store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::PoolClosed => {
            JobStoreError::Connection(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Connection(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Io(e) => JobStoreError::Connection(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => {
            JobStoreError::Connection(format!("tls error in {}: {}", operation, e))
        }
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        other => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn decode_row(row: PgRow) -> Result<JobRecord, JobStoreError> {
    let row = JobRow::from_row(&row)
        .map_err(|e| JobStoreError::Decode(format!("failed to deserialize job row: {}", e)))?;
    JobRecord::try_from(row)
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    handler_path: String,
    args: Value,
    secret: String,
    status: String,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            handler_path: row.try_get("handler_path")?,
            args: row.try_get("args")?,
            secret: row.try_get("secret")?,
            status: row.try_get("status")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| JobStoreError::Decode(format!("{e}")))?;

        Ok(JobRecord {
            id: JobId::from_uuid(row.id),
            handler_path: row.handler_path,
            args: row.args,
            secret: row.secret,
            status,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        })
    }
}

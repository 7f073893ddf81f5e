//! PostgreSQL job store over the `imports` and `exports` tables

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use super::{legal_sources, not_found, CounterDelta, JobStore, NewJob};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::status::Status;
use crate::sync::types::{Initiator, Job, JobKey, JobKind};

const IMPORT_COLUMNS: &str = "id, user_id, user_type, filename, status, processor, \
    file_total_rows, total_rows_processed, total_rows_failed, \
    started_at, completed_at, created_at, updated_at";

const EXPORT_COLUMNS: &str = "id, user_id, user_type, filename, status, processor, \
    file_total_rows, total_rows_processed, 0::BIGINT AS total_rows_failed, \
    started_at, completed_at, created_at, updated_at";

fn table(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Import => "imports",
        JobKind::Export => "exports",
    }
}

fn columns(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Import => IMPORT_COLUMNS,
        JobKind::Export => EXPORT_COLUMNS,
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    user_id: Option<String>,
    user_type: Option<String>,
    filename: Option<String>,
    status: String,
    processor: String,
    file_total_rows: i64,
    total_rows_processed: i64,
    total_rows_failed: i64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self, kind: JobKind) -> SyncResult<Job> {
        let status = self
            .status
            .parse::<Status>()
            .map_err(|e| SyncError::Other(anyhow::anyhow!(e)))?;
        let initiator = match (self.user_id, self.user_type) {
            (Some(id), Some(kind)) => Some(Initiator { id, kind }),
            _ => None,
        };

        Ok(Job {
            id: self.id,
            kind,
            initiator,
            filename: self.filename,
            status,
            processor: self.processor,
            file_total_rows: self.file_total_rows,
            total_rows_processed: self.total_rows_processed,
            total_rows_failed: self.total_rows_failed,
            started_at: self.started_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn terminal_names() -> Vec<String> {
    Status::ALL
        .iter()
        .filter(|s| s.is_terminal())
        .map(|s| s.as_str().to_string())
        .collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(kind = %job.kind, processor = %job.processor))]
    async fn create(&self, job: NewJob) -> SyncResult<Job> {
        let sql = format!(
            "INSERT INTO {} (user_id, user_type, filename, status, processor, file_total_rows) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            table(job.kind),
            columns(job.kind)
        );

        let (user_id, user_type) = match job.initiator {
            Some(initiator) => (Some(initiator.id), Some(initiator.kind)),
            None => (None, None),
        };

        let row: JobRow = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(user_type)
            .bind(job.filename)
            .bind(Status::Pending.as_str())
            .bind(&job.processor)
            .bind(job.file_total_rows.max(0))
            .fetch_one(&self.pool)
            .await?;

        row.into_job(job.kind)
    }

    async fn get(&self, key: JobKey) -> SyncResult<Job> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns(key.kind),
            table(key.kind)
        );

        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(key.id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| not_found(key))?.into_job(key.kind)
    }

    #[instrument(skip(self, from), fields(job = %key, to = %to))]
    async fn transition(
        &self,
        key: JobKey,
        from: &[Status],
        to: Status,
    ) -> SyncResult<Option<Job>> {
        let allowed: Vec<String> = legal_sources(from, to)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        if allowed.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "UPDATE {} SET status = $1, \
                started_at = CASE WHEN $2 AND started_at IS NULL THEN NOW() ELSE started_at END, \
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END, \
                updated_at = NOW() \
             WHERE id = $4 AND status = ANY($5) \
             RETURNING {}",
            table(key.kind),
            columns(key.kind)
        );

        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(to.as_str())
            .bind(to == Status::InProgress)
            .bind(to.is_terminal())
            .bind(key.id)
            .bind(&allowed)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.into_job(key.kind)?)),
            None => {
                // distinguish a missing row from a status mismatch
                self.get(key).await?;
                Ok(None)
            }
        }
    }

    async fn increment_counters(
        &self,
        key: JobKey,
        delta: CounterDelta,
    ) -> SyncResult<Option<Job>> {
        let query = match key.kind {
            JobKind::Import => sqlx::query_as::<_, JobRow>(
                "UPDATE imports SET \
                    total_rows_processed = LEAST(total_rows_processed + $1, file_total_rows - total_rows_failed), \
                    total_rows_failed = LEAST(total_rows_failed + $2, \
                        file_total_rows - LEAST(total_rows_processed + $1, file_total_rows - total_rows_failed)), \
                    updated_at = NOW() \
                 WHERE id = $3 AND status <> ALL($4) \
                 RETURNING id, user_id, user_type, filename, status, processor, \
                    file_total_rows, total_rows_processed, total_rows_failed, \
                    started_at, completed_at, created_at, updated_at",
            )
            .bind(delta.processed.max(0))
            .bind(delta.failed.max(0)),
            JobKind::Export => sqlx::query_as::<_, JobRow>(
                "UPDATE exports SET \
                    total_rows_processed = LEAST(total_rows_processed + $1, file_total_rows), \
                    updated_at = NOW() \
                 WHERE id = $2 AND status <> ALL($3) \
                 RETURNING id, user_id, user_type, filename, status, processor, \
                    file_total_rows, total_rows_processed, 0::BIGINT AS total_rows_failed, \
                    started_at, completed_at, created_at, updated_at",
            )
            .bind(delta.processed.max(0)),
        };

        let row: Option<JobRow> = query
            .bind(key.id)
            .bind(terminal_names())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.into_job(key.kind)?)),
            None => {
                self.get(key).await?;
                Ok(None)
            }
        }
    }

    async fn set_filename(&self, key: JobKey, filename: &str) -> SyncResult<()> {
        let sql = format!(
            "UPDATE {} SET filename = $1, updated_at = NOW() WHERE id = $2",
            table(key.kind)
        );
        let result = sqlx::query(&sql)
            .bind(filename)
            .bind(key.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found(key));
        }
        Ok(())
    }

    async fn list(&self, kind: JobKind, limit: i64) -> SyncResult<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY id DESC LIMIT $1",
            columns(kind),
            table(kind)
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|row| row.into_job(kind)).collect()
    }
}

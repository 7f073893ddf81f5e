//! Persistence of import and export job records
//!
//! All status changes are compare-and-set against an allowed set of current
//! statuses, and counter increments are clamped so that
//! `processed + failed <= file_total_rows` always holds. Once a job is
//! terminal neither its status nor its counters change.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::status::Status;
use crate::sync::types::{Initiator, Job, JobKey, JobKind};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

/// Fields of a job at creation; it always starts `Pending` with zero counters
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub initiator: Option<Initiator>,
    pub filename: Option<String>,
    pub processor: String,
    pub file_total_rows: i64,
}

/// Rows to add to a job's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub processed: i64,
    pub failed: i64,
}

impl CounterDelta {
    pub fn processed(rows: i64) -> Self {
        Self {
            processed: rows,
            failed: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> SyncResult<Job>;

    async fn get(&self, key: JobKey) -> SyncResult<Job>;

    /// Move to `to` if the current status is one of `from`.
    ///
    /// Entering `InProgress` stamps `started_at`, entering a terminal status
    /// stamps `completed_at`. Returns `None` when the job was not in an
    /// allowed status.
    async fn transition(&self, key: JobKey, from: &[Status], to: Status)
        -> SyncResult<Option<Job>>;

    /// Add to the counters, clamped to the remaining rows.
    ///
    /// Returns `None` without changes once the job is terminal.
    async fn increment_counters(&self, key: JobKey, delta: CounterDelta)
        -> SyncResult<Option<Job>>;

    async fn set_filename(&self, key: JobKey, filename: &str) -> SyncResult<()>;

    /// Most recent jobs of a kind
    async fn list(&self, kind: JobKind, limit: i64) -> SyncResult<Vec<Job>>;
}

/// The subset of `from` that may legally move to `to`
pub(crate) fn legal_sources(from: &[Status], to: Status) -> Vec<Status> {
    from.iter()
        .copied()
        .filter(|s| s.can_transition_to(to))
        .collect()
}

/// Apply a clamped increment to in-memory counters
pub(crate) fn clamp_counters(
    total: i64,
    processed: i64,
    failed: i64,
    delta: CounterDelta,
) -> (i64, i64) {
    let processed = (processed + delta.processed.max(0)).min(total - failed).max(processed);
    let failed = (failed + delta.failed.max(0)).min(total - processed).max(failed);
    (processed, failed)
}

pub(crate) fn not_found(key: JobKey) -> SyncError {
    SyncError::JobNotFound(key)
}

pub async fn create_pool(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL not set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_keeps_sum_within_total() {
        assert_eq!(clamp_counters(10, 0, 0, CounterDelta { processed: 4, failed: 1 }), (4, 1));
        assert_eq!(clamp_counters(10, 8, 1, CounterDelta { processed: 5, failed: 0 }), (9, 1));
        assert_eq!(clamp_counters(10, 9, 0, CounterDelta { processed: 0, failed: 3 }), (9, 1));
        assert_eq!(clamp_counters(10, 3, 3, CounterDelta { processed: -2, failed: 0 }), (3, 3));
    }

    #[test]
    fn test_legal_sources_filters_terminal() {
        let from = [Status::Pending, Status::InProgress, Status::Completed];
        assert_eq!(
            legal_sources(&from, Status::Stopping),
            vec![Status::Pending, Status::InProgress]
        );
    }
}

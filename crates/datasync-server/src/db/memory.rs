use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::{clamp_counters, legal_sources, not_found, CounterDelta, JobStore, NewJob};
use crate::sync::error::SyncResult;
use crate::sync::status::Status;
use crate::sync::types::{Job, JobKey, JobKind};

/// Job store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobKey, Job>>,
    import_ids: AtomicI64,
    export_ids: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, kind: JobKind) -> i64 {
        let sequence = match kind {
            JobKind::Import => &self.import_ids,
            JobKind::Export => &self.export_ids,
        };
        sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: NewJob) -> SyncResult<Job> {
        let now = Utc::now();
        let record = Job {
            id: self.next_id(job.kind),
            kind: job.kind,
            initiator: job.initiator,
            filename: job.filename,
            status: Status::Pending,
            processor: job.processor,
            file_total_rows: job.file_total_rows.max(0),
            total_rows_processed: 0,
            total_rows_failed: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.jobs.write().await.insert(record.key(), record.clone());
        Ok(record)
    }

    async fn get(&self, key: JobKey) -> SyncResult<Job> {
        self.jobs
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    async fn transition(
        &self,
        key: JobKey,
        from: &[Status],
        to: Status,
    ) -> SyncResult<Option<Job>> {
        let allowed = legal_sources(from, to);
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&key).ok_or_else(|| not_found(key))?;

        if !allowed.contains(&job.status) {
            return Ok(None);
        }

        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        if to == Status::InProgress && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        Ok(Some(job.clone()))
    }

    async fn increment_counters(
        &self,
        key: JobKey,
        delta: CounterDelta,
    ) -> SyncResult<Option<Job>> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&key).ok_or_else(|| not_found(key))?;

        if job.status.is_terminal() {
            return Ok(None);
        }

        let failed_delta = match job.kind {
            JobKind::Import => delta.failed,
            JobKind::Export => 0,
        };
        let (processed, failed) = clamp_counters(
            job.file_total_rows,
            job.total_rows_processed,
            job.total_rows_failed,
            CounterDelta {
                processed: delta.processed,
                failed: failed_delta,
            },
        );
        job.total_rows_processed = processed;
        job.total_rows_failed = failed;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn set_filename(&self, key: JobKey, filename: &str) -> SyncResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&key).ok_or_else(|| not_found(key))?;
        job.filename = Some(filename.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, kind: JobKind, limit: i64) -> SyncResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.kind == kind).cloned().collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::collator::FailureCollator;
use super::worker::ImportChunkWorker;
use crate::db::NewJob;
use crate::storage::{collections, StoreOptions};
use crate::sync::artifact::remove_file_quietly;
use crate::sync::dispatch::{BatchId, BatchOptions, BatchOutcome, WorkUnit};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::events::SyncEvent;
use crate::sync::partition::partition;
use crate::sync::processor::ImportProcessor;
use crate::sync::source::{missing_headers, DelimitedFile};
use crate::sync::status::Status;
use crate::sync::types::{Initiator, Job, JobKey, JobKind};
use crate::sync::SyncContext;

/// An uploaded file to import
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub processor: String,
    /// Local path of the upload; the caller owns and removes it
    pub upload_path: PathBuf,
    /// Original client file name
    pub filename: String,
    pub initiator: Option<Initiator>,
}

/// Starts imports and accepts stop requests
pub struct ImportCoordinator {
    ctx: SyncContext,
}

impl ImportCoordinator {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Validate an upload, record the job and fan it out into chunk workers.
    ///
    /// Returns the job as created (`Pending`), or `Completed` for an upload
    /// without data rows.
    #[instrument(skip(self, request), fields(processor = %request.processor, file = %request.filename))]
    pub async fn start_import(&self, request: ImportRequest) -> SyncResult<Job> {
        let processor = self.ctx.registry.import(&request.processor)?;

        let upload = DelimitedFile::open(&request.upload_path);
        let headers = upload.headers().await?;
        let missing = missing_headers(&processor.expected_headers(), &headers);
        if !missing.is_empty() {
            return Err(SyncError::InvalidHeaders { missing });
        }
        let total_rows = upload.count_rows().await?;

        let job = self
            .ctx
            .store
            .create(NewJob {
                kind: JobKind::Import,
                initiator: request.initiator.clone(),
                filename: Some(request.filename.clone()),
                processor: request.processor.clone(),
                file_total_rows: total_rows as i64,
            })
            .await?;
        let key = job.key();
        info!(job = %key, total_rows, "Import job created");

        match self.launch(job, processor, &request).await {
            Ok(job) => Ok(job),
            Err(err) => {
                error!(job = %key, error = %err, "Failed to start import");
                self.mark_failed(key).await;
                Err(err)
            }
        }
    }

    async fn launch(
        &self,
        job: Job,
        processor: Arc<dyn ImportProcessor>,
        request: &ImportRequest,
    ) -> SyncResult<Job> {
        let key = job.key();
        let settings = &self.ctx.settings.imports;

        self.ctx
            .blobs
            .store(
                key,
                &request.upload_path,
                collections::FILE,
                &settings.disk,
                StoreOptions::named(request.filename.clone()).single_file(),
            )
            .await?;

        let chunk_size = processor.chunk_size().unwrap_or(settings.chunk_size);
        let chunks = partition(job.file_total_rows as u64, chunk_size)?;

        if chunks.is_empty() {
            let job = self
                .ctx
                .store
                .transition(key, &[Status::Pending], Status::Completed)
                .await?
                .unwrap_or(job);
            info!(job = %key, "Import has no rows, completed immediately");
            self.ctx.events.publish(SyncEvent::ImportCompleted(job.clone()));
            return Ok(job);
        }

        let source_path = self.ctx.settings.import_source_path(key);
        if let Some(parent) = source_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&request.upload_path, &source_path).await?;

        let batch_id = BatchId::new();
        let chunk_count = chunks.len();
        let units: Vec<Arc<dyn WorkUnit>> = chunks
            .into_iter()
            .map(|chunk| {
                Arc::new(ImportChunkWorker::new(
                    self.ctx.clone(),
                    key,
                    processor.clone(),
                    source_path.clone(),
                    batch_id,
                    chunk,
                )) as Arc<dyn WorkUnit>
            })
            .collect();

        let start_ctx = self.ctx.clone();
        let finish_ctx = self.ctx.clone();
        let options = BatchOptions::new(format!("{} chunks", key))
            .with_id(batch_id)
            .on_queue(settings.queue.clone())
            .allow_failures(settings.allow_failures)
            .on_start(move |_| on_batch_started(start_ctx, key))
            .on_all_finish(move |outcome| on_batch_finished(finish_ctx, key, source_path, outcome));

        self.ctx.dispatcher.dispatch_batch(units, options).await?;
        info!(job = %key, batch_id = %batch_id, chunks = chunk_count, chunk_size, "Import dispatched");

        Ok(job)
    }

    /// Ask a pending or running import to stop.
    ///
    /// Workers observe the request at their next stop check and the job
    /// settles as `Stopped` once every chunk has finished.
    #[instrument(skip(self))]
    pub async fn request_stop(&self, id: i64) -> SyncResult<Job> {
        let key = JobKey::import(id);
        match self
            .ctx
            .store
            .transition(key, &[Status::Pending, Status::InProgress], Status::Stopping)
            .await?
        {
            Some(job) => {
                self.ctx.stop_signal.forget(key).await;
                info!(job = %key, "Stop requested");
                Ok(job)
            }
            None => {
                let job = self.ctx.store.get(key).await?;
                if job.status == Status::Stopping {
                    return Ok(job);
                }
                Err(SyncError::InvalidTransition {
                    key,
                    from: job.status,
                    to: Status::Stopping,
                })
            }
        }
    }

    pub async fn get(&self, id: i64) -> SyncResult<Job> {
        self.ctx.store.get(JobKey::import(id)).await
    }

    async fn mark_failed(&self, key: JobKey) {
        match self.ctx.store.transition(key, &Status::ACTIVE, Status::Failed).await {
            Ok(Some(job)) => self.ctx.events.publish(SyncEvent::ImportCompleted(job)),
            Ok(None) => {}
            Err(err) => error!(job = %key, error = %err, "Failed to mark import as failed"),
        }
    }
}

/// Final status of an import once its batch has settled
pub fn resolve_final_status(current: Status, outcome: &BatchOutcome, allow_failures: bool) -> Status {
    if matches!(current, Status::Stopping | Status::Stopped) {
        Status::Stopped
    } else if !allow_failures && outcome.has_failures() {
        Status::Failed
    } else {
        Status::Completed
    }
}

async fn on_batch_started(ctx: SyncContext, key: JobKey) {
    match ctx
        .store
        .transition(key, &[Status::Pending], Status::InProgress)
        .await
    {
        Ok(Some(job)) => {
            info!(job = %key, "Import started");
            ctx.events.publish(SyncEvent::ImportStarted(job));
        }
        Ok(None) => debug!(job = %key, "Import no longer pending at batch start"),
        Err(err) => error!(job = %key, error = %err, "Failed to mark import as started"),
    }
}

async fn on_batch_finished(ctx: SyncContext, key: JobKey, source_path: PathBuf, outcome: BatchOutcome) {
    remove_file_quietly(&source_path).await;
    ctx.stop_signal.forget(key).await;

    let job = match ctx.store.get(key).await {
        Ok(job) => job,
        Err(err) => {
            error!(job = %key, error = %err, "Failed to load import after batch");
            return;
        }
    };
    if job.status.is_terminal() {
        debug!(job = %key, status = %job.status, "Import already finalized");
        return;
    }

    let target = resolve_final_status(job.status, &outcome, ctx.settings.imports.allow_failures);
    match ctx.store.transition(key, &Status::ACTIVE, target).await {
        Ok(Some(job)) => {
            info!(
                job = %key,
                status = %job.status,
                processed = job.total_rows_processed,
                failed = job.total_rows_failed,
                failed_chunks = outcome.failed_units,
                "Import finished"
            );
            ctx.events.publish(SyncEvent::ImportCompleted(job));
        }
        Ok(None) => {
            debug!(job = %key, "Import finalized concurrently");
            return;
        }
        Err(err) => {
            error!(job = %key, error = %err, "Failed to finalize import");
            return;
        }
    }

    let collator = Arc::new(FailureCollator::new(ctx.clone(), key));
    if let Err(err) = ctx
        .dispatcher
        .dispatch_one(collator, &ctx.settings.imports.queue)
        .await
    {
        warn!(job = %key, error = %err, "Failed to dispatch failure collation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(failed: usize) -> BatchOutcome {
        BatchOutcome {
            batch_id: BatchId::new(),
            total_units: 4,
            failed_units: failed,
            cancelled_units: 0,
        }
    }

    #[test]
    fn test_stop_wins_over_failures() {
        assert_eq!(
            resolve_final_status(Status::Stopping, &outcome(2), false),
            Status::Stopped
        );
    }

    #[test]
    fn test_stop_wins_over_clean_finish() {
        // every chunk finished before the request was seen
        assert_eq!(
            resolve_final_status(Status::Stopping, &outcome(0), true),
            Status::Stopped
        );
        assert_eq!(
            resolve_final_status(Status::Stopped, &outcome(0), true),
            Status::Stopped
        );
    }

    #[test]
    fn test_failures_only_fail_strict_batches() {
        assert_eq!(
            resolve_final_status(Status::InProgress, &outcome(1), true),
            Status::Completed
        );
        assert_eq!(
            resolve_final_status(Status::InProgress, &outcome(1), false),
            Status::Failed
        );
        assert_eq!(
            resolve_final_status(Status::InProgress, &outcome(0), false),
            Status::Completed
        );
    }
}

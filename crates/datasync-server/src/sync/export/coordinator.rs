use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::collator::{ExportCollator, ExportTarget};
use super::worker::ExportChunkWorker;
use crate::db::NewJob;
use crate::sync::dispatch::{BatchId, BatchOptions, WorkUnit};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::events::SyncEvent;
use crate::sync::partition::partition;
use crate::sync::status::Status;
use crate::sync::types::{Initiator, Job, JobKey, JobKind};
use crate::sync::SyncContext;

/// An export to run; unset fields fall back to the processor, then settings
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub processor: String,
    pub initiator: Option<Initiator>,
    pub name: Option<String>,
    pub disk: Option<String>,
    pub directory: Option<String>,
}

/// `<processor>-<YYYYmmddHHMMSS>`
pub fn default_export_name(processor: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", processor, at.format("%Y%m%d%H%M%S"))
}

/// Keep names usable as a single file name
fn sanitize_name(name: &str) -> String {
    clean_segment(name.trim().trim_end_matches(".csv"))
}

fn clean_segment(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    cleaned.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Normalise a publish directory to plain relative segments.
///
/// Empty and `.` segments are dropped and `..` is rejected.
fn sanitize_directory(directory: &str) -> SyncResult<Option<String>> {
    let mut segments = Vec::new();
    for segment in directory.split(['/', '\\']).map(str::trim) {
        match segment {
            "" | "." => continue,
            ".." => return Err(SyncError::InvalidPath(directory.to_string())),
            _ => {}
        }
        let cleaned = clean_segment(segment);
        if !cleaned.is_empty() {
            segments.push(cleaned);
        }
    }
    Ok((!segments.is_empty()).then(|| segments.join("/")))
}

pub struct ExportCoordinator {
    ctx: SyncContext,
}

impl ExportCoordinator {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Record an export job and fan it out into one worker per page.
    ///
    /// An empty source completes immediately without publishing a file.
    #[instrument(skip(self, request), fields(processor = %request.processor))]
    pub async fn start_export(&self, request: ExportRequest) -> SyncResult<Job> {
        let processor = self.ctx.registry.export(&request.processor)?;
        let settings = &self.ctx.settings.exports;

        let total_rows = processor.source().count().await.map_err(SyncError::Source)?;

        let name = request
            .name
            .clone()
            .or_else(|| processor.name())
            .map(|n| sanitize_name(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_export_name(&request.processor, Utc::now()));
        let directory = match request
            .directory
            .clone()
            .or_else(|| processor.directory())
            .or_else(|| settings.directory.clone())
        {
            Some(directory) => sanitize_directory(&directory)?,
            None => None,
        };
        let target = ExportTarget {
            name,
            disk: request
                .disk
                .clone()
                .or_else(|| processor.disk())
                .unwrap_or_else(|| settings.disk.clone()),
            directory,
        };
        let allow_failures = processor.allow_failures().unwrap_or(settings.allow_failures);
        let chunk_size = processor.chunk_size().unwrap_or(settings.chunk_size);

        let job = self
            .ctx
            .store
            .create(NewJob {
                kind: JobKind::Export,
                initiator: request.initiator.clone(),
                filename: None,
                processor: request.processor.clone(),
                file_total_rows: total_rows as i64,
            })
            .await?;
        let key = job.key();
        info!(job = %key, total_rows, name = %target.name, "Export job created");

        let chunks = match partition(total_rows, chunk_size) {
            Ok(chunks) => chunks,
            Err(err) => {
                self.mark_failed(key).await;
                return Err(err);
            }
        };

        if chunks.is_empty() {
            let job = self
                .ctx
                .store
                .transition(key, &[Status::Pending], Status::Completed)
                .await?
                .unwrap_or(job);
            info!(job = %key, "Export source is empty, completed immediately");
            self.ctx.events.publish(SyncEvent::ExportCompleted(job.clone()));
            return Ok(job);
        }

        let batch_id = BatchId::new();
        let chunk_count = chunks.len();
        let units: Vec<Arc<dyn WorkUnit>> = chunks
            .into_iter()
            .map(|chunk| {
                Arc::new(ExportChunkWorker::new(
                    self.ctx.clone(),
                    key,
                    processor.clone(),
                    batch_id,
                    chunk.index,
                    chunk_size,
                )) as Arc<dyn WorkUnit>
            })
            .collect();

        let start_ctx = self.ctx.clone();
        let finish_ctx = self.ctx.clone();
        let options = BatchOptions::new(format!("{} pages", key))
            .with_id(batch_id)
            .on_queue(settings.queue.clone())
            .allow_failures(allow_failures)
            .on_start(move |_| on_batch_started(start_ctx, key))
            .on_all_finish(move |outcome| async move {
                let batch_failed = !allow_failures && outcome.has_failures();
                let collator = Arc::new(ExportCollator::new(
                    finish_ctx.clone(),
                    key,
                    outcome.batch_id,
                    target,
                    batch_failed,
                ));
                if let Err(err) = finish_ctx
                    .dispatcher
                    .dispatch_one(collator.clone(), &finish_ctx.settings.exports.queue)
                    .await
                {
                    warn!(job = %key, error = %err, "Failed to dispatch export collation");
                    collator.abandon().await;
                }
            });

        if let Err(err) = self.ctx.dispatcher.dispatch_batch(units, options).await {
            error!(job = %key, error = %err, "Failed to dispatch export");
            self.mark_failed(key).await;
            return Err(err);
        }
        info!(job = %key, batch_id = %batch_id, pages = chunk_count, chunk_size, "Export dispatched");

        Ok(job)
    }

    pub async fn get(&self, id: i64) -> SyncResult<Job> {
        self.ctx.store.get(JobKey::export(id)).await
    }

    async fn mark_failed(&self, key: JobKey) {
        match self.ctx.store.transition(key, &Status::ACTIVE, Status::Failed).await {
            Ok(Some(job)) => self.ctx.events.publish(SyncEvent::ExportCompleted(job)),
            Ok(None) => {}
            Err(err) => error!(job = %key, error = %err, "Failed to mark export as failed"),
        }
    }
}

async fn on_batch_started(ctx: SyncContext, key: JobKey) {
    match ctx
        .store
        .transition(key, &[Status::Pending], Status::InProgress)
        .await
    {
        Ok(Some(job)) => {
            info!(job = %key, "Export started");
            ctx.events.publish(SyncEvent::ExportStarted(job));
        }
        Ok(None) => debug!(job = %key, "Export no longer pending at batch start"),
        Err(err) => error!(job = %key, error = %err, "Failed to mark export as started"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_export_name("users", at), "users-20240309140507");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Monthly report.csv"), "Monthly-report");
        assert_eq!(sanitize_name("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_name("///"), "");
    }

    #[test]
    fn test_sanitize_directory() {
        assert_eq!(
            sanitize_directory("./reports//2024 q1/").unwrap().as_deref(),
            Some("reports/2024-q1")
        );
        assert_eq!(sanitize_directory("/abs/path").unwrap().as_deref(), Some("abs/path"));
        assert_eq!(sanitize_directory("/./").unwrap(), None);
        for escaping in ["../../../../escaped-dir", "reports/../..", "a\\..\\b"] {
            assert!(matches!(
                sanitize_directory(escaping),
                Err(SyncError::InvalidPath(_))
            ));
        }
    }
}

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord};
use tracing::{info, instrument, warn};

use crate::storage::{collections, BlobHandle, StoreOptions};
use crate::sync::artifact::{import_failure_report_file_name, remove_file_quietly};
use crate::sync::dispatch::WorkUnit;
use crate::sync::error::SyncResult;
use crate::sync::types::JobKey;
use crate::sync::SyncContext;

/// Merges per-chunk failure reports into one report per import.
///
/// Runs once the import batch has settled. Safe to run again: with no chunk
/// reports left it does nothing.
pub struct FailureCollator {
    ctx: SyncContext,
    key: JobKey,
}

impl FailureCollator {
    pub fn new(ctx: SyncContext, key: JobKey) -> Self {
        Self { ctx, key }
    }

    /// Returns the consolidated report, or `None` when no row failed
    #[instrument(skip(self), fields(job = %self.key))]
    pub async fn collate(&self) -> SyncResult<Option<BlobHandle>> {
        let blobs = &self.ctx.blobs;
        let chunks = blobs.all_of(self.key, collections::FAILED_CHUNKS).await?;
        if chunks.is_empty() {
            return Ok(None);
        }

        let merged_path = self
            .ctx
            .settings
            .reports_dir()
            .join(import_failure_report_file_name(self.key));
        if let Some(parent) = merged_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut writer = csv::Writer::from_path(&merged_path)?;
        let mut header_written = false;
        let mut failed_rows = 0u64;

        for chunk in &chunks {
            let bytes = match blobs.stream_contents(chunk).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(chunk = ?chunk.chunk_index, error = %err, "Skipping unreadable failure chunk");
                    continue;
                }
            };

            let (headers, records) = match parse_report(&bytes) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(chunk = ?chunk.chunk_index, error = %err, "Skipping malformed failure chunk");
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }

            if !header_written {
                writer.write_record(&headers)?;
                header_written = true;
            }
            for record in &records {
                writer.write_record(record)?;
            }
            failed_rows += records.len() as u64;
        }
        writer.flush()?;
        drop(writer);

        let handle = if failed_rows == 0 {
            remove_file_quietly(&merged_path).await;
            None
        } else {
            let stored = blobs
                .store(
                    self.key,
                    &merged_path,
                    collections::FAILED,
                    &self.ctx.settings.imports.disk,
                    StoreOptions::named(import_failure_report_file_name(self.key)).single_file(),
                )
                .await;
            remove_file_quietly(&merged_path).await;
            // chunk reports are kept for the retry when publishing fails
            Some(stored?)
        };

        if let Err(err) = blobs.delete(self.key, collections::FAILED_CHUNKS).await {
            warn!(error = %err, "Failed to delete failure chunks");
        }

        match &handle {
            Some(_) => info!(failed_rows, chunks = chunks.len(), "Failure report published"),
            None => info!("No failed rows, no failure report"),
        }
        Ok(handle)
    }
}

fn parse_report(bytes: &[u8]) -> csv::Result<(StringRecord, Vec<StringRecord>)> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader.headers()?.clone();
    let records = reader.records().collect::<csv::Result<Vec<_>>>()?;
    Ok((headers, records))
}

#[async_trait]
impl WorkUnit for FailureCollator {
    fn describe(&self) -> String {
        format!("{} failure collation", self.key)
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.collate().await?;
        Ok(())
    }
}

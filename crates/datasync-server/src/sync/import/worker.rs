use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::storage::{collections, StoreOptions};
use crate::sync::artifact::{import_failure_chunk_file_name, remove_file_quietly};
use crate::sync::counters::CounterBuffer;
use crate::sync::dispatch::{BatchId, WorkUnit};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::processor::ImportProcessor;
use crate::sync::rules;
use crate::sync::source::DelimitedFile;
use crate::sync::types::{ChunkDescriptor, FailureRecord, JobKey, Row};
use crate::sync::SyncContext;

/// What one chunk run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkReport {
    pub processed: u64,
    pub failed: u64,
    /// A stop request cut the chunk short
    pub stopped: bool,
}

/// Imports the rows of one chunk
pub struct ImportChunkWorker {
    ctx: SyncContext,
    key: JobKey,
    processor: Arc<dyn ImportProcessor>,
    source_path: PathBuf,
    batch_id: BatchId,
    chunk: ChunkDescriptor,
}

impl ImportChunkWorker {
    pub fn new(
        ctx: SyncContext,
        key: JobKey,
        processor: Arc<dyn ImportProcessor>,
        source_path: PathBuf,
        batch_id: BatchId,
        chunk: ChunkDescriptor,
    ) -> Self {
        Self {
            ctx,
            key,
            processor,
            source_path,
            batch_id,
            chunk,
        }
    }

    /// Validate and process every row of the chunk.
    ///
    /// Rows that fail validation or processing are collected into a failure
    /// report stored in the `failed-chunks` collection, tagged with the chunk
    /// index. The report is stored even when it holds no rows.
    #[instrument(skip(self), fields(job = %self.key, chunk = self.chunk.index))]
    pub async fn process_chunk(&self) -> SyncResult<ChunkReport> {
        if self.should_stop().await {
            info!("Stop requested, skipping chunk");
            return Ok(ChunkReport {
                stopped: true,
                ..ChunkReport::default()
            });
        }

        self.ensure_source().await?;
        let source = DelimitedFile::open(&self.source_path);
        let headers = source.headers().await?;
        let rows = source.read_rows(self.chunk.offset, self.chunk.size).await?;

        let report_path = self.ctx.settings.reports_dir().join(import_failure_chunk_file_name(
            self.key,
            self.batch_id,
            self.chunk.index,
        ));
        let mut report = FailureReport::create(&report_path, &headers)?;

        let mut counters = CounterBuffer::new(self.key, self.ctx.settings.imports.counter_flush_every);
        let mut stopped = false;

        for (offset, row) in rows.iter().enumerate() {
            if self.should_stop().await {
                info!(row = self.chunk.first_row() + offset as u64, "Stop requested, leaving chunk");
                stopped = true;
                break;
            }

            let row_index = self.chunk.first_row() + offset as u64;
            let due = match self.handle_row(row, row_index).await {
                Ok(()) => counters.record_processed(),
                Err(message) => {
                    debug!(row = row_index, error = %message, "Row rejected");
                    report.write(&FailureRecord {
                        origin_row: row_index,
                        row: row.clone(),
                        error: message,
                    })?;
                    counters.record_failed()
                }
            };
            if due {
                counters.flush(self.ctx.store.as_ref()).await?;
            }
        }

        counters.flush(self.ctx.store.as_ref()).await?;
        report.finish()?;
        self.store_report(&report_path).await?;

        let summary = ChunkReport {
            processed: counters.processed_total(),
            failed: counters.failed_total(),
            stopped,
        };
        info!(processed = summary.processed, failed = summary.failed, stopped, "Chunk finished");
        Ok(summary)
    }

    async fn handle_row(&self, row: &Row, row_index: u64) -> Result<(), String> {
        let row_rules = self.processor.rules(row, row_index);
        rules::validate(row, &row_rules)?;
        self.processor
            .process(row, row_index)
            .await
            .map_err(|e| format!("{:#}", e))
    }

    async fn should_stop(&self) -> bool {
        match self.ctx.stop_signal.should_stop(self.key).await {
            Ok(stop) => stop,
            Err(err) => {
                warn!(job = %self.key, error = %err, "Stop check failed, continuing");
                false
            }
        }
    }

    /// Restore the local source from the stored upload when it is gone,
    /// e.g. after a restart
    async fn ensure_source(&self) -> SyncResult<()> {
        if tokio::fs::try_exists(&self.source_path).await? {
            return Ok(());
        }
        let handle = self
            .ctx
            .blobs
            .first_of(self.key, collections::FILE)
            .await?
            .ok_or(SyncError::MissingSource(self.key))?;
        info!(job = %self.key, "Restoring import source from storage");
        self.ctx.blobs.materialize(&handle, &self.source_path).await
    }

    /// Store the chunk's report, replacing one left by an earlier attempt
    async fn store_report(&self, report_path: &Path) -> SyncResult<()> {
        let blobs = &self.ctx.blobs;
        for stale in blobs.all_of(self.key, collections::FAILED_CHUNKS).await? {
            if stale.chunk_index == Some(self.chunk.index) {
                blobs.delete_handle(&stale).await?;
            }
        }

        blobs
            .store(
                self.key,
                report_path,
                collections::FAILED_CHUNKS,
                &self.ctx.settings.imports.disk,
                StoreOptions::default().with_chunk_index(self.chunk.index),
            )
            .await?;
        remove_file_quietly(report_path).await;
        Ok(())
    }
}

#[async_trait]
impl WorkUnit for ImportChunkWorker {
    fn describe(&self) -> String {
        format!("{} chunk {}", self.key, self.chunk.index)
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.process_chunk().await?;
        Ok(())
    }
}

/// CSV of rejected rows: the original columns plus `origin_row` and `error`
struct FailureReport {
    writer: csv::Writer<std::fs::File>,
}

impl FailureReport {
    fn create(path: &Path, headers: &[String]) -> SyncResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        let mut header_row: Vec<&str> = headers.iter().map(String::as_str).collect();
        header_row.extend(["origin_row", "error"]);
        writer.write_record(&header_row)?;
        Ok(Self { writer })
    }

    fn write(&mut self, record: &FailureRecord) -> SyncResult<()> {
        let origin_row = record.origin_row.to_string();
        let mut fields: Vec<&str> = record.row.values().iter().map(String::as_str).collect();
        fields.push(&origin_row);
        fields.push(&record.error);
        self.writer.write_record(&fields)?;
        Ok(())
    }

    fn finish(mut self) -> SyncResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

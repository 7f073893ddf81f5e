use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::db::CounterDelta;
use crate::sync::artifact::{export_chunk_file_name, remove_file_quietly};
use crate::sync::dispatch::{BatchId, WorkUnit};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::processor::{flatten_cell, ExportProcessor, FormattedRow};
use crate::sync::types::JobKey;
use crate::sync::SyncContext;

/// Writes one page of an export to its own CSV file
pub struct ExportChunkWorker {
    ctx: SyncContext,
    key: JobKey,
    processor: Arc<dyn ExportProcessor>,
    batch_id: BatchId,
    page: u32,
    per_page: u64,
}

impl ExportChunkWorker {
    pub fn new(
        ctx: SyncContext,
        key: JobKey,
        processor: Arc<dyn ExportProcessor>,
        batch_id: BatchId,
        page: u32,
        per_page: u64,
    ) -> Self {
        Self {
            ctx,
            key,
            processor,
            batch_id,
            page,
            per_page,
        }
    }

    /// Path of the written chunk, or `None` when the page was empty.
    ///
    /// The file appears under its final name only once fully written.
    #[instrument(skip(self), fields(job = %self.key, page = self.page))]
    pub async fn write_chunk(&self) -> SyncResult<Option<PathBuf>> {
        let records = self
            .processor
            .source()
            .page(self.page as u64, self.per_page)
            .await
            .map_err(SyncError::Source)?;
        if records.is_empty() {
            debug!("Page is empty, nothing to write");
            return Ok(None);
        }

        let rows = records
            .into_iter()
            .map(|record| self.processor.format_row(record))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let dir = self.ctx.settings.export_temp_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let final_path = dir.join(export_chunk_file_name(self.batch_id, self.page));
        let part_path = dir.join(format!(
            "{}.part",
            export_chunk_file_name(self.batch_id, self.page)
        ));

        let written = {
            let part_path = part_path.clone();
            tokio::task::spawn_blocking(move || write_rows(&part_path, &rows)).await?
        };
        let row_count = match written {
            Ok(count) => count,
            Err(err) => {
                remove_file_quietly(&part_path).await;
                return Err(err);
            }
        };
        tokio::fs::rename(&part_path, &final_path).await?;

        self.ctx
            .store
            .increment_counters(self.key, CounterDelta::processed(row_count as i64))
            .await?;

        info!(rows = row_count, "Export page written");
        Ok(Some(final_path))
    }
}

/// Header from the first appearance of each column across the page
fn write_rows(path: &Path, rows: &[FormattedRow]) -> SyncResult<usize> {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for column in row.keys() {
            if !header.contains(&column.as_str()) {
                header.push(column);
            }
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;
    for row in rows {
        writer.write_record(
            header
                .iter()
                .map(|column| row.get(*column).map(flatten_cell).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(rows.len())
}

#[async_trait]
impl WorkUnit for ExportChunkWorker {
    fn describe(&self) -> String {
        format!("{} page {}", self.key, self.page)
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.write_chunk().await?;
        Ok(())
    }
}

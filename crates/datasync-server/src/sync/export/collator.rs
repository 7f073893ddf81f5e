use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::storage::{collections, BlobHandle, StoreOptions};
use crate::sync::artifact::{list_export_chunks, remove_file_quietly, remove_files, ChunkArtifact};
use crate::sync::dispatch::{BatchId, WorkUnit};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::events::SyncEvent;
use crate::sync::status::Status;
use crate::sync::types::JobKey;
use crate::sync::SyncContext;

/// Where the merged export is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    /// Base name, without extension
    pub name: String,
    pub disk: String,
    pub directory: Option<String>,
}

impl ExportTarget {
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name)
    }
}

/// Merges the page files of an export batch and publishes the result.
///
/// Running it again after a successful run finds no page files and an
/// already published artifact, and only makes sure the job is completed.
pub struct ExportCollator {
    ctx: SyncContext,
    key: JobKey,
    batch_id: BatchId,
    target: ExportTarget,
    batch_failed: bool,
}

impl ExportCollator {
    pub fn new(
        ctx: SyncContext,
        key: JobKey,
        batch_id: BatchId,
        target: ExportTarget,
        batch_failed: bool,
    ) -> Self {
        Self {
            ctx,
            key,
            batch_id,
            target,
            batch_failed,
        }
    }

    #[instrument(skip(self), fields(job = %self.key, batch_id = %self.batch_id))]
    pub async fn collate(&self) -> SyncResult<Option<BlobHandle>> {
        let job = self.ctx.store.get(self.key).await?;
        if job.status.is_terminal() {
            info!(status = %job.status, "Export already settled, cleaning up");
            self.clean_up().await;
            return Ok(None);
        }

        if self.batch_failed {
            warn!("Export pages failed, discarding partial output");
            self.abandon().await;
            return Ok(None);
        }

        let chunks = list_export_chunks(&self.ctx.settings.export_temp_dir(), self.batch_id).await?;
        if chunks.is_empty() {
            if let Some(existing) = self.ctx.blobs.first_of(self.key, collections::FILE).await? {
                info!("Export already published, finalizing");
                self.finalize().await?;
                return Ok(Some(existing));
            }
            return Err(SyncError::Other(anyhow::anyhow!(
                "no page files found for {}",
                self.key
            )));
        }

        let merged_path = self.merged_path();
        let merge = {
            let chunks = chunks.clone();
            let merged_path = merged_path.clone();
            tokio::task::spawn_blocking(move || merge_chunks(&chunks, &merged_path)).await?
        };
        let rows = match merge {
            Ok(rows) => rows,
            Err(err) => {
                remove_file_quietly(&merged_path).await;
                return Err(err);
            }
        };

        let stored = self
            .ctx
            .blobs
            .store(
                self.key,
                &merged_path,
                collections::FILE,
                &self.target.disk,
                StoreOptions::named(self.target.file_name())
                    .in_directory(self.target.directory.clone())
                    .single_file(),
            )
            .await;
        remove_file_quietly(&merged_path).await;
        // page files stay for the retry when publishing fails
        let handle = stored?;

        remove_files(chunks.iter().map(|c| c.path.as_path()).collect::<Vec<&Path>>()).await;
        self.finalize().await?;

        info!(rows, pages = chunks.len(), file = %handle.key, "Export published");
        Ok(Some(handle))
    }

    /// Discard partial output and mark the export failed
    pub async fn abandon(&self) {
        self.clean_up().await;
        match self
            .ctx
            .store
            .transition(self.key, &Status::ACTIVE, Status::Failed)
            .await
        {
            Ok(Some(job)) => self.ctx.events.publish(SyncEvent::ExportCompleted(job)),
            Ok(None) => {}
            Err(err) => error!(job = %self.key, error = %err, "Failed to mark export as failed"),
        }
    }

    async fn finalize(&self) -> SyncResult<()> {
        self.ctx
            .store
            .set_filename(self.key, &self.target.file_name())
            .await?;
        if let Some(job) = self
            .ctx
            .store
            .transition(self.key, &Status::ACTIVE, Status::Completed)
            .await?
        {
            self.ctx.events.publish(SyncEvent::ExportCompleted(job));
        }
        Ok(())
    }

    async fn clean_up(&self) {
        match list_export_chunks(&self.ctx.settings.export_temp_dir(), self.batch_id).await {
            Ok(chunks) => remove_files(chunks.iter().map(|c| c.path.as_path()).collect::<Vec<&Path>>()).await,
            Err(err) => warn!(job = %self.key, error = %err, "Failed to list export pages"),
        }
        remove_file_quietly(&self.merged_path()).await;
    }

    fn merged_path(&self) -> PathBuf {
        self.ctx
            .settings
            .work_dir
            .join(format!("{}-{}", self.key, self.target.file_name()))
    }
}

/// Concatenate page files in index order under the first page's header.
///
/// Later pages are mapped onto that header by column name.
fn merge_chunks(chunks: &[ChunkArtifact], dest: &Path) -> SyncResult<u64> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(dest)?;
    let mut header: Option<StringRecord> = None;
    let mut rows = 0u64;

    for chunk in chunks {
        let mut reader = ReaderBuilder::new().flexible(true).from_path(&chunk.path)?;
        let page_header = reader.headers()?.clone();
        if header.is_none() {
            writer.write_record(&page_header)?;
            header = Some(page_header.clone());
        }
        let positions: Vec<Option<usize>> = header
            .iter()
            .flat_map(|h| h.iter())
            .map(|column| page_header.iter().position(|c| c == column))
            .collect();

        for record in reader.records() {
            let record = record?;
            writer.write_record(
                positions
                    .iter()
                    .map(|pos| pos.and_then(|p| record.get(p)).unwrap_or("")),
            )?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}

#[async_trait]
impl WorkUnit for ExportCollator {
    fn describe(&self) -> String {
        format!("{} export collation", self.key)
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.collate().await?;
        Ok(())
    }

    async fn failed(&self, err: &anyhow::Error) {
        error!(job = %self.key, error = %format!("{:#}", err), "Export collation gave up");
        self.abandon().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_maps_columns_by_name() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        std::fs::write(&first, "id,name\n1,Ada\n2,Grace\n").unwrap();
        std::fs::write(&second, "name,id,extra\nLinus,3,x\n").unwrap();

        let dest = dir.path().join("out").join("merged.csv");
        let chunks = vec![
            ChunkArtifact { index: 1, path: first },
            ChunkArtifact { index: 2, path: second },
        ];

        assert_eq!(merge_chunks(&chunks, &dest).unwrap(), 3);
        let text = std::fs::read_to_string(&dest).unwrap();
        assert_eq!(text, "id,name\n1,Ada\n2,Grace\n3,Linus\n");
    }
}

//! Naming and discovery of per-chunk artifacts
//!
//! Chunk files embed their 1-based chunk index zero-padded to five digits.
//! Ordering always uses the parsed numeric index, so batches with more than
//! 99 999 chunks still merge in order.

use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::dispatch::BatchId;
use super::error::SyncResult;
use super::types::JobKey;

/// An intermediate export chunk file on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkArtifact {
    pub index: u32,
    pub path: PathBuf,
}

pub fn export_chunk_file_name(batch: BatchId, index: u32) -> String {
    format!("export-{}-{:05}.csv", batch, index)
}

pub fn import_failure_chunk_file_name(job: JobKey, batch: BatchId, index: u32) -> String {
    format!("{}-failed-chunk-{}-{:05}.csv", job, batch, index)
}

pub fn import_failure_report_file_name(job: JobKey) -> String {
    format!("{}-failed.csv", job)
}

fn export_chunk_pattern(batch: BatchId) -> SyncResult<Regex> {
    let pattern = format!(
        r"^export-{}-(\d+)\.csv$",
        regex::escape(&batch.to_string())
    );
    Regex::new(&pattern).map_err(|e| anyhow::anyhow!("invalid chunk pattern: {}", e).into())
}

/// Index embedded in an export chunk file name of `batch`
pub fn parse_export_chunk_index(batch: BatchId, file_name: &str) -> Option<u32> {
    export_chunk_pattern(batch)
        .ok()?
        .captures(file_name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// All finished chunk files of `batch` in `dir`, ordered by index.
///
/// In-flight `.part` files are ignored.
pub async fn list_export_chunks(dir: &Path, batch: BatchId) -> SyncResult<Vec<ChunkArtifact>> {
    let pattern = export_chunk_pattern(batch)?;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut chunks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let index = pattern
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        if let Some(index) = index {
            chunks.push(ChunkArtifact {
                index,
                path: entry.path(),
            });
        }
    }

    chunks.sort_by_key(|c| c.index);
    Ok(chunks)
}

/// Delete files, ignoring ones that are already gone
pub async fn remove_files<'a, I>(paths: I)
where
    I: IntoIterator<Item = &'a Path>,
{
    for path in paths {
        remove_file_quietly(path).await;
    }
}

pub async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

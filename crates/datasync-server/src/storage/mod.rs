//! Blob storage for uploads, failure reports and published exports
//!
//! Blobs are attached to a job ([`JobKey`]) and grouped in named
//! collections. Every stored blob records its size and SHA-256 checksum.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::sync::Arc;
use uuid::Uuid;

use crate::sync::error::{SyncError, SyncResult};
use crate::sync::types::JobKey;

pub mod config;
pub mod local;
pub mod s3;

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

/// Collection names used by the pipeline
pub mod collections {
    /// The uploaded import file, or the published export
    pub const FILE: &str = "file";
    /// Per-chunk import failure reports
    pub const FAILED_CHUNKS: &str = "failed-chunks";
    /// The consolidated import failure report
    pub const FAILED: &str = "failed";
}

/// A stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHandle {
    pub id: Uuid,
    pub owner: JobKey,
    pub collection: String,
    pub file_name: String,
    pub disk: String,
    /// Backend key, relative to the store root or bucket
    pub key: String,
    pub size: u64,
    pub checksum: String,
    pub chunk_index: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// How a blob should be stored
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Name to store under, defaults to the local file name
    pub file_name: Option<String>,
    /// Sub-directory prefix for the stored name
    pub directory: Option<String>,
    pub chunk_index: Option<u32>,
    /// Replace anything already in the collection
    pub single_file: bool,
}

impl StoreOptions {
    pub fn named(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    pub fn single_file(mut self) -> Self {
        self.single_file = true;
        self
    }

    pub fn with_chunk_index(mut self, index: u32) -> Self {
        self.chunk_index = Some(index);
        self
    }

    pub fn in_directory(mut self, directory: Option<String>) -> Self {
        self.directory = directory.filter(|d| !d.trim_matches('/').is_empty());
        self
    }

    pub(crate) fn resolve_file_name(&self, local_path: &Path) -> String {
        self.file_name.clone().unwrap_or_else(|| {
            local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "blob".to_string())
        })
    }

    /// `<directory>/<file_name>` relative to the blob's own prefix.
    ///
    /// The file name must be a single plain segment and the directory may
    /// only descend, so the result never leaves the blob's prefix.
    pub(crate) fn relative_name(&self, file_name: &str) -> SyncResult<String> {
        let name = plain_segments(file_name)?;
        if name.len() != 1 {
            return Err(SyncError::InvalidPath(file_name.to_string()));
        }
        let mut segments = match &self.directory {
            Some(dir) => plain_segments(dir)?,
            None => Vec::new(),
        };
        segments.extend(name);
        Ok(segments.join("/"))
    }
}

/// Normal path segments of `path`, dropping `.` and rejecting anything
/// that could climb out of or replace the base
fn plain_segments(path: &str) -> SyncResult<Vec<String>> {
    let mut segments = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) if !part.contains('\\') => segments.push(part.to_string()),
                _ => return Err(SyncError::InvalidPath(path.to_string())),
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::InvalidPath(path.to_string()))
            }
        }
    }
    Ok(segments)
}

/// Prefix under which all blobs of one owner's collection live
pub fn collection_prefix(owner: JobKey, collection: &str) -> String {
    format!("{}/{}/", owner, collection)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy a local file into the store
    async fn store(
        &self,
        owner: JobKey,
        local_path: &Path,
        collection: &str,
        disk: &str,
        options: StoreOptions,
    ) -> SyncResult<BlobHandle>;

    async fn first_of(&self, owner: JobKey, collection: &str) -> SyncResult<Option<BlobHandle>> {
        Ok(self.all_of(owner, collection).await?.into_iter().next())
    }

    /// All blobs of a collection, ordered by chunk index then creation time
    async fn all_of(&self, owner: JobKey, collection: &str) -> SyncResult<Vec<BlobHandle>>;

    /// Remove a whole collection
    async fn delete(&self, owner: JobKey, collection: &str) -> SyncResult<()> {
        for handle in self.all_of(owner, collection).await? {
            self.delete_handle(&handle).await?;
        }
        Ok(())
    }

    async fn delete_handle(&self, handle: &BlobHandle) -> SyncResult<()>;

    async fn stream_contents(&self, handle: &BlobHandle) -> SyncResult<Vec<u8>>;

    /// Write a blob's contents to a local file, replacing it.
    ///
    /// The file is swapped in whole, so concurrent readers never see a
    /// partial copy.
    async fn materialize(&self, handle: &BlobHandle, dest: &Path) -> SyncResult<()> {
        let bytes = self.stream_contents(handle).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = dest.as_os_str().to_owned();
        partial.push(format!(".{}.part", Uuid::new_v4()));
        let partial = std::path::PathBuf::from(partial);
        tokio::fs::write(&partial, bytes).await?;
        if let Err(err) = tokio::fs::rename(&partial, dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        Ok(())
    }
}

pub(crate) fn sort_handles(handles: &mut [BlobHandle]) {
    handles.sort_by(|a, b| {
        a.chunk_index
            .cmp(&b.chunk_index)
            .then(a.created_at.cmp(&b.created_at))
    });
}

/// Build the configured blob store
pub async fn from_config(config: &config::StorageConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    Ok(match config.backend {
        config::StorageBackend::Local => Arc::new(LocalBlobStore::new(&config.local_root)),
        config::StorageBackend::S3 => Arc::new(S3BlobStore::new(&config.s3).await?),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_name_stays_under_prefix() {
        let options = StoreOptions::named("report.csv").in_directory(Some("./exports//2024/".into()));
        assert_eq!(options.relative_name("report.csv").unwrap(), "exports/2024/report.csv");
        assert_eq!(StoreOptions::default().relative_name("a.csv").unwrap(), "a.csv");
    }

    #[test]
    fn test_relative_name_rejects_escapes() {
        let plain = StoreOptions::default();
        for name in ["../x.csv", "/etc/passwd", "a/b.csv", "..", "", "a\\..\\b.csv"] {
            assert!(
                matches!(plain.relative_name(name), Err(SyncError::InvalidPath(_))),
                "{name:?} should be rejected"
            );
        }

        for dir in ["../../escaped", "/abs", "reports/../../up"] {
            let options = StoreOptions::default().in_directory(Some(dir.into()));
            assert!(
                matches!(options.relative_name("a.csv"), Err(SyncError::InvalidPath(_))),
                "{dir:?} should be rejected"
            );
        }
    }
}

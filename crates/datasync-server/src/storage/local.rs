//! Filesystem blob store
//!
//! Layout under the root directory:
//!
//! ```text
//! <owner>/<collection>/<blob id>.json        metadata sidecar
//! <owner>/<collection>/<blob id>/<name>      contents
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{collection_prefix, sort_handles, BlobHandle, BlobStore, StoreOptions};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::types::JobKey;
use datasync_common::checksum::{sha256_bytes, verify_sha256};

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, owner: JobKey, collection: &str) -> PathBuf {
        self.root.join(collection_prefix(owner, collection))
    }

    fn sidecar_path(&self, handle: &BlobHandle) -> PathBuf {
        self.collection_dir(handle.owner, &handle.collection)
            .join(format!("{}.json", handle.id))
    }

    fn blob_dir(&self, handle: &BlobHandle) -> PathBuf {
        self.collection_dir(handle.owner, &handle.collection)
            .join(handle.id.to_string())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, options), fields(owner = %owner))]
    async fn store(
        &self,
        owner: JobKey,
        local_path: &Path,
        collection: &str,
        disk: &str,
        options: StoreOptions,
    ) -> SyncResult<BlobHandle> {
        let file_name = options.resolve_file_name(local_path);
        let relative = options.relative_name(&file_name)?;
        if options.single_file {
            self.delete(owner, collection).await?;
        }

        let data = tokio::fs::read(local_path).await?;
        let id = Uuid::new_v4();

        let handle = BlobHandle {
            id,
            owner,
            collection: collection.to_string(),
            file_name,
            disk: disk.to_string(),
            key: format!("{}{}/{}", collection_prefix(owner, collection), id, relative),
            size: data.len() as u64,
            checksum: sha256_bytes(&data),
            chunk_index: options.chunk_index,
            created_at: Utc::now(),
        };

        let target = self.root.join(&handle.key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;

        let sidecar = serde_json::to_vec_pretty(&handle)
            .map_err(|e| SyncError::blob(format!("failed to encode blob metadata: {}", e)))?;
        tokio::fs::write(self.sidecar_path(&handle), sidecar).await?;

        debug!(key = %handle.key, size = handle.size, "Stored blob");
        Ok(handle)
    }

    async fn all_of(&self, owner: JobKey, collection: &str) -> SyncResult<Vec<BlobHandle>> {
        let dir = self.collection_dir(owner, collection);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut handles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<BlobHandle>(&raw) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable blob metadata"),
            }
        }

        sort_handles(&mut handles);
        Ok(handles)
    }

    async fn delete_handle(&self, handle: &BlobHandle) -> SyncResult<()> {
        match tokio::fs::remove_dir_all(self.blob_dir(handle)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(self.sidecar_path(handle)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(key = %handle.key, "Deleted blob");
        Ok(())
    }

    async fn stream_contents(&self, handle: &BlobHandle) -> SyncResult<Vec<u8>> {
        let data = tokio::fs::read(self.root.join(&handle.key)).await?;
        verify_sha256(&data, &handle.checksum)?;
        Ok(data)
    }
}

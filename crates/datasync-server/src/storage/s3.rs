//! S3-compatible blob store
//!
//! Blob metadata travels as S3 user metadata on each object, so listing a
//! collection is a prefix listing followed by one HEAD per object.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::S3Config;
use super::{collection_prefix, sort_handles, BlobHandle, BlobStore, StoreOptions};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::types::JobKey;
use datasync_common::checksum::{sha256_bytes, verify_sha256};

const META_BLOB_ID: &str = "blob-id";
const META_FILE_NAME: &str = "file-name";
const META_DISK: &str = "disk";
const META_CHECKSUM: &str = "checksum";
const META_CHUNK_INDEX: &str = "chunk-index";
const META_CREATED_AT: &str = "created-at";

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing S3 blob store");

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "datasync-storage",
                ))
                .region(Region::new(config.region.clone())),
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %config.bucket, "S3 blob store initialized");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    async fn list_keys(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| SyncError::blob(DisplayErrorContext(&e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn head(&self, owner: JobKey, collection: &str, key: &str) -> SyncResult<BlobHandle> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| SyncError::blob(DisplayErrorContext(&e)))?;

        let empty = HashMap::new();
        let meta = response.metadata().unwrap_or(&empty);
        let get = |name: &str| meta.get(name).cloned();

        let id = get(META_BLOB_ID)
            .and_then(|v| Uuid::parse_str(&v).ok())
            .ok_or_else(|| SyncError::blob(format!("object {} has no blob id", key)))?;

        Ok(BlobHandle {
            id,
            owner,
            collection: collection.to_string(),
            file_name: get(META_FILE_NAME)
                .unwrap_or_else(|| key.rsplit('/').next().unwrap_or(key).to_string()),
            disk: get(META_DISK).unwrap_or_default(),
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            checksum: get(META_CHECKSUM).unwrap_or_default(),
            chunk_index: get(META_CHUNK_INDEX).and_then(|v| v.parse().ok()),
            created_at: get(META_CREATED_AT)
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
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
            key: format!("{}{}/{}", collection_prefix(owner, collection), id, relative),
            file_name,
            disk: disk.to_string(),
            size: data.len() as u64,
            checksum: sha256_bytes(&data),
            chunk_index: options.chunk_index,
            created_at: Utc::now(),
        };

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .content_type("text/csv")
            .metadata(META_BLOB_ID, id.to_string())
            .metadata(META_FILE_NAME, handle.file_name.clone())
            .metadata(META_DISK, handle.disk.clone())
            .metadata(META_CHECKSUM, handle.checksum.clone())
            .metadata(META_CREATED_AT, handle.created_at.to_rfc3339());
        if let Some(index) = handle.chunk_index {
            request = request.metadata(META_CHUNK_INDEX, index.to_string());
        }

        request
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| SyncError::blob(DisplayErrorContext(&e)))?;

        info!(bucket = %self.bucket, key = %handle.key, size = handle.size, "Uploaded blob");
        Ok(handle)
    }

    async fn all_of(&self, owner: JobKey, collection: &str) -> SyncResult<Vec<BlobHandle>> {
        let keys = self.list_keys(&collection_prefix(owner, collection)).await?;

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            match self.head(owner, collection, &key).await {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(key = %key, error = %e, "Skipping object without blob metadata"),
            }
        }

        sort_handles(&mut handles);
        Ok(handles)
    }

    #[instrument(skip(self, handle), fields(key = %handle.key))]
    async fn delete_handle(&self, handle: &BlobHandle) -> SyncResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await
            .map_err(|e| SyncError::blob(DisplayErrorContext(&e)))?;
        debug!("Deleted blob");
        Ok(())
    }

    #[instrument(skip(self, handle), fields(key = %handle.key))]
    async fn stream_contents(&self, handle: &BlobHandle) -> SyncResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await
            .map_err(|e| SyncError::blob(DisplayErrorContext(&e)))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| SyncError::blob(format!("failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();
        // objects written by other tools may carry no checksum
        if !handle.checksum.is_empty() {
            verify_sha256(&data, &handle.checksum)?;
        }

        debug!(size = data.len(), "Downloaded blob");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_prefix_scopes_owner() {
        assert_eq!(
            collection_prefix(JobKey::import(4), "failed-chunks"),
            "import-4/failed-chunks/"
        );
        assert_ne!(
            collection_prefix(JobKey::import(4), "file"),
            collection_prefix(JobKey::export(4), "file")
        );
    }
}

//! Test helpers for datasync integration tests
//!
//! This module provides:
//! - A pipeline harness on an in-memory job store and a temp-dir blob store
//! - Import and export processors with controllable behaviour
//! - Small readers for published CSV artifacts
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use datasync_server::config::DispatchSettings;
use datasync_server::db::InMemoryJobStore;
use datasync_server::storage::{BlobHandle, BlobStore, LocalBlobStore};
use datasync_server::sync::processor::{ExportProcessor, ImportProcessor};
use datasync_server::sync::rules::Rule;
use datasync_server::sync::source::{Record, RecordSource, VecSource};
use datasync_server::sync::types::{Job, JobKey, Row};
use datasync_server::sync::{ProcessorRegistry, SyncContext, SyncSettings, TokioDispatcher};

/// Everything a pipeline test needs, rooted in one temp dir
pub struct Harness {
    pub ctx: SyncContext,
    pub dispatcher: Arc<TokioDispatcher>,
    pub blobs: Arc<LocalBlobStore>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self::with_settings(registry, |_| {})
    }

    pub fn with_settings(registry: ProcessorRegistry, tweak: impl FnOnce(&mut SyncSettings)) -> Self {
        let dir = TempDir::new().unwrap();

        let mut settings = SyncSettings {
            work_dir: dir.path().join("work"),
            ..SyncSettings::default()
        };
        // every row sees the current status
        settings.imports.stop_check_ttl = Duration::ZERO;
        settings.imports.counter_flush_every = 10;
        tweak(&mut settings);

        let dispatcher = Arc::new(TokioDispatcher::new(DispatchSettings {
            concurrency: 2,
            max_attempts: 2,
            retry_backoff: Duration::from_millis(1),
        }));
        let blobs = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));

        let ctx = SyncContext::new(
            Arc::new(InMemoryJobStore::new()),
            blobs.clone(),
            dispatcher.clone(),
            registry,
            settings,
        );

        Self {
            ctx,
            dispatcher,
            blobs,
            dir,
        }
    }

    /// Wait for every batch, hook and collator to settle
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(30), self.dispatcher.wait_idle())
            .await
            .expect("pipeline did not settle");
    }

    pub fn write_upload(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub async fn job(&self, key: JobKey) -> Job {
        self.ctx.store.get(key).await.unwrap()
    }

    pub async fn handles(&self, key: JobKey, collection: &str) -> Vec<BlobHandle> {
        self.blobs.all_of(key, collection).await.unwrap()
    }

    /// Parsed rows of a stored CSV, header first
    pub async fn read_csv(&self, handle: &BlobHandle) -> Vec<Vec<String>> {
        let bytes = self.blobs.stream_contents(handle).await.unwrap();
        parse_csv(&bytes)
    }

    /// Finished or in-flight export page files left in the work dir
    pub fn leftover_pages(&self) -> usize {
        std::fs::read_dir(self.ctx.settings.export_temp_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn parse_csv(bytes: &[u8]) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes)
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

/// `name,email` upload with `rows` people; listed rows get a broken email
pub fn people_csv(rows: u64, bad_rows: &[u64]) -> String {
    let mut csv = String::from("Name,Email\n");
    for i in 1..=rows {
        if bad_rows.contains(&i) {
            csv.push_str(&format!("person {},not-an-email\n", i));
        } else {
            csv.push_str(&format!("person {},person{}@example.com\n", i, i));
        }
    }
    csv
}

/// Imports people, remembering the global index of every processed row
#[derive(Default)]
pub struct PeopleImport {
    pub chunk_size: Option<u64>,
    pub row_delay: Option<Duration>,
    /// Rows whose `process` returns an error
    pub rejected_rows: Vec<u64>,
    /// Rows whose `process` panics, failing the whole chunk attempt
    pub crashing_rows: Vec<u64>,
    pub seen: Mutex<Vec<u64>>,
    pub processed: AtomicU64,
}

impl PeopleImport {
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size: Some(chunk_size),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        let mut seen = self.seen.lock().unwrap().clone();
        seen.sort_unstable();
        seen
    }
}

#[async_trait]
impl ImportProcessor for PeopleImport {
    fn expected_headers(&self) -> Vec<String> {
        vec!["name".to_string(), "email".to_string()]
    }

    fn rules(&self, _row: &Row, _row_index: u64) -> Vec<Rule> {
        vec![Rule::required("name"), Rule::email("email")]
    }

    async fn process(&self, _row: &Row, row_index: u64) -> anyhow::Result<()> {
        if let Some(delay) = self.row_delay {
            tokio::time::sleep(delay).await;
        }
        if self.crashing_rows.contains(&row_index) {
            panic!("importer crashed on row {}", row_index);
        }
        if self.rejected_rows.contains(&row_index) {
            anyhow::bail!("could not save row {}", row_index);
        }
        self.seen.lock().unwrap().push(row_index);
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }
}

/// Records `{"id": n, "label": "row-n"}` for `n` in `1..=count`
pub fn numbered_records(count: u64) -> Vec<Record> {
    (1..=count)
        .map(|n| json!({"id": n, "label": format!("row-{}", n)}))
        .collect()
}

/// A source whose listed pages always fail
pub struct BrokenPages {
    pub inner: VecSource,
    pub broken: Vec<u64>,
}

#[async_trait]
impl RecordSource for BrokenPages {
    async fn count(&self) -> anyhow::Result<u64> {
        self.inner.count().await
    }

    async fn page(&self, page: u64, per_page: u64) -> anyhow::Result<Vec<Record>> {
        if self.broken.contains(&page) {
            anyhow::bail!("page {} is unavailable", page);
        }
        self.inner.page(page, per_page).await
    }
}

pub struct NumbersExport {
    pub source: Arc<dyn RecordSource>,
    pub chunk_size: Option<u64>,
    pub allow_failures: Option<bool>,
    pub name: Option<String>,
}

impl NumbersExport {
    pub fn new(count: u64, chunk_size: u64) -> Self {
        Self {
            source: Arc::new(VecSource::new(numbered_records(count))),
            chunk_size: Some(chunk_size),
            allow_failures: None,
            name: None,
        }
    }

    pub fn with_broken_pages(count: u64, chunk_size: u64, broken: Vec<u64>) -> Self {
        Self {
            source: Arc::new(BrokenPages {
                inner: VecSource::new(numbered_records(count)),
                broken,
            }),
            ..Self::new(count, chunk_size)
        }
    }
}

impl ExportProcessor for NumbersExport {
    fn source(&self) -> Arc<dyn RecordSource> {
        self.source.clone()
    }

    fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn allow_failures(&self) -> Option<bool> {
        self.allow_failures
    }
}

pub fn registry_with_import(id: &str, processor: Arc<dyn ImportProcessor>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register_import(id, processor).unwrap();
    registry
}

pub fn registry_with_export(id: &str, processor: Arc<dyn ExportProcessor>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register_export(id, processor).unwrap();
    registry
}

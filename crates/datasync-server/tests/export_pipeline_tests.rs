//! Export pipeline integration tests

mod helpers;

use async_trait::async_trait;
use std::sync::Arc;

use datasync_server::db::InMemoryJobStore;
use datasync_server::storage::{collections, LocalBlobStore};
use datasync_server::sync::dispatch::{BatchOptions, Dispatcher, WorkUnit};
use datasync_server::sync::export::{ExportCollator, ExportTarget};
use datasync_server::sync::types::JobKind;
use datasync_server::sync::{
    BatchId, ExportRequest, ProcessorRegistry, Status, SyncContext, SyncError, SyncEvent,
    SyncResult, SyncSettings,
};
use helpers::{registry_with_export, Harness, NumbersExport};

fn request(name: Option<&str>) -> ExportRequest {
    ExportRequest {
        processor: "numbers".to_string(),
        name: name.map(str::to_string),
        ..ExportRequest::default()
    }
}

#[tokio::test]
async fn test_export_keeps_record_order_across_pages() {
    let harness = Harness::new(registry_with_export(
        "numbers",
        Arc::new(NumbersExport::new(2500, 1000)),
    ));
    let mut events = harness.ctx.events.subscribe();

    let job = harness
        .ctx
        .exports()
        .start_export(request(Some("numbers report")))
        .await
        .unwrap();
    assert_eq!(job.status, Status::Pending);
    assert_eq!(job.file_total_rows, 2500);
    harness.settle().await;

    let job = harness.job(job.key()).await;
    assert_eq!(job.status, Status::Completed);
    assert_eq!(job.total_rows_processed, 2500);
    assert_eq!(job.filename.as_deref(), Some("numbers-report.csv"));

    let files = harness.handles(job.key(), collections::FILE).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "numbers-report.csv");

    let rows = harness.read_csv(&files[0]).await;
    assert_eq!(rows[0], vec!["id", "label"]);
    assert_eq!(rows.len(), 2501);
    for (n, row) in rows[1..].iter().enumerate() {
        let id = n + 1;
        assert_eq!(row, &vec![id.to_string(), format!("row-{}", id)]);
    }
    assert_eq!(harness.leftover_pages(), 0);

    assert!(matches!(events.recv().await.unwrap(), SyncEvent::ExportStarted(_)));
    assert!(matches!(events.recv().await.unwrap(), SyncEvent::ExportCompleted(_)));
}

#[tokio::test]
async fn test_empty_export_completes_without_file() {
    let harness = Harness::new(registry_with_export("numbers", Arc::new(NumbersExport::new(0, 10))));

    let job = harness.ctx.exports().start_export(request(None)).await.unwrap();
    assert_eq!(job.status, Status::Completed);
    assert!(job.started_at.is_none());
    harness.settle().await;

    assert!(harness.handles(job.key(), collections::FILE).await.is_empty());
    assert_eq!(harness.leftover_pages(), 0);
}

#[tokio::test]
async fn test_tolerated_page_failure_skips_its_rows() {
    let mut processor = NumbersExport::with_broken_pages(30, 10, vec![2]);
    processor.allow_failures = Some(true);
    let harness = Harness::new(registry_with_export("numbers", Arc::new(processor)));

    let job = harness.ctx.exports().start_export(request(Some("partial"))).await.unwrap();
    harness.settle().await;

    let job = harness.job(job.key()).await;
    assert_eq!(job.status, Status::Completed);
    assert_eq!(job.total_rows_processed, 20);

    let files = harness.handles(job.key(), collections::FILE).await;
    let rows = harness.read_csv(&files[0]).await;
    let ids: Vec<u64> = rows[1..].iter().map(|r| r[0].parse().unwrap()).collect();
    let expected: Vec<u64> = (1..=10).chain(21..=30).collect();
    assert_eq!(ids, expected);
    assert_eq!(harness.leftover_pages(), 0);
}

#[tokio::test]
async fn test_page_failure_fails_strict_export() {
    let mut processor = NumbersExport::with_broken_pages(30, 10, vec![3]);
    processor.allow_failures = Some(false);
    let harness = Harness::new(registry_with_export("numbers", Arc::new(processor)));

    let job = harness.ctx.exports().start_export(request(None)).await.unwrap();
    harness.settle().await;

    let job = harness.job(job.key()).await;
    assert_eq!(job.status, Status::Failed);
    assert!(job.completed_at.is_some());
    assert!(harness.handles(job.key(), collections::FILE).await.is_empty());
    assert_eq!(harness.leftover_pages(), 0);
}

#[tokio::test]
async fn test_export_with_every_page_failing_is_failed() {
    let mut processor = NumbersExport::with_broken_pages(20, 10, vec![1, 2]);
    processor.allow_failures = Some(true);
    let harness = Harness::new(registry_with_export("numbers", Arc::new(processor)));

    let job = harness.ctx.exports().start_export(request(None)).await.unwrap();
    harness.settle().await;

    let job = harness.job(job.key()).await;
    assert_eq!(job.status, Status::Failed);
    assert!(harness.handles(job.key(), collections::FILE).await.is_empty());
}

#[tokio::test]
async fn test_export_collation_is_idempotent() {
    let harness = Harness::new(registry_with_export("numbers", Arc::new(NumbersExport::new(15, 10))));

    let job = harness.ctx.exports().start_export(request(Some("twice"))).await.unwrap();
    harness.settle().await;
    assert_eq!(harness.job(job.key()).await.status, Status::Completed);

    let collator = ExportCollator::new(
        harness.ctx.clone(),
        job.key(),
        BatchId::new(),
        ExportTarget {
            name: "twice".to_string(),
            disk: "local".to_string(),
            directory: None,
        },
        false,
    );
    assert!(collator.collate().await.unwrap().is_none());
    assert_eq!(harness.handles(job.key(), collections::FILE).await.len(), 1);
    assert_eq!(harness.job(job.key()).await.status, Status::Completed);
}

#[tokio::test]
async fn test_export_directory_from_request() {
    let harness = Harness::new(registry_with_export("numbers", Arc::new(NumbersExport::new(3, 10))));

    let job = harness
        .ctx
        .exports()
        .start_export(ExportRequest {
            processor: "numbers".to_string(),
            name: Some("nested".to_string()),
            directory: Some("reports/2024".to_string()),
            ..ExportRequest::default()
        })
        .await
        .unwrap();
    harness.settle().await;

    let files = harness.handles(job.key(), collections::FILE).await;
    assert_eq!(files.len(), 1);
    assert!(files[0].key.ends_with("reports/2024/nested.csv"));
}

#[tokio::test]
async fn test_export_directory_cannot_escape_blob_root() {
    let harness = Harness::new(registry_with_export("numbers", Arc::new(NumbersExport::new(3, 10))));

    let err = harness
        .ctx
        .exports()
        .start_export(ExportRequest {
            processor: "numbers".to_string(),
            name: Some("leak".to_string()),
            directory: Some("../../../../escaped-dir".to_string()),
            ..ExportRequest::default()
        })
        .await
        .unwrap_err();
    harness.settle().await;

    assert!(matches!(err, SyncError::InvalidPath(_)));
    assert!(harness.ctx.store.list(JobKind::Export, 10).await.unwrap().is_empty());
    assert!(!harness.dir.path().join("escaped-dir").exists());
    assert!(!harness.dir.path().join("blobs").join("escaped-dir").exists());
}

#[tokio::test]
async fn test_export_directory_is_normalised() {
    let harness = Harness::new(registry_with_export("numbers", Arc::new(NumbersExport::new(3, 10))));

    let job = harness
        .ctx
        .exports()
        .start_export(ExportRequest {
            processor: "numbers".to_string(),
            name: Some("tidy".to_string()),
            directory: Some("./reports//2024 q1/".to_string()),
            ..ExportRequest::default()
        })
        .await
        .unwrap();
    harness.settle().await;

    let files = harness.handles(job.key(), collections::FILE).await;
    assert_eq!(files.len(), 1);
    assert!(files[0].key.ends_with("/reports/2024-q1/tidy.csv"));
    assert!(harness.dir.path().join("blobs").join(&files[0].key).exists());
}

/// Accepts nothing
struct ClosedDispatcher;

#[async_trait]
impl Dispatcher for ClosedDispatcher {
    async fn dispatch_batch(
        &self,
        _units: Vec<Arc<dyn WorkUnit>>,
        _options: BatchOptions,
    ) -> SyncResult<BatchId> {
        Err(SyncError::Dispatch("queue unavailable".to_string()))
    }

    async fn dispatch_one(&self, _unit: Arc<dyn WorkUnit>, _queue: &str) -> SyncResult<()> {
        Err(SyncError::Dispatch("queue unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_dispatch_failure_marks_job_failed() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut registry = ProcessorRegistry::new();
    registry
        .register_export("numbers", Arc::new(NumbersExport::new(5, 2)))
        .unwrap();
    let ctx = SyncContext::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(LocalBlobStore::new(dir.path().join("blobs"))),
        Arc::new(ClosedDispatcher),
        registry,
        SyncSettings {
            work_dir: dir.path().join("work"),
            ..SyncSettings::default()
        },
    );

    let err = ctx.exports().start_export(request(None)).await.unwrap_err();
    assert!(matches!(err, SyncError::Dispatch(_)));

    let jobs = ctx.store.list(JobKind::Export, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, Status::Failed);
}

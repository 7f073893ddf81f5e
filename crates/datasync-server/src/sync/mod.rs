//! Chunked, resumable bulk import and export
//!
//! # Imports
//!
//! ```text
//! upload ──► ImportCoordinator ──► batch of ImportChunkWorker ──► finish hook ──► FailureCollator
//!              header check          validate + process rows       final status     one failure report
//!              job (Pending)         per-chunk failure reports
//! ```
//!
//! # Exports
//!
//! ```text
//! request ──► ExportCoordinator ──► batch of ExportChunkWorker ──► finish hook ──► ExportCollator
//!               count records          one CSV file per page          dispatch       merge + publish
//! ```
//!
//! Everything a running job needs lives in [`SyncContext`], which is cheap
//! to clone into workers and hooks.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ExportSettings, ImportSettings};
use crate::db::JobStore;
use crate::storage::BlobStore;

pub mod artifact;
pub mod cancel;
pub mod counters;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod export;
pub mod import;
pub mod partition;
pub mod processor;
pub mod registry;
pub mod rules;
pub mod source;
pub mod status;
pub mod types;

pub use cancel::StopSignal;
pub use dispatch::{BatchId, Dispatcher, TokioDispatcher, WorkUnit};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use export::{ExportCoordinator, ExportRequest};
pub use import::{ImportCoordinator, ImportRequest};
pub use processor::{ExportProcessor, ImportProcessor};
pub use registry::ProcessorRegistry;
pub use status::Status;
pub use types::{Job, JobKey, JobKind};

/// Pipeline settings
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    /// Scratch space for sources, chunk artifacts and merges
    pub work_dir: PathBuf,
    pub imports: ImportSettings,
    pub exports: ExportSettings,
}

impl SyncSettings {
    /// Directory of intermediate export chunk files
    pub fn export_temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }

    /// Local copy of an import's uploaded file
    pub fn import_source_path(&self, key: JobKey) -> PathBuf {
        self.work_dir.join("sources").join(format!("{}.csv", key))
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.work_dir.join("reports")
    }
}

/// Shared services of the pipeline
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub registry: Arc<ProcessorRegistry>,
    pub events: EventBus,
    pub stop_signal: Arc<StopSignal>,
    pub settings: Arc<SyncSettings>,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn Dispatcher>,
        registry: ProcessorRegistry,
        settings: SyncSettings,
    ) -> Self {
        let stop_signal = Arc::new(StopSignal::new(
            store.clone(),
            settings.imports.stop_check_ttl,
        ));
        Self {
            store,
            blobs,
            dispatcher,
            registry: Arc::new(registry),
            events: EventBus::default(),
            stop_signal,
            settings: Arc::new(settings),
        }
    }

    pub fn imports(&self) -> ImportCoordinator {
        ImportCoordinator::new(self.clone())
    }

    pub fn exports(&self) -> ExportCoordinator {
        ExportCoordinator::new(self.clone())
    }
}

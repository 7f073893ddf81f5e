//! Export pipeline

mod collator;
mod coordinator;
mod worker;

pub use collator::{ExportCollator, ExportTarget};
pub use coordinator::{default_export_name, ExportCoordinator, ExportRequest};
pub use worker::ExportChunkWorker;

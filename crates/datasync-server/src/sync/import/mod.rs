//! Import pipeline

mod collator;
mod coordinator;
mod worker;

pub use collator::FailureCollator;
pub use coordinator::{resolve_final_status, ImportCoordinator, ImportRequest};
pub use worker::{ChunkReport, ImportChunkWorker};

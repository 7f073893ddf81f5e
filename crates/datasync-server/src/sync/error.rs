//! Error taxonomy of the sync pipeline

use thiserror::Error;

use super::status::Status;
use super::types::JobKey;
use datasync_common::CommonError;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("Processor already registered: {0}")]
    DuplicateProcessor(String),

    #[error("Invalid file headers, missing: {}", missing.join(", "))]
    InvalidHeaders { missing: Vec<String> },

    #[error("Job not found: {0}")]
    JobNotFound(JobKey),

    #[error("Cannot move {key} from {from} to {to}")]
    InvalidTransition {
        key: JobKey,
        from: Status,
        to: Status,
    },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Source file for {0} is not available")]
    MissingSource(JobKey),

    #[error("Record source error: {0:#}")]
    Source(anyhow::Error),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn blob(err: impl std::fmt::Display) -> Self {
        SyncError::Blob(err.to_string())
    }

    /// Errors caused by the caller rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownProcessor(_)
                | SyncError::InvalidHeaders { .. }
                | SyncError::JobNotFound(_)
                | SyncError::InvalidTransition { .. }
                | SyncError::InvalidPath(_)
        )
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Other(anyhow::anyhow!("Blocking task failed: {}", err))
    }
}

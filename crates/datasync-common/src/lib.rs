//! Datasync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the datasync workspace members:
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: environment-driven `tracing` subscriber setup
//! - **Checksums**: sha256 digests for published artifacts
//! - **Text**: header normalisation used when reading uploaded files

pub mod checksum;
pub mod error;
pub mod logging;
pub mod text;

// Re-export commonly used types
pub use error::{CommonError, Result};

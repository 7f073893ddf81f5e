//! Datasync Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Chunked bulk import and export of tabular data.
//!
//! # Overview
//!
//! - **Imports**: an uploaded CSV is checked against the processor's
//!   expected headers, split into chunks and processed row by row in
//!   parallel. Rejected rows are gathered into one failure report.
//! - **Exports**: a processor's record source is paged, each page is written
//!   to its own file in parallel, and the pages are merged in order into one
//!   published CSV.
//! - **Jobs**: every import and export is a persisted job with a status and
//!   row counters, usable for progress display and cooperative stop.
//!
//! # Architecture
//!
//! - [`sync`]: the pipeline, processor contracts and the in-process dispatcher
//! - [`db`]: job stores (in-memory and Postgres)
//! - [`storage`]: blob stores (local filesystem and S3)
//! - [`api`]: axum routes
//! - [`config`]: environment-based configuration
//!
//! # Processors
//!
//! What an import does with its rows and what an export reads is supplied
//! by the embedding application through [`sync::ProcessorRegistry`]. The
//! bundled `datasync-server` binary registers none, so its import and export
//! routes answer 404 until a build that embeds this crate registers some.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use datasync_server::{api, config::Config, db::memory::InMemoryJobStore, storage, sync};
//! use datasync_server::sync::{rules::Rule, types::Row, ImportProcessor};
//!
//! struct Contacts;
//!
//! #[async_trait]
//! impl ImportProcessor for Contacts {
//!     fn expected_headers(&self) -> Vec<String> {
//!         vec!["name".into(), "email".into()]
//!     }
//!
//!     fn rules(&self, _row: &Row, _row_index: u64) -> Vec<Rule> {
//!         vec![Rule::required("name"), Rule::email("email")]
//!     }
//!
//!     async fn process(&self, row: &Row, _row_index: u64) -> anyhow::Result<()> {
//!         tracing::info!(email = ?row.get("email"), "Saving contact");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let blobs = storage::from_config(&config.storage).await?;
//!     let mut registry = sync::ProcessorRegistry::new();
//!     registry.register_import("contacts", Arc::new(Contacts))?;
//!
//!     let ctx = sync::SyncContext::new(
//!         Arc::new(InMemoryJobStore::new()),
//!         blobs,
//!         Arc::new(sync::TokioDispatcher::new(config.dispatch.clone())),
//!         registry,
//!         config.sync_settings(),
//!     );
//!     let app = api::router(api::AppState::new(ctx));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use error::AppError;

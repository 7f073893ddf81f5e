//! HTTP surface of the sync pipeline

pub mod exports;
pub mod imports;
pub mod response;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::sync::types::Initiator;
use crate::sync::SyncContext;

/// Header naming the principal that started a job
pub const INITIATOR_ID_HEADER: &str = "x-initiator-id";
/// Header naming the principal's type, e.g. `user`
pub const INITIATOR_TYPE_HEADER: &str = "x-initiator-type";

#[derive(Clone)]
pub struct AppState {
    pub ctx: SyncContext,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/imports", get(imports::list_imports))
        .route("/imports/sample", get(imports::sample_file))
        .route(
            "/imports/:key",
            post(imports::start_import).get(imports::get_import),
        )
        .route("/imports/:key/stop", post(imports::stop_import))
        .route("/exports", get(exports::list_exports))
        .route(
            "/exports/:key",
            post(exports::start_export).get(exports::get_export),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                ),
        )
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Initiator from request headers, when both are present
pub(crate) fn initiator_from(headers: &HeaderMap) -> Option<Initiator> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some(Initiator {
        id: value(INITIATOR_ID_HEADER)?,
        kind: value(INITIATOR_TYPE_HEADER)?,
    })
}

//! Export routes

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use super::response::{JobListResponse, JobResponse, ListQuery};
use super::{initiator_from, AppState};
use crate::error::AppError;
use crate::sync::types::JobKind;
use crate::sync::ExportRequest;

/// Optional overrides of an export request
#[derive(Debug, Default, Deserialize)]
pub struct ExportBody {
    pub name: Option<String>,
    pub disk: Option<String>,
    pub directory: Option<String>,
}

/// POST /exports/:processor
#[tracing::instrument(skip(state, headers, body))]
pub async fn start_export(
    State(state): State<AppState>,
    Path(processor): Path<String>,
    headers: HeaderMap,
    body: Option<Json<ExportBody>>,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let job = state
        .ctx
        .exports()
        .start_export(ExportRequest {
            processor,
            initiator: initiator_from(&headers),
            name: body.name,
            disk: body.disk,
            directory: body.directory,
        })
        .await?;
    tracing::info!(job = %job.key(), "Export accepted via API");
    Ok((StatusCode::CREATED, Json(job.into())))
}

/// GET /exports/:id
pub async fn get_export(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state.ctx.exports().get(id).await?;
    Ok(Json(job.into()))
}

/// GET /exports?limit=50
pub async fn list_exports(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JobListResponse>, AppError> {
    let jobs = state.ctx.store.list(JobKind::Export, query.limit).await?;
    Ok(Json(jobs.into()))
}

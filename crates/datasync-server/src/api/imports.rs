//! Import routes

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::response::{JobListResponse, JobResponse, ListQuery};
use super::{initiator_from, AppState};
use crate::error::AppError;
use crate::sync::artifact::remove_file_quietly;
use crate::sync::types::JobKind;
use crate::sync::ImportRequest;

#[derive(Debug, Deserialize)]
pub struct SampleQuery {
    pub processor: String,
}

/// Header-only CSV for a processor
///
/// GET /imports/sample?processor=users
#[tracing::instrument(skip(state))]
pub async fn sample_file(
    State(state): State<AppState>,
    Query(query): Query<SampleQuery>,
) -> Result<Response, AppError> {
    let processor = state.ctx.registry.import(&query.processor)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(processor.expected_headers())
        .map_err(crate::sync::SyncError::from)?;
    let body = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to build sample file: {}", e)))?;

    let disposition = format!("attachment; filename=\"{}-sample.csv\"", query.processor);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Upload a file and start importing it
///
/// POST /imports/:processor (multipart, field `file`)
#[tracing::instrument(skip(state, headers, multipart))]
pub async fn start_import(
    State(state): State<AppState>,
    Path(processor): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    // unknown processors are rejected before reading the body
    state.ctx.registry.import(&processor)?;

    let upload_dir = state.ctx.settings.work_dir.join("uploads");
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(crate::sync::SyncError::from)?;

    let mut upload: Option<(PathBuf, String)> = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .and_then(client_file_name)
            .unwrap_or_else(|| format!("{}.csv", processor));
        let path = upload_dir.join(format!("{}.csv", Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&path).await?;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
            {
                file.write_all(&chunk).await?;
            }
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            remove_file_quietly(&path).await;
            return Err(AppError::BadRequest(format!("Failed to read upload: {}", err)));
        }
        upload = Some((path, filename));
        break;
    }

    let (upload_path, filename) =
        upload.ok_or_else(|| AppError::BadRequest("No file field found in multipart data".into()))?;

    let result = state
        .ctx
        .imports()
        .start_import(ImportRequest {
            processor,
            upload_path: upload_path.clone(),
            filename,
            initiator: initiator_from(&headers),
        })
        .await;
    remove_file_quietly(&upload_path).await;

    let job = result?;
    tracing::info!(job = %job.key(), "Import accepted via API");
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))).into_response())
}

/// Last segment of a client supplied file name, dropping any directories
fn client_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next()?;
    std::path::Path::new(last)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// GET /imports/:id
pub async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state.ctx.imports().get(id).await?;
    Ok(Json(job.into()))
}

/// POST /imports/:id/stop
#[tracing::instrument(skip(state))]
pub async fn stop_import(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let job = state.ctx.imports().request_stop(id).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// GET /imports?limit=50
pub async fn list_imports(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JobListResponse>, AppError> {
    let jobs = state.ctx.store.list(JobKind::Import, query.limit).await?;
    Ok(Json(jobs.into()))
}

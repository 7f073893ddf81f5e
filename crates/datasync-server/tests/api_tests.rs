//! HTTP route tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use datasync_server::api::{self, AppState};
use datasync_server::sync::ProcessorRegistry;
use helpers::{people_csv, Harness, NumbersExport, PeopleImport};

fn harness() -> Harness {
    let mut registry = ProcessorRegistry::new();
    registry
        .register_import("people", Arc::new(PeopleImport::with_chunk_size(5)))
        .unwrap();
    registry
        .register_export("numbers", Arc::new(NumbersExport::new(12, 5)))
        .unwrap();
    Harness::new(registry)
}

fn app(harness: &Harness) -> Router {
    api::router(AppState::new(harness.ctx.clone()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_upload(boundary: &str, filename: &str, contents: &str) -> Body {
    Body::from(format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        f = filename,
        c = contents
    ))
}

#[tokio::test]
async fn test_sample_file_has_only_headers() {
    let harness = harness();
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri("/imports/sample?processor=people")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"people-sample.csv\""
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"name,email\n");
}

#[tokio::test]
async fn test_sample_file_for_unknown_processor_is_not_found() {
    let harness = harness();
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri("/imports/sample?processor=nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], 404);
}

#[tokio::test]
async fn test_upload_starts_import() {
    let harness = harness();
    let boundary = "datasync-boundary";
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/imports/people")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .header(api::INITIATOR_ID_HEADER, "42")
                .header(api::INITIATOR_TYPE_HEADER, "user")
                .body(multipart_upload(boundary, "staff.csv", &people_csv(8, &[3])))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "Pending");
    assert_eq!(body["filename"], "staff.csv");
    assert_eq!(body["file_total_rows"], 8);
    assert_eq!(body["initiator"], json!({"id": "42", "type": "user"}));
    let id = body["id"].as_i64().unwrap();

    harness.settle().await;

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri(format!("/imports/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "Completed");
    assert_eq!(body["total_rows_processed"], 7);
    assert_eq!(body["total_rows_failed"], 1);
    assert_eq!(body["progress_percentage"], 100.0);
}

#[tokio::test]
async fn test_upload_name_cannot_escape_blob_root() {
    let harness = harness();
    let boundary = "datasync-boundary";
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/imports/people")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(multipart_upload(
                    boundary,
                    "../../../../escaped-upload.csv",
                    &people_csv(2, &[]),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["filename"], "escaped-upload.csv");
    let key = datasync_server::sync::JobKey::import(body["id"].as_i64().unwrap());
    harness.settle().await;

    let blob_root = harness.dir.path().join("blobs");
    let files = harness.handles(key, "file").await;
    assert_eq!(files.len(), 1);
    let stored = blob_root.join(&files[0].key);
    assert!(stored.starts_with(&blob_root));
    assert!(stored.exists());
    assert!(!harness.dir.path().join("escaped-upload.csv").exists());
    assert!(!blob_root.join("escaped-upload.csv").exists());
}

#[tokio::test]
async fn test_upload_without_file_is_bad_request() {
    let harness = harness();
    let boundary = "datasync-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = boundary
    );
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/imports/people")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_import_is_not_found() {
    let harness = harness();
    let response = app(&harness)
        .oneshot(Request::builder().uri("/imports/99").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/imports/99/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stopping_finished_import_conflicts() {
    let harness = harness();
    let upload = harness.write_upload("one.csv", &people_csv(1, &[]));
    let job = harness
        .ctx
        .imports()
        .start_import(datasync_server::sync::ImportRequest {
            processor: "people".to_string(),
            upload_path: upload,
            filename: "one.csv".to_string(),
            initiator: None,
        })
        .await
        .unwrap();
    harness.settle().await;

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/imports/{}/stop", job.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_export_routes() {
    let harness = harness();
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/exports/numbers")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "weekly"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    harness.settle().await;

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri(format!("/exports/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "Completed");
    assert_eq!(body["filename"], "weekly.csv");
    assert_eq!(body["total_rows_processed"], 12);

    let response = app(&harness)
        .oneshot(Request::builder().uri("/exports").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_export_without_body_uses_defaults() {
    let harness = harness();
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/exports/numbers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    harness.settle().await;

    let jobs = harness
        .ctx
        .store
        .list(datasync_server::sync::JobKind::Export, 10)
        .await
        .unwrap();
    let filename = jobs[0].filename.clone().unwrap();
    assert!(filename.starts_with("numbers-") && filename.ends_with(".csv"));
}

#[tokio::test]
async fn test_unknown_export_processor_is_not_found() {
    let harness = harness();
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/exports/nothing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

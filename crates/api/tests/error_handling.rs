//! `AppError` to HTTP response mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use fanout_api::error::AppError;
use fanout_pipeline::PipelineError;
use http_body_util::BodyExt;

async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn not_found_maps_to_404() {
    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::NotFound {
        entity: "task",
        id: 42,
    }))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "task with id 42 not found");
}

#[tokio::test]
async fn insufficient_balance_maps_to_402() {
    let (status, json) = error_to_response(AppError::Pipeline(
        PipelineError::InsufficientBalance {
            required: 30,
            available: 5,
        },
    ))
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["code"], "INSUFFICIENT_BALANCE");
    assert_eq!(json["error"], "30 points required, 5 available");
}

#[tokio::test]
async fn validation_and_conflict_keep_their_messages() {
    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::Validation(
        "prompt too short".into(),
    )))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "prompt too short");

    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::Conflict(
        "task 3 is already completed".into(),
    )))
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

#[tokio::test]
async fn internal_errors_are_sanitized() {
    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::Internal(
        "connection string postgres://secret".into(),
    )))
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");

    let (status, _) = error_to_response(AppError::InternalError("boom".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

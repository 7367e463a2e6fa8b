#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use fanout_api::config::ServerConfig;
use fanout_api::router::build_app_router;
use fanout_api::state::AppState;
use fanout_db::InMemoryStore;
use fanout_events::EventBus;
use fanout_pipeline::{PipelineConfig, PipelineContext};
use fanout_providers::storage::InMemoryBlobStore;
use fanout_providers::{
    GeneratedImage, GenerationOutput, GenerationRequest, ImageGenerator, ProviderError,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Generator returning one inline PNG per call.
pub struct StaticGenerator;

#[async_trait]
impl ImageGenerator for StaticGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        Ok(GenerationOutput {
            images: vec![GeneratedImage::base64("iVBORw0KGgo=")],
            model_id: request.model_id.clone(),
        })
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        embed_worker: false,
    }
}

/// Application state over an in-memory store. Nothing consumes the bus, so
/// tasks stay open until a test drives them.
pub fn test_state() -> AppState {
    let pipeline = PipelineContext::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(EventBus::default()),
        Arc::new(StaticGenerator),
        Arc::new(InMemoryBlobStore::default()),
        PipelineConfig::default(),
    );
    AppState {
        pipeline,
        pool: None,
        config: Arc::new(test_config()),
    }
}

pub fn build_test_app(state: AppState) -> Router {
    build_app_router(state)
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Create a user through the API and return its id.
pub async fn create_user(app: Router, initial_points: i64) -> i64 {
    let response = post_json(
        app,
        "/api/v1/users",
        serde_json::json!({
            "email": "ada@example.com",
            "display_name": "Ada",
            "initial_points": initial_points,
        }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

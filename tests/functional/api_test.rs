//! Functional tests for the HTTP API

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tower::ServiceExt;

use gen_failover_gateway::api::create_router;
use gen_failover_gateway::backend::{
    DispatchOutcome, GenerationRequest, ImageBackend, WorkerConnector,
};
use gen_failover_gateway::config::Settings;
use gen_failover_gateway::gateway::{
    AdmissionController, BackendPool, DispatchEngine, DispatchSettings,
};
use gen_failover_gateway::storage::document::{
    DocumentStore, DocumentSubstrate, ImageDocument, InMemoryDocumentStore,
};
use gen_failover_gateway::storage::file::FileSubstrate;
use gen_failover_gateway::storage::{ContentKey, ImageFormat, ImageSubstrate, ResultStore};
use gen_failover_gateway::AppState;
use image::{Rgba, RgbaImage};

const PREFIX: &str = "https://images.test/images";
const PLACEHOLDER: &str = "https://placeholder.test/fallback.png";

fn png_fixture() -> Vec<u8> {
    let img = RgbaImage::from_pixel(6, 6, Rgba([12, 120, 220, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

struct FixedBackend(DispatchOutcome);

#[async_trait]
impl ImageBackend for FixedBackend {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _request: &GenerationRequest) -> DispatchOutcome {
        self.0.clone()
    }
}

/// Accepts the request and never answers
struct HangingBackend;

#[async_trait]
impl ImageBackend for HangingBackend {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn generate(&self, _request: &GenerationRequest) -> DispatchOutcome {
        std::future::pending().await
    }
}

struct UnreachableWorkers;

impl WorkerConnector for UnreachableWorkers {
    fn connect(&self, _url: &str) -> Arc<dyn ImageBackend> {
        Arc::new(FixedBackend(DispatchOutcome::transient("connection refused")))
    }
}

fn test_app(dir: &tempfile::TempDir, cloud: Option<DispatchOutcome>) -> Router {
    let mut settings = Settings::default();
    settings.storage.url_prefix = PREFIX.to_string();
    settings.rate_limit.enabled = false;

    let substrates: Vec<Arc<dyn ImageSubstrate>> = vec![Arc::new(FileSubstrate::new(dir.path()))];
    let store = Arc::new(ResultStore::new(substrates).unwrap());
    let dispatch_settings = DispatchSettings {
        retry_backoff: std::time::Duration::ZERO,
        placeholder_url: PLACEHOLDER.to_string(),
        ..DispatchSettings::default()
    };

    let mut engine = DispatchEngine::new(
        Arc::new(AdmissionController::new(2)),
        Arc::new(BackendPool::new()),
        Arc::new(UnreachableWorkers),
        store,
        dispatch_settings,
    );
    if let Some(outcome) = cloud {
        engine = engine.with_cloud(Arc::new(FixedBackend(outcome)));
    }

    let state = Arc::new(AppState::new(Arc::new(settings), Arc::new(engine)));
    create_router(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_generate_returns_url_under_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = png_fixture();
    let app = test_app(
        &dir,
        Some(DispatchOutcome::Success {
            bytes: bytes.clone(),
            format: ImageFormat::Png,
        }),
    );

    let (status, body) = send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        body["image_url"],
        format!("{}/{}", PREFIX, ContentKey::hash(&bytes))
    );
}

#[tokio::test]
async fn test_generated_image_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = png_fixture();
    let app = test_app(
        &dir,
        Some(DispatchOutcome::Success {
            bytes: bytes.clone(),
            format: ImageFormat::Png,
        }),
    );
    send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    let key = ContentKey::hash(&bytes);

    let response = app.clone().oneshot(get(&format!("/images/{}", key))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.to_vec(), bytes);
}

#[tokio::test]
async fn test_webp_suffix_transcodes() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = png_fixture();
    let app = test_app(
        &dir,
        Some(DispatchOutcome::Success {
            bytes: bytes.clone(),
            format: ImageFormat::Png,
        }),
    );
    send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    let key = ContentKey::hash(&bytes);

    let response = app
        .clone()
        .oneshot(get(&format!("/images/{}.webp", key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(ImageFormat::detect(&body), Some(ImageFormat::Webp));
}

#[tokio::test]
async fn test_missing_prompt_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let (status, body) = send(&app, post_json("/generate-image", json!({"width": 512}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_blank_prompt_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let (status, _) = send(&app, post_json("/generate-image", json!({"prompt": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_all_backends_down_returns_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, Some(DispatchOutcome::transient("quota exceeded")));

    let (status, body) = send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["image_url"], PLACEHOLDER);
}

#[tokio::test]
async fn test_unknown_image_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let key = ContentKey::hash(b"nothing here");
    let (status, body) = send(&app, get(&format!("/images/{}", key))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], "image_not_found");
}

#[tokio::test]
async fn test_malformed_image_id_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let (status, _) = send(&app, get("/images/..%2Fetc%2Fpasswd")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let key = ContentKey::hash(b"x");
    let (status, _) = send(&app, get(&format!("/images/{}?format=gif", key))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_image() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = png_fixture();
    let app = test_app(
        &dir,
        Some(DispatchOutcome::Success {
            bytes: bytes.clone(),
            format: ImageFormat::Png,
        }),
    );
    send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    let uri = format!("/images/{}", ContentKey::hash(&bytes));

    let delete = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_and_list_workers() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let (status, _) = send(
        &app,
        post_json("/workers", json!({"url": "http://gpu-1:7860", "capacity": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, post_json("/workers", json!({"url": "http://gpu-2:7860"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, get("/workers")).await;
    assert_eq!(status, StatusCode::OK);
    let workers: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        workers,
        json!([
            {"url": "http://gpu-1:7860", "in_use": false, "remaining_capacity": 2},
            {"url": "http://gpu-2:7860", "in_use": false, "remaining_capacity": 1},
        ])
    );
}

#[tokio::test]
async fn test_register_worker_rejects_zero_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let (status, _) = send(
        &app,
        post_json("/workers", json!({"url": "http://gpu-1:7860", "capacity": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failing_worker_is_evicted_through_api() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);
    send(&app, post_json("/workers", json!({"url": "http://gpu-1:7860"}))).await;

    let (_, body) = send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["image_url"], PLACEHOLDER);

    let (_, body) = send(&app, get("/workers")).await;
    let workers: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(workers, json!([]));
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, None);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_fast_path"], 0);
    assert_eq!(body["admission_limit"], 2);
    assert_eq!(body["pool_size"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_backends_still_yield_placeholder_with_default_timeouts() {
    let settings = Settings::default();
    settings.validate().unwrap();

    let substrates: Vec<Arc<dyn ImageSubstrate>> = vec![Arc::new(DocumentSubstrate::new(
        Arc::new(InMemoryDocumentStore::new()),
    ))];
    let engine = DispatchEngine::new(
        Arc::new(AdmissionController::new(settings.dispatch.admission_limit)),
        Arc::new(BackendPool::new()),
        Arc::new(UnreachableWorkers),
        Arc::new(ResultStore::new(substrates).unwrap()),
        DispatchSettings::from_settings(&settings),
    )
    .with_fast_path(Arc::new(HangingBackend))
    .with_cloud(Arc::new(HangingBackend));

    let placeholder = settings.dispatch.placeholder_url.clone();
    let app = create_router(Arc::new(AppState::new(Arc::new(settings), Arc::new(engine))));

    let (status, body) = send(&app, post_json("/generate-image", json!({"prompt": "a cat"}))).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["image_url"], placeholder);
}

#[tokio::test]
async fn test_legacy_record_served_by_md5_id() {
    let dir = tempfile::tempdir().unwrap();
    let documents = Arc::new(InMemoryDocumentStore::new());
    let bytes = png_fixture();
    let legacy_id = "9e107d9d372bb6826bd81d3542a419d6";
    documents
        .create(ImageDocument {
            hash_id: legacy_id.to_string(),
            data: gen_failover_gateway::response::base64::encode(&bytes),
            format: None,
            created_at: None,
        })
        .await
        .unwrap();

    let substrates: Vec<Arc<dyn ImageSubstrate>> = vec![
        Arc::new(FileSubstrate::new(dir.path())),
        Arc::new(DocumentSubstrate::new(documents)),
    ];
    let engine = DispatchEngine::new(
        Arc::new(AdmissionController::new(2)),
        Arc::new(BackendPool::new()),
        Arc::new(UnreachableWorkers),
        Arc::new(ResultStore::new(substrates).unwrap()),
        DispatchSettings::default(),
    );
    let app = create_router(Arc::new(AppState::new(
        Arc::new(Settings::default()),
        Arc::new(engine),
    )));

    let (status, body) = send(&app, get(&format!("/images/{}", legacy_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, bytes);
}

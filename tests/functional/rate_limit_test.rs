//! Functional tests for rate limiting

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use gen_failover_gateway::middleware::rate_limit::RateLimitLayer;
use tower::ServiceExt;

fn create_test_app(rps: u32, burst: u32) -> Router {
    Router::new()
        .route("/test", axum::routing::get(|| async { "OK" }))
        .layer(RateLimitLayer::new(rps, burst))
}

async fn status_of(app: &Router) -> StatusCode {
    app.clone()
        .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_rate_limit_allows_within_limit() {
    let app = create_test_app(100, 100);
    assert_eq!(status_of(&app).await, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_burst_capacity() {
    let app = create_test_app(1, 5);

    for _ in 0..5 {
        assert_eq!(status_of(&app).await, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let app = create_test_app(1, 1);
    assert_eq!(status_of(&app).await, StatusCode::OK);

    let mut rate_limited = false;
    for _ in 0..10 {
        if status_of(&app).await == StatusCode::TOO_MANY_REQUESTS {
            rate_limited = true;
            break;
        }
    }

    assert!(rate_limited, "Expected rate limiting to kick in");
}

#[tokio::test]
async fn test_rejection_uses_error_envelope() {
    let app = create_test_app(1, 1);
    status_of(&app).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
}

#[tokio::test]
async fn test_limit_is_shared_across_clones() {
    let app = create_test_app(1, 2);

    let statuses = [
        status_of(&app).await,
        status_of(&app.clone()).await,
        status_of(&app.clone()).await,
    ];
    assert_eq!(
        statuses,
        [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}

//! Route table

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::middleware::rate_limit::RateLimitLayer;
use crate::AppState;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let rate_limit = &state.settings.rate_limit;
    let generate = post(handlers::generate_image);
    let generate = if rate_limit.enabled {
        generate.layer(RateLimitLayer::from_config(rate_limit))
    } else {
        generate
    };

    let request_timeout = Duration::from_secs(state.settings.server.request_timeout_secs);

    Router::new()
        .route("/generate-image", generate)
        .route(
            "/images/:image_id",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .route(
            "/workers",
            get(handlers::list_workers).post(handlers::register_worker),
        )
        .route("/health", get(handlers::health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

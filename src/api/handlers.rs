//! Request handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::gateway::Backend;
use crate::storage::{ContentKey, ImageFormat};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateImageBody {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateImageResponse {
    pub image_url: String,
}

/// `POST /generate-image`
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateImageBody>,
) -> Result<Json<GenerateImageResponse>> {
    let prompt = body
        .prompt
        .ok_or_else(|| AppError::InvalidRequest("Bad request data: missing prompt".to_string()))?;
    let request = state.prompt_policy.prepare(&prompt, body.width, body.height)?;

    let locator = state.engine.generate(&request).await;
    Ok(Json(GenerateImageResponse {
        image_url: state.urls.generate_url(&locator),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// Split `{key}` or `{key}.{ext}` and merge in `?format=`
fn parse_image_id(image_id: &str, query: &ImageQuery) -> Result<(ContentKey, Option<ImageFormat>)> {
    let (raw_key, suffix) = match image_id.split_once('.') {
        Some((key, ext)) => (key, Some(ext)),
        None => (image_id, None),
    };

    let key = ContentKey::parse_for_lookup(raw_key)
        .ok_or_else(|| AppError::InvalidRequest(format!("Malformed image id: {}", image_id)))?;

    let requested = query.format.as_deref().or(suffix);
    let format = match requested {
        Some(ext) => Some(
            ImageFormat::from_extension(ext)
                .ok_or_else(|| AppError::InvalidRequest(format!("Unsupported format: {}", ext)))?,
        ),
        None => None,
    };

    Ok((key, format))
}

/// `GET /images/:image_id`
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
    Query(query): Query<ImageQuery>,
) -> Result<Response> {
    let (key, format) = parse_image_id(&image_id, &query)?;
    let image = state.engine.store().get(&key, format).await?;

    debug!(key = %key, format = image.format.extension(), size = image.bytes.len(), "Serving image");
    Ok((
        [(header::CONTENT_TYPE, image.format.mime_type())],
        image.bytes,
    )
        .into_response())
}

/// `DELETE /images/:image_id`
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<StatusCode> {
    let (key, _) = parse_image_id(&image_id, &ImageQuery::default())?;
    state.engine.store().purge(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /workers`
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<Vec<Backend>> {
    Json(state.engine.pool().snapshot())
}

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerBody {
    pub url: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_capacity() -> u32 {
    1
}

/// `POST /workers`
pub async fn register_worker(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterWorkerBody>,
) -> Result<StatusCode> {
    state.engine.pool().register(&body.url, body.capacity)?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_fast_path: usize,
    pub admission_limit: usize,
    pub pool_size: usize,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let admission = state.engine.admission();
    Json(HealthResponse {
        status: "ok".to_string(),
        active_fast_path: admission.active(),
        admission_limit: admission.limit(),
        pool_size: state.engine.pool().len(),
    })
}

//! HTTP API for the conversion service.
//!
//! This module provides the REST endpoints for:
//! - Job submission (`/api/convert/{operation}`)
//! - Job status, OCR words and deletion (`/api/job/{id}/...`)
//! - Output downloads
//! - Health monitoring

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{I18nError, ServiceError};
use crate::service::{ConversionService, HealthReport};

pub mod convert;
pub mod download;
pub mod jobs;

use convert::convert_handler;
use download::download_handler;
use jobs::{delete_job_handler, job_status_handler, job_words_handler, list_jobs_handler};

/// Application state
pub struct AppState {
    pub service: Arc<ConversionService>,
    pub start_time: Instant,
}

impl AppState {
    /// Create an i18n-aware error from a service error
    pub fn i18n_error(&self, error: ServiceError) -> I18nError {
        I18nError::new(error, self.service.i18n.clone(), "en")
    }
}

/// Build the API router
pub fn router(service: Arc<ConversionService>) -> Router {
    // Uploads are checked per file by the service; this only caps the request
    let max_body_size = service.config.limits.max_request_body_bytes();

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/convert/{operation}",
            post(convert_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/jobs", get(list_jobs_handler))
        .route("/job/{id}/status", get(job_status_handler))
        .route("/job/{id}/words", get(job_words_handler))
        .route("/job/{id}", axum::routing::delete(delete_job_handler))
        .route("/download/{filename}", get(download_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health ===

#[derive(Deserialize)]
struct HealthParams {
    #[serde(default)]
    refresh: bool,
}

async fn health_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HealthParams>,
) -> Json<HealthReport> {
    Json(
        state
            .service
            .health(params.refresh, state.start_time.elapsed())
            .await,
    )
}

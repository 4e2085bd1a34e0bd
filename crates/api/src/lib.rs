//! `api` crate — HTTP layer over the enrichment pipeline and hybrid search.
//!
//! Exposes:
//!   POST   /api/v1/classify
//!   POST   /api/v1/search
//!   GET    /api/v1/health

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use engine::RunController;
use store::HybridSearcher;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod error;
pub mod handlers;

pub use error::ApiError;

/// JSON envelope allowance on top of the encoded artifact.
const ENVELOPE_BYTES: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
    pub searcher: Arc<HybridSearcher>,
    /// Largest artifact the validation policy accepts.
    pub max_artifact_bytes: usize,
}

impl AppState {
    pub fn new(
        controller: Arc<RunController>,
        searcher: Arc<HybridSearcher>,
        max_artifact_bytes: usize,
    ) -> Self {
        Self {
            controller,
            searcher,
            max_artifact_bytes,
        }
    }
}

/// Request-body ceiling of `POST /api/v1/classify`: the base64 size of twice
/// the largest accepted artifact, plus the JSON envelope. Artifacts between
/// the policy limit and this ceiling reach `validateFile` and are rejected
/// with its step error instead of a bare 413.
pub fn classify_body_limit(max_artifact_bytes: usize) -> usize {
    max_artifact_bytes
        .saturating_mul(2)
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(ENVELOPE_BYTES)
}

pub fn router(state: AppState) -> Router {
    let body_limit = classify_body_limit(state.max_artifact_bytes);
    Router::new()
        .route("/api/v1/health", get(handlers::health::health))
        .route(
            "/api/v1/classify",
            post(handlers::classify::classify).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/v1/search", post(handlers::search::search))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(bind = %addr, "api listening");
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod router_tests;

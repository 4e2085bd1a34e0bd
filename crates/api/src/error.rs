//! Mapping of domain errors onto HTTP responses.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::RunError;
use serde_json::{json, Value};
use store::StoreError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// A required pipeline step failed; the body names the step and carries
    /// the slots that survived the failure.
    #[error("{message}")]
    StepFailed {
        step: String,
        message: String,
        partial: BTreeMap<String, Value>,
    },

    #[error("upstream service failed: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::InvalidPayload(msg) => Self::BadRequest(msg),
            RunError::StepFailed(run) => {
                let run = *run;
                Self::StepFailed {
                    step: run.failure.step,
                    message: run.failure.message,
                    partial: run.partial,
                }
            }
            RunError::Internal(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidWeight(_) | StoreError::EmptyQuery => Self::BadRequest(err.to_string()),
            StoreError::Embedding(e) => Self::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Self::StepFailed {
                step,
                message,
                partial,
            } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "step": step, "partial": partial }),
            ),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error", "detail": msg }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

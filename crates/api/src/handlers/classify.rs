use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use engine::{ArtifactPayload, EnrichmentResult};
use serde::Deserialize;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    /// Artifact bytes, base64 encoded.
    pub file: String,
    pub mime_type: String,
    #[serde(default)]
    pub hint: Option<String>,
}

// POST /api/v1/classify
pub async fn classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyRequest>,
) -> Result<Json<EnrichmentResult>, ApiError> {
    let bytes = STANDARD
        .decode(body.file.trim())
        .map_err(|e| ApiError::BadRequest(format!("file is not valid base64: {e}")))?;

    let mut payload = ArtifactPayload::new(bytes, body.mime_type);
    payload.hint = body.hint;

    let result = state.controller.execute(payload).await?;
    Ok(Json(result))
}

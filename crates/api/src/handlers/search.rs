use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use store::{CardHit, Ranked};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub question: Option<String>,
    /// Overrides the configured text weight for this request.
    #[serde(default)]
    pub text_weight: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<Ranked<CardHit>>,
}

// POST /api/v1/search
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let question = body
        .question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid question".into()))?;

    let mut config = *state.searcher.config();
    if let Some(w) = body.text_weight {
        config.text_weight = w;
    }
    if let Some(limit) = body.limit {
        config.limit = limit;
    }

    let results = state.searcher.search_with(&question, &config).await?;
    Ok(Json(SearchResponse { results }))
}

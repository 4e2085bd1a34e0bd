//! Hybrid ranking: blend two independently produced similarity scores with a
//! linear weight and order candidates by the blend.
//!
//! `hybrid = w * text + (1 - w) * image`, with `w = 1` meaning text only and
//! `w = 0` image only.

use serde::{Deserialize, Serialize};

use crate::StoreError;

pub const DEFAULT_TEXT_WEIGHT: f32 = 0.5;
pub const DEFAULT_LIMIT: usize = 10;

/// Tuning of hybrid search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Weight of the text score, in `[0, 1]`.
    pub text_weight: f32,
    /// Maximum number of results.
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            text_weight: DEFAULT_TEXT_WEIGHT,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        check_weight(self.text_weight)
    }
}

/// An item with its similarity in each space.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<T> {
    pub item: T,
    pub text_score: f32,
    pub image_score: f32,
}

impl<T> Candidate<T> {
    pub fn new(item: T, text_score: f32, image_score: f32) -> Self {
        Self {
            item,
            text_score,
            image_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranked<T> {
    #[serde(flatten)]
    pub item: T,
    pub text_score: f32,
    pub image_score: f32,
    pub hybrid_score: f32,
}

fn check_weight(weight: f32) -> Result<(), StoreError> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(StoreError::InvalidWeight(weight))
    }
}

/// The blended score of one candidate.
pub fn hybrid_score(text_score: f32, image_score: f32, text_weight: f32) -> f32 {
    text_weight * text_score + (1.0 - text_weight) * image_score
}

/// Score and order `candidates`, best first, keeping at most `limit`.
///
/// The sort is stable: candidates with equal hybrid scores keep their input
/// order.
///
/// # Errors
/// [`StoreError::InvalidWeight`] if `text_weight` is outside `[0, 1]` (NaN
/// included).
pub fn rank<T>(candidates: Vec<Candidate<T>>, text_weight: f32, limit: usize) -> Result<Vec<Ranked<T>>, StoreError> {
    check_weight(text_weight)?;

    let mut ranked: Vec<Ranked<T>> = candidates
        .into_iter()
        .map(|c| Ranked {
            hybrid_score: hybrid_score(c.text_score, c.image_score, text_weight),
            item: c.item,
            text_score: c.text_score,
            image_score: c.image_score,
        })
        .collect();
    ranked.sort_by(|a, b| b.hybrid_score.total_cmp(&a.hybrid_score));
    ranked.truncate(limit);
    Ok(ranked)
}

//! Typed error type for the store crate.

use steps::ServiceError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// The text weight of a hybrid search is outside `[0, 1]`.
    #[error("text weight must be within [0, 1], got {0}")]
    InvalidWeight(f32),

    #[error("search query is empty")]
    EmptyQuery,

    #[error("embedding service failed: {0}")]
    Embedding(#[from] ServiceError),
}

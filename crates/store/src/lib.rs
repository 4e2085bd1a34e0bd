//! `store` crate — card persistence and hybrid search.
//!
//! Holds stored cards with their text and image embeddings, scores them
//! against query embeddings, and ranks the results with a weighted blend of
//! both similarity spaces. No pipeline logic lives here.

pub mod error;
pub mod memory;
pub mod ranking;
pub mod search;
pub mod similarity;

pub use error::StoreError;
pub use memory::{CardHit, MemoryStore, StoredCard};
pub use ranking::{rank, Candidate, Ranked, SearchConfig};
pub use search::HybridSearcher;

//! `steps` crate — the [`Step`] trait, the enrichment step bodies, and the
//! service contracts those bodies call.
//!
//! The engine crate dispatches every step through the `Step` trait object and
//! never looks inside; step bodies never see the graph.

pub mod enrichment;
pub mod error;
pub mod mock;
pub mod offline;
pub mod services;
pub mod slots;
pub mod traits;

pub use error::{ServiceError, StepError};
pub use traits::{Patch, Snapshot, Step};

//! `engine` crate — state container, graph validation, the concurrent
//! executor, and the run controller for the enrichment pipeline.

pub mod controller;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod pipeline;
pub mod state;

pub use controller::{ArtifactPayload, EmbeddingsSummary, EnrichmentResult, RunController, RunFailure};
pub use dag::{GraphBuilder, GraphDefinition};
pub use error::{EngineError, RunError};
pub use executor::{Executor, ExecutorConfig, HaltPolicy, RunOutcome};
pub use models::{Criticality, Edge, StepDescriptor, StepFailure, StepReport, StepStatus};
pub use pipeline::enrichment_graph;
pub use state::State;

//! Engine-level error types.

use thiserror::Error;

use crate::models::StepFailure;

/// Errors produced by the pipeline engine (graph validation + execution).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The graph declares no steps at all.
    #[error("pipeline graph has no steps")]
    EmptyGraph,

    /// Two or more steps share the same name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    /// An edge references an undeclared step, or a step reads a slot that
    /// nothing writes.
    #[error("dangling dependency: {0}")]
    DanglingDependency(String),

    /// Two steps declare the same output slot.
    #[error("slot '{slot}' is written by both '{first}' and '{second}'")]
    MultipleWriters {
        slot: String,
        first: String,
        second: String,
    },

    /// A step declares a reserved slot (`error` or a seed slot) as an output.
    #[error("step '{step}' may not write reserved slot '{slot}'")]
    ReservedSlot { step: String, slot: String },

    /// Topological sort detected a cycle.
    #[error("pipeline graph contains a cycle through: {0:?}")]
    CycleDetected(Vec<String>),

    /// More than one step has no incoming edge.
    #[error("pipeline graph has several entry steps: {0:?}")]
    MultipleEntrySteps(Vec<String>),

    // ------ Execution errors ------

    /// A construction bug surfaced at run time (single-writer violation,
    /// undeclared write, unknown step). Never a recoverable condition.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

/// Errors surfaced by the run controller to callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    /// Rejected before any step ran.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The first required step failure of the run.
    #[error("{}", .0.failure)]
    StepFailed(Box<crate::controller::RunFailure>),

    /// A construction bug surfaced while running; not a step failure.
    #[error(transparent)]
    Internal(#[from] EngineError),
}

impl RunError {
    /// The `{message, step}` pair, when the run failed inside a step.
    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            Self::StepFailed(run) => Some(&run.failure),
            _ => None,
        }
    }
}

//! Step-level and service-level error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a step's `run` method.
///
/// Every variant is a declared failure of the step that produced it; the
/// executor decides what it means for the rest of the run based on the
/// step's criticality.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    /// The step rejected its input (policy violation, bad verdict, ...).
    #[error("{0}")]
    Failed(String),

    /// An external collaborator returned an error.
    #[error("{service} call failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    /// A slot the step reads was not present in its snapshot.
    #[error("missing input slot '{0}'")]
    MissingInput(String),

    /// A slot was present but could not be decoded into the expected shape.
    #[error("slot '{slot}' holds malformed data: {message}")]
    MalformedSlot { slot: String, message: String },

    /// The step did not finish within its configured timeout.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// The step's task panicked.
    #[error("step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Shorthand for [`StepError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wrap a [`ServiceError`] with the name of the service that raised it.
    pub fn service(service: &'static str, err: ServiceError) -> Self {
        Self::Service {
            service,
            message: err.to_string(),
        }
    }
}

/// Errors raised by external collaborators (classifier, embedder, store, ...).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    /// The service is temporarily unable to answer (overload, maintenance).
    #[error("service temporarily unavailable: {0}")]
    Unavailable(String),

    /// The service answered, but the answer was unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

//! Core domain models for the pipeline engine.
//!
//! These types describe a pipeline graph before it is validated (descriptors
//! and edges) and the per-step bookkeeping produced while it runs.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Criticality
// ---------------------------------------------------------------------------

/// How a step's failure affects the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure becomes the run's terminal error and halts every transitive
    /// dependent.
    Required,
    /// Failure is recorded on the step only; just the subtree that depends on
    /// it is skipped.
    BestEffort,
}

// ---------------------------------------------------------------------------
// StepDescriptor
// ---------------------------------------------------------------------------

/// Static declaration of one step: identity, slot contract and criticality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Unique name within the graph (referenced by edges and reports).
    pub name: String,
    /// Slots that must be populated before dispatch.
    pub inputs: BTreeSet<String>,
    /// Slots the step reads if present; their producers must have finished,
    /// but their absence does not block dispatch.
    pub optional_inputs: BTreeSet<String>,
    /// Slots the step may write. Each slot has exactly one writer per graph.
    pub outputs: BTreeSet<String>,
    pub criticality: Criticality,
    /// Overrides the executor-wide step timeout for this step.
    pub timeout: Option<Duration>,
}

impl StepDescriptor {
    /// A required step with no declared slots.
    pub fn required(name: impl Into<String>) -> Self {
        Self::new(name, Criticality::Required)
    }

    /// A best-effort step with no declared slots.
    pub fn best_effort(name: impl Into<String>) -> Self {
        Self::new(name, Criticality::BestEffort)
    }

    pub fn new(name: impl Into<String>, criticality: Criticality) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeSet::new(),
            optional_inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            criticality,
            timeout: None,
        }
    }

    pub fn reads<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(slots.into_iter().map(Into::into));
        self
    }

    pub fn reads_optional<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_inputs
            .extend(slots.into_iter().map(Into::into));
        self
    }

    pub fn writes<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(slots.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Every slot this step reads, required or optional.
    pub fn all_inputs(&self) -> impl Iterator<Item = &String> {
        self.inputs.iter().chain(self.optional_inputs.iter())
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Explicit ordering edge: `to` may not start before `from` has completed.
///
/// Edges implied by slot contracts (producer → consumer) are derived at build
/// time and need not be declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Lifecycle of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Never dispatched because an upstream step failed or was skipped.
    Skipped,
}

impl StepStatus {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-step status record owned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub criticality: Criticality,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<u64>,
    /// Failure message, or the reason a step was skipped.
    pub message: Option<String>,
}

impl StepReport {
    pub fn pending(step: impl Into<String>, criticality: Criticality) -> Self {
        Self {
            step: step.into(),
            criticality,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            elapsed_ms: None,
            message: None,
        }
    }
}

/// The `{message, step}` pair recorded in the state container's error slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub message: String,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step '{}' failed: {}", self.step, self.message)
    }
}

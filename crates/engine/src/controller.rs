//! Run controller: the caller-facing entry point of one enrichment run.
//!
//! Validates the payload statically, seeds the state container, drives the
//! executor and projects the terminal state into either an
//! [`EnrichmentResult`] or a [`RunError`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use steps::services::{Artifact, CardLabels, Enrichment, FileValidation, StoredEmbeddings};
use steps::slots;

use crate::dag::GraphDefinition;
use crate::executor::{Executor, RunOutcome};
use crate::models::{Criticality, StepFailure, StepReport, StepStatus};
use crate::state::State;
use crate::{EngineError, RunError};

/// What a caller submits for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub hint: Option<String>,
}

impl ArtifactPayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Identity and shape of the stored embeddings; the vectors stay in storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingsSummary {
    pub record_id: Uuid,
    pub text_dimensions: usize,
    pub image_dimensions: usize,
}

/// Projection of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub validation: FileValidation,
    pub classification: CardLabels,
    pub enriched_description: String,
    pub embeddings_summary: EmbeddingsSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narration_ref: Option<String>,
    /// Best-effort steps that failed; their outputs are `None` above.
    pub best_effort_failures: Vec<StepFailure>,
    pub steps: Vec<StepReport>,
}

/// Projection of a failed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub failure: StepFailure,
    /// Slots written before the run failed, seed slots excluded.
    pub partial: BTreeMap<String, Value>,
    pub steps: Vec<StepReport>,
}

/// Runs payloads through one validated graph. Cheap to share behind `Arc`.
pub struct RunController {
    graph: Arc<GraphDefinition>,
    executor: Executor,
}

impl RunController {
    pub fn new(graph: GraphDefinition, executor: Executor) -> Self {
        Self {
            graph: Arc::new(graph),
            executor,
        }
    }

    pub fn graph(&self) -> &GraphDefinition {
        &self.graph
    }

    /// Execute one run.
    ///
    /// # Errors
    /// - [`RunError::InvalidPayload`] before any step runs.
    /// - [`RunError::StepFailed`] carrying the first required-step failure.
    /// - [`RunError::Internal`] for graph-construction bugs surfaced at run time.
    #[instrument(
        skip_all,
        fields(run_id = %Uuid::new_v4(), mime = %payload.mime_type, size = payload.bytes.len())
    )]
    pub async fn execute(&self, payload: ArtifactPayload) -> Result<EnrichmentResult, RunError> {
        if payload.bytes.is_empty() {
            return Err(RunError::InvalidPayload("artifact bytes are empty".into()));
        }
        if payload.mime_type.trim().is_empty() {
            return Err(RunError::InvalidPayload("artifact MIME type is empty".into()));
        }

        let (input, bytes) = seed_input(payload)?;
        let state = State::seeded(slots::INPUT, input).with_blob(slots::INPUT, bytes);
        let outcome = self.executor.run(&self.graph, state).await?;

        if let Some(failure) = outcome.terminal_error().cloned() {
            warn!(step = %failure.step, error = %failure.message, "enrichment run failed");
            return Err(RunError::StepFailed(Box::new(self.failure(failure, outcome))));
        }

        let result = project(outcome)?;
        info!(
            record_id = %result.embeddings_summary.record_id,
            best_effort_failures = result.best_effort_failures.len(),
            "enrichment run succeeded"
        );
        Ok(result)
    }

    fn failure(&self, failure: StepFailure, outcome: RunOutcome) -> RunFailure {
        let (mut partial, _) = outcome.state.into_slots();
        partial.retain(|slot, _| !self.graph.seeds().contains(slot));
        RunFailure {
            failure,
            partial,
            steps: outcome.reports,
        }
    }
}

/// The `input` slot (artifact metadata plus its size) and the artifact bytes
/// attached to it.
fn seed_input(payload: ArtifactPayload) -> Result<(Value, Arc<[u8]>), RunError> {
    let artifact = Artifact {
        bytes: Arc::from(payload.bytes),
        mime_type: payload.mime_type,
        hint: payload.hint,
    };
    let mut value = serde_json::to_value(&artifact)
        .map_err(|e| RunError::InvalidPayload(format!("artifact cannot be encoded: {e}")))?;
    if let Value::Object(fields) = &mut value {
        fields.insert("size".into(), Value::from(artifact.size()));
    }
    Ok((value, artifact.bytes))
}

fn project(outcome: RunOutcome) -> Result<EnrichmentResult, EngineError> {
    let best_effort_failures = outcome
        .reports
        .iter()
        .filter(|r| r.criticality == Criticality::BestEffort && r.status == StepStatus::Failed)
        .map(|r| StepFailure {
            step: r.step.clone(),
            message: r.message.clone().unwrap_or_default(),
        })
        .collect();

    let state = &outcome.state;
    let embeddings: StoredEmbeddings = required_slot(state, slots::EMBEDDINGS)?;
    let enrichment: Enrichment = required_slot(state, slots::ENRICHMENT)?;

    Ok(EnrichmentResult {
        validation: required_slot(state, slots::VALIDATION)?,
        classification: required_slot(state, slots::CLASSIFICATION)?,
        enriched_description: enrichment.description,
        embeddings_summary: EmbeddingsSummary {
            record_id: embeddings.record_id,
            text_dimensions: embeddings.text_embedding.len(),
            image_dimensions: embeddings.image_embedding.len(),
        },
        derived_image: optional_slot(state, slots::DERIVED_IMAGE)?,
        narration_ref: optional_slot(state, slots::NARRATION)?,
        best_effort_failures,
        steps: outcome.reports,
    })
}

fn required_slot<T: DeserializeOwned>(state: &State, slot: &str) -> Result<T, EngineError> {
    optional_slot(state, slot)?.ok_or_else(|| {
        EngineError::InternalInvariantViolation(format!("successful run left slot '{slot}' empty"))
    })
}

fn optional_slot<T: DeserializeOwned>(state: &State, slot: &str) -> Result<Option<T>, EngineError> {
    state
        .get(slot)
        .map(|v| {
            serde_json::from_value(v.clone()).map_err(|e| {
                EngineError::InternalInvariantViolation(format!("slot '{slot}' has an unexpected shape: {e}"))
            })
        })
        .transpose()
}

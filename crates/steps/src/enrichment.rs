//! Step bodies of the artifact enrichment pipeline.
//!
//! Each step reads the slots it declared, calls at most one or two external
//! collaborators, and returns a patch for the slots it owns. None of them
//! knows where it sits in the graph; wiring lives in the engine crate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::{
    Artifact, CardLabels, CardRepository, CardSynthesizer, Classifier, ContentChecker, Describer,
    Embedder, Enrichment, FileValidation, Narrator, NewCard, StoredEmbeddings,
};
use crate::{slots, Patch, Snapshot, Step, StepError};

/// Step names as they appear in reports and in caller-visible failures.
pub mod names {
    pub const VALIDATE_FILE: &str = "validateFile";
    pub const VALIDATE_CONTENT: &str = "validateCardContent";
    pub const CLASSIFY: &str = "classifyCard";
    pub const DESCRIBE: &str = "describeCard";
    pub const EMBED_AND_STORE: &str = "embedAndStore";
    pub const SYNTHESIZE_LABELS: &str = "generateDummyCardData";
    pub const RENDER_SYNTHETIC: &str = "renderSyntheticCardImage";
    pub const NARRATE: &str = "generateSpeechFromText";
}

const MIB: usize = 1024 * 1024;

/// Decode the `input` slot and reattach the artifact bytes carried beside it.
fn load_artifact(snapshot: &Snapshot) -> Result<Artifact, StepError> {
    let mut artifact: Artifact = snapshot.decode(slots::INPUT)?;
    artifact.bytes = snapshot
        .blob(slots::INPUT)
        .cloned()
        .ok_or_else(|| StepError::MissingInput(format!("{} (artifact bytes)", slots::INPUT)))?;
    Ok(artifact)
}

// ---------------------------------------------------------------------------
// validateFile
// ---------------------------------------------------------------------------

/// Size and type policy enforced by [`ValidateFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Largest accepted artifact, in bytes.
    pub max_bytes: usize,
    /// Accepted MIME types (exact match).
    pub allowed_mime_types: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 5 * MIB,
            allowed_mime_types: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "application/pdf".into(),
            ],
        }
    }
}

impl ValidationPolicy {
    fn describe_limit(&self) -> String {
        if self.max_bytes % MIB == 0 {
            format!("{}MB", self.max_bytes / MIB)
        } else {
            format!("{} bytes", self.max_bytes)
        }
    }
}

/// Checks presence, size and MIME type of the uploaded artifact.
pub struct ValidateFile {
    policy: ValidationPolicy,
}

impl ValidateFile {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Step for ValidateFile {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let artifact = load_artifact(snapshot)?;
        debug!(size = artifact.size(), mime = %artifact.mime_type, "validating artifact");

        if artifact.bytes.is_empty() {
            return Err(StepError::failed("no file provided"));
        }
        if artifact.size() > self.policy.max_bytes {
            return Err(StepError::failed(format!(
                "artifact of {} bytes exceeds size limit of {}",
                artifact.size(),
                self.policy.describe_limit()
            )));
        }
        if !self
            .policy
            .allowed_mime_types
            .iter()
            .any(|m| m == &artifact.mime_type)
        {
            return Err(StepError::failed(format!(
                "unsupported file type: {}",
                artifact.mime_type
            )));
        }

        Patch::new().with_serialized(
            slots::VALIDATION,
            &FileValidation {
                is_valid: true,
                reason: None,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// validateCardContent
// ---------------------------------------------------------------------------

/// Asks the content checker whether the artifact shows the expected subject.
pub struct ValidateContent {
    checker: Arc<dyn ContentChecker>,
}

impl ValidateContent {
    pub fn new(checker: Arc<dyn ContentChecker>) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl Step for ValidateContent {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let validation: FileValidation = snapshot.decode(slots::VALIDATION)?;
        if !validation.is_valid {
            return Err(StepError::failed("file did not pass validation"));
        }
        let artifact = load_artifact(snapshot)?;

        let verdict = self
            .checker
            .check(&artifact)
            .await
            .map_err(|e| StepError::service("content checker", e))?;

        if !verdict.accepted {
            let reason = verdict.reason.as_deref().unwrap_or("no reason given");
            return Err(StepError::failed(format!(
                "image not recognized as PSA card: {reason}"
            )));
        }

        Patch::new().with_serialized(slots::CERTIFICATION, &verdict)
    }
}

// ---------------------------------------------------------------------------
// classifyCard
// ---------------------------------------------------------------------------

pub struct ClassifyArtifact {
    classifier: Arc<dyn Classifier>,
}

impl ClassifyArtifact {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Step for ClassifyArtifact {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let artifact = load_artifact(snapshot)?;
        let labels = self
            .classifier
            .classify(&artifact)
            .await
            .map_err(|e| StepError::service("classifier", e))?;

        debug!(player = %labels.player, year = labels.year, "artifact classified");
        Patch::new().with_serialized(slots::CLASSIFICATION, &labels)
    }
}

// ---------------------------------------------------------------------------
// describeCard
// ---------------------------------------------------------------------------

pub struct DescribeArtifact {
    describer: Arc<dyn Describer>,
}

impl DescribeArtifact {
    pub fn new(describer: Arc<dyn Describer>) -> Self {
        Self { describer }
    }
}

#[async_trait]
impl Step for DescribeArtifact {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let labels: CardLabels = snapshot.decode(slots::CLASSIFICATION)?;
        let text = self
            .describer
            .describe(&labels)
            .await
            .map_err(|e| StepError::service("describer", e))?;

        let description = text.trim();
        if description.is_empty() {
            return Err(StepError::failed("describer returned an empty description"));
        }

        Patch::new().with_serialized(
            slots::ENRICHMENT,
            &Enrichment {
                description: description.to_owned(),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// embedAndStore
// ---------------------------------------------------------------------------

/// Computes text and image embeddings and persists the card with them.
pub struct EmbedAndStore {
    embedder: Arc<dyn Embedder>,
    repository: Arc<dyn CardRepository>,
}

impl EmbedAndStore {
    pub fn new(embedder: Arc<dyn Embedder>, repository: Arc<dyn CardRepository>) -> Self {
        Self {
            embedder,
            repository,
        }
    }
}

#[async_trait]
impl Step for EmbedAndStore {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let artifact = load_artifact(snapshot)?;
        let labels: CardLabels = snapshot.decode(slots::CLASSIFICATION)?;
        let enrichment: Enrichment = snapshot.decode(slots::ENRICHMENT)?;

        let text_embedding = self
            .embedder
            .embed_text(&labels.metadata_text())
            .await
            .map_err(|e| StepError::service("text embedder", e))?;
        let image_embedding = self
            .embedder
            .embed_image(&artifact.bytes)
            .await
            .map_err(|e| StepError::service("image embedder", e))?;

        let record_id = self
            .repository
            .persist(NewCard {
                labels,
                description: enrichment.description,
                mime_type: artifact.mime_type,
                image_bytes: artifact.bytes.to_vec(),
                text_embedding: text_embedding.clone(),
                image_embedding: image_embedding.clone(),
            })
            .await
            .map_err(|e| StepError::service("card repository", e))?;

        debug!(%record_id, "card persisted");
        Patch::new().with_serialized(
            slots::EMBEDDINGS,
            &StoredEmbeddings {
                record_id,
                text_embedding,
                image_embedding,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// generateDummyCardData / renderSyntheticCardImage
// ---------------------------------------------------------------------------

/// Produces fully fictional labels for the synthetic variant.
pub struct SynthesizeLabels {
    synthesizer: Arc<dyn CardSynthesizer>,
}

impl SynthesizeLabels {
    pub fn new(synthesizer: Arc<dyn CardSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl Step for SynthesizeLabels {
    async fn run(&self, _snapshot: &Snapshot) -> Result<Patch, StepError> {
        let labels = self
            .synthesizer
            .synthesize_labels()
            .await
            .map_err(|e| StepError::service("card synthesizer", e))?;
        Patch::new().with_serialized(slots::SYNTHETIC_LABELS, &labels)
    }
}

/// Renders a synthetic image of the artifact using the fictional labels.
pub struct RenderSyntheticImage {
    synthesizer: Arc<dyn CardSynthesizer>,
}

impl RenderSyntheticImage {
    pub fn new(synthesizer: Arc<dyn CardSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl Step for RenderSyntheticImage {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let artifact = load_artifact(snapshot)?;
        let labels: CardLabels = snapshot.decode(slots::SYNTHETIC_LABELS)?;

        let image_ref = self
            .synthesizer
            .render(&artifact, &labels)
            .await
            .map_err(|e| StepError::service("image renderer", e))?;
        Patch::new().with_serialized(slots::DERIVED_IMAGE, &image_ref)
    }
}

// ---------------------------------------------------------------------------
// generateSpeechFromText
// ---------------------------------------------------------------------------

pub struct GenerateNarration {
    narrator: Arc<dyn Narrator>,
}

impl GenerateNarration {
    pub fn new(narrator: Arc<dyn Narrator>) -> Self {
        Self { narrator }
    }
}

#[async_trait]
impl Step for GenerateNarration {
    async fn run(&self, snapshot: &Snapshot) -> Result<Patch, StepError> {
        let enrichment: Enrichment = snapshot.decode(slots::ENRICHMENT)?;
        if enrichment.description.trim().is_empty() {
            return Err(StepError::failed("invalid input text for narration"));
        }

        let audio_ref = self
            .narrator
            .narrate(&enrichment.description)
            .await
            .map_err(|e| StepError::service("narrator", e))?;
        Patch::new().with_serialized(slots::NARRATION, &audio_ref)
    }
}

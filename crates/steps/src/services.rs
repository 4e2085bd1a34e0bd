//! Boundary contracts of the external collaborators the enrichment steps call,
//! plus the data shapes stored in the state container's slots.
//!
//! The engine never sees these traits; only the step bodies in
//! [`crate::enrichment`] do.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ServiceError;

// ---------------------------------------------------------------------------
// Slot payloads
// ---------------------------------------------------------------------------

/// The uploaded artifact.
///
/// Only the metadata is serialized into the `input` slot. The bytes ride
/// beside it as a shared blob attached to the same slot, so steps that read
/// the artifact share one allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(skip, default = "no_bytes")]
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn no_bytes() -> Arc<[u8]> {
    Arc::from(Vec::new())
}

impl Artifact {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            hint: None,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Outcome of the file validation step (`validation` slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValidation {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Content check verdict (`certification` slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    /// Interpret a free-text model reply of the form `"yes|no\n<reasoning>"`.
    ///
    /// Anything that does not start with "yes" (case-insensitive) is a
    /// rejection; the reasoning lines become the rejection reason.
    pub fn from_model_reply(reply: &str) -> Self {
        let trimmed = reply.trim();
        if trimmed.to_lowercase().starts_with("yes") {
            return Self {
                accepted: true,
                reason: None,
            };
        }

        let reason = trimmed
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            accepted: false,
            reason: Some(if reason.is_empty() {
                "not a PSA-graded trading card".to_owned()
            } else {
                reason
            }),
        }
    }
}

/// Structured labels of a graded trading card (`classification` and
/// `syntheticLabels` slots).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardLabels {
    pub player: String,
    pub team: String,
    pub year: i32,
    pub grade: String,
    pub rarity: String,
    #[serde(rename = "type")]
    pub card_type: String,
    pub subtype: String,
    pub description: String,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub processing_time: String,
    #[serde(default)]
    pub model_version: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub warnings: String,
    #[serde(default)]
    pub disclaimer: String,
}

impl CardLabels {
    /// Metadata text fed to the text embedder.
    pub fn metadata_text(&self) -> String {
        format!(
            "Player: {}\nTeam: {}\nYear: {}\nGrade: {}\nRarity: {}\nType: {}\nSubtype: {}\nDescription: {}",
            self.player,
            self.team,
            self.year,
            self.grade,
            self.rarity,
            self.card_type,
            self.subtype,
            self.description,
        )
    }
}

/// Collector-facing description (`enrichment` slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub description: String,
}

/// Embeddings computed for the artifact plus the id of the stored record
/// (`embeddings` slot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEmbeddings {
    pub record_id: Uuid,
    pub text_embedding: Vec<f32>,
    pub image_embedding: Vec<f32>,
}

/// A card ready to be persisted by a [`CardRepository`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewCard {
    pub labels: CardLabels,
    pub description: String,
    pub mime_type: String,
    pub image_bytes: Vec<u8>,
    pub text_embedding: Vec<f32>,
    pub image_embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Service traits
// ---------------------------------------------------------------------------

/// Decides whether the artifact shows the expected kind of subject.
#[async_trait]
pub trait ContentChecker: Send + Sync {
    async fn check(&self, artifact: &Artifact) -> Result<Verdict, ServiceError>;
}

/// Extracts structured labels from the artifact.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, artifact: &Artifact) -> Result<CardLabels, ServiceError>;
}

/// Writes a collector-facing description from structured labels.
#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, labels: &CardLabels) -> Result<String, ServiceError>;
}

/// Produces embeddings in two spaces: a text space and an image space.
///
/// `embed_clip_text` projects a free-text query into the image space so that
/// queries can be compared against stored image embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, ServiceError>;
    async fn embed_clip_text(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

/// Relational + vector datastore boundary.
#[async_trait]
pub trait CardRepository: Send + Sync {
    async fn persist(&self, card: NewCard) -> Result<Uuid, ServiceError>;
}

/// Generates fictional card data and synthetic image variants.
#[async_trait]
pub trait CardSynthesizer: Send + Sync {
    async fn synthesize_labels(&self) -> Result<CardLabels, ServiceError>;
    async fn render(&self, artifact: &Artifact, labels: &CardLabels) -> Result<String, ServiceError>;
}

/// Text-to-speech boundary; returns a reference to the produced audio.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, text: &str) -> Result<String, ServiceError>;
}

/// Every collaborator the enrichment graph needs, bundled for wiring.
#[derive(Clone)]
pub struct Services {
    pub content_checker: Arc<dyn ContentChecker>,
    pub classifier: Arc<dyn Classifier>,
    pub describer: Arc<dyn Describer>,
    pub embedder: Arc<dyn Embedder>,
    pub repository: Arc<dyn CardRepository>,
    pub synthesizer: Arc<dyn CardSynthesizer>,
    pub narrator: Arc<dyn Narrator>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_slot_holds_metadata_only() {
        let artifact = Artifact::new(b"card".to_vec(), "image/png");
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value, json!({ "mimeType": "image/png" }));

        let back: Artifact = serde_json::from_value(value).unwrap();
        assert_eq!(back.mime_type, "image/png");
        assert_eq!(back.size(), 0);
    }

    #[test]
    fn affirmative_reply_is_accepted() {
        let verdict = Verdict::from_model_reply("  Yes\nThe slab label reads PSA 10.");
        assert!(verdict.accepted);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn negative_reply_keeps_reasoning() {
        let verdict = Verdict::from_model_reply("no\nThis is a photo of a cat.\nNo slab visible.");
        assert!(!verdict.accepted);
        assert_eq!(
            verdict.reason.as_deref(),
            Some("This is a photo of a cat. No slab visible.")
        );
    }

    #[test]
    fn bare_negative_reply_gets_default_reason() {
        let verdict = Verdict::from_model_reply("No");
        assert_eq!(verdict.reason.as_deref(), Some("not a PSA-graded trading card"));
    }

    #[test]
    fn labels_use_type_key_on_the_wire() {
        let labels = CardLabels {
            card_type: "Panini Prizm".into(),
            ..CardLabels::default()
        };
        let value = serde_json::to_value(&labels).unwrap();
        assert_eq!(value["type"], "Panini Prizm");
        assert!(labels.metadata_text().contains("Type: Panini Prizm"));
    }
}

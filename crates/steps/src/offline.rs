//! Deterministic, network-free implementations of the service traits.
//!
//! They let the whole pipeline run locally (CLI `run`, the demo server, and
//! end-to-end tests). Outputs are stable functions of their inputs so that
//! repeated runs over the same artifact produce the same labels, embeddings
//! and references.

use std::sync::Arc;

use async_trait::async_trait;

use crate::services::{
    Artifact, CardLabels, CardRepository, CardSynthesizer, Classifier, ContentChecker, Describer,
    Embedder, Narrator, Services, Verdict,
};
use crate::ServiceError;

const OFFLINE_MODEL: &str = "offline-1";

/// FNV-1a, 64 bit.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Accepts every artifact that carries an image or PDF MIME type.
pub struct OfflineContentChecker;

#[async_trait]
impl ContentChecker for OfflineContentChecker {
    async fn check(&self, artifact: &Artifact) -> Result<Verdict, ServiceError> {
        let reply = if artifact.mime_type.starts_with("image/") || artifact.mime_type == "application/pdf" {
            "yes\noffline checker accepts image and pdf artifacts"
        } else {
            "no\noffline checker only accepts image and pdf artifacts"
        };
        Ok(Verdict::from_model_reply(reply))
    }
}

/// Derives labels from the caller hint and the artifact fingerprint.
pub struct OfflineClassifier;

#[async_trait]
impl Classifier for OfflineClassifier {
    async fn classify(&self, artifact: &Artifact) -> Result<CardLabels, ServiceError> {
        let fingerprint = fnv1a(&artifact.bytes);
        let player = artifact
            .hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or("Unknown Player")
            .to_owned();

        Ok(CardLabels {
            player,
            team: "Unknown Team".into(),
            year: 2000 + (fingerprint % 25) as i32,
            grade: format!("PSA {}", 1 + fingerprint % 10),
            rarity: "Base".into(),
            card_type: "Trading Card".into(),
            subtype: "Base Set".into(),
            description: format!(
                "{} artifact of {} bytes",
                artifact.mime_type,
                artifact.size()
            ),
            confidence: "low".into(),
            processing_time: "0ms".into(),
            model_version: OFFLINE_MODEL.into(),
            notes: format!("fingerprint {fingerprint:016x}"),
            warnings: String::new(),
            disclaimer: "Labels produced offline; not an authentic grading.".into(),
        })
    }
}

/// Builds a short collector blurb from the labels.
pub struct OfflineDescriber;

#[async_trait]
impl Describer for OfflineDescriber {
    async fn describe(&self, labels: &CardLabels) -> Result<String, ServiceError> {
        Ok(format!(
            "{} {} {} card of {} ({}), graded {}. Rarity: {}.",
            labels.year, labels.card_type, labels.subtype, labels.player, labels.team, labels.grade,
            labels.rarity
        ))
    }
}

/// Feature-hashing embedder.
///
/// Text is tokenized on non-alphanumeric boundaries and each lowercase token
/// is hashed into a bucket; images become a byte histogram. Every vector is
/// L2-normalized. `embed_clip_text` hashes text into the image space.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    pub text_dimensions: usize,
    pub image_dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            text_dimensions: 64,
            image_dimensions: 32,
        }
    }
}

impl HashEmbedder {
    fn hash_tokens(text: &str, dimensions: usize) -> Result<Vec<f32>, ServiceError> {
        if dimensions == 0 {
            return Err(ServiceError::Other("embedding dimension must be positive".into()));
        }
        let mut v = vec![0.0f32; dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.to_lowercase().as_bytes()) % dimensions as u64) as usize;
            v[bucket] += 1.0;
        }
        Ok(normalize(v))
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Self::hash_tokens(text, self.text_dimensions)
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, ServiceError> {
        if self.image_dimensions == 0 {
            return Err(ServiceError::Other("embedding dimension must be positive".into()));
        }
        let mut v = vec![0.0f32; self.image_dimensions];
        for b in bytes {
            v[usize::from(*b) % self.image_dimensions] += 1.0;
        }
        Ok(normalize(v))
    }

    async fn embed_clip_text(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidResponse("empty text query".into()));
        }
        if text.trim_start().starts_with("data:image/") {
            return Err(ServiceError::InvalidResponse(
                "received an image string instead of text".into(),
            ));
        }
        Self::hash_tokens(text, self.image_dimensions)
    }
}

/// Fictional card generator; the rendered "image" is a stable reference.
pub struct OfflineSynthesizer;

#[async_trait]
impl CardSynthesizer for OfflineSynthesizer {
    async fn synthesize_labels(&self) -> Result<CardLabels, ServiceError> {
        Ok(CardLabels {
            player: "Avery Quill".into(),
            team: "Harbor City Herons".into(),
            year: 2023,
            grade: "PSA 9".into(),
            rarity: "Short Print".into(),
            card_type: "Panini Prizm".into(),
            subtype: "Silver".into(),
            description: "Fictional card generated offline.".into(),
            model_version: OFFLINE_MODEL.into(),
            disclaimer: "Fictional player and team.".into(),
            ..CardLabels::default()
        })
    }

    async fn render(&self, artifact: &Artifact, labels: &CardLabels) -> Result<String, ServiceError> {
        let mut seed = artifact.bytes.to_vec();
        seed.extend_from_slice(labels.player.as_bytes());
        Ok(format!("synthetic://cards/{:016x}.png", fnv1a(&seed)))
    }
}

/// Returns a stable audio reference without producing audio.
pub struct OfflineNarrator;

#[async_trait]
impl Narrator for OfflineNarrator {
    async fn narrate(&self, text: &str) -> Result<String, ServiceError> {
        Ok(format!("/audios/{:016x}.wav", fnv1a(text.as_bytes())))
    }
}

/// Offline backends for every service except persistence.
pub fn offline_services(repository: Arc<dyn CardRepository>) -> Services {
    Services {
        content_checker: Arc::new(OfflineContentChecker),
        classifier: Arc::new(OfflineClassifier),
        describer: Arc::new(OfflineDescriber),
        embedder: Arc::new(HashEmbedder::default()),
        repository,
        synthesizer: Arc::new(OfflineSynthesizer),
        narrator: Arc::new(OfflineNarrator),
    }
}

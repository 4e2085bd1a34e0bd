//! Well-known slot names of the enrichment state container.

/// Seeded by the run controller from the caller payload.
pub const INPUT: &str = "input";
/// File presence/size/type check result.
pub const VALIDATION: &str = "validation";
/// Content check verdict (is this the expected kind of artifact?).
pub const CERTIFICATION: &str = "certification";
/// Structured labels produced by the classifier.
pub const CLASSIFICATION: &str = "classification";
/// Collector-facing description text.
pub const ENRICHMENT: &str = "enrichment";
/// Text/image embeddings plus the id of the persisted record.
pub const EMBEDDINGS: &str = "embeddings";
/// Fictional labels used to render the synthetic variant.
pub const SYNTHETIC_LABELS: &str = "syntheticLabels";
/// Reference to the synthetic image variant.
pub const DERIVED_IMAGE: &str = "derivedImage";
/// Reference to the narration audio.
pub const NARRATION: &str = "narration";
/// Shared failure slot; first required failure wins.
pub const ERROR: &str = "error";

//! Wiring of the artifact enrichment graph.
//!
//! ```text
//! validateFile → validateCardContent → classifyCard → describeCard → embedAndStore
//!                                                                       ├─► generateDummyCardData → renderSyntheticCardImage
//!                                                                       └─► generateSpeechFromText
//! ```
//!
//! The first five steps are required; the two trailing branches are
//! best-effort and run concurrently once the card is stored.

use std::sync::Arc;

use steps::enrichment::{
    names, ClassifyArtifact, DescribeArtifact, EmbedAndStore, GenerateNarration,
    RenderSyntheticImage, SynthesizeLabels, ValidateContent, ValidateFile, ValidationPolicy,
};
use steps::services::Services;
use steps::slots;

use crate::dag::{GraphBuilder, GraphDefinition};
use crate::models::StepDescriptor;
use crate::EngineError;

/// Build and validate the enrichment graph over `services`.
pub fn enrichment_graph(services: &Services, policy: ValidationPolicy) -> Result<GraphDefinition, EngineError> {
    GraphBuilder::new()
        .seed(slots::INPUT)
        .step(
            StepDescriptor::required(names::VALIDATE_FILE)
                .reads([slots::INPUT])
                .writes([slots::VALIDATION]),
            ValidateFile::new(policy),
        )
        .step(
            StepDescriptor::required(names::VALIDATE_CONTENT)
                .reads([slots::INPUT, slots::VALIDATION])
                .writes([slots::CERTIFICATION]),
            ValidateContent::new(Arc::clone(&services.content_checker)),
        )
        .step(
            StepDescriptor::required(names::CLASSIFY)
                .reads([slots::INPUT, slots::CERTIFICATION])
                .writes([slots::CLASSIFICATION]),
            ClassifyArtifact::new(Arc::clone(&services.classifier)),
        )
        .step(
            StepDescriptor::required(names::DESCRIBE)
                .reads([slots::CLASSIFICATION])
                .writes([slots::ENRICHMENT]),
            DescribeArtifact::new(Arc::clone(&services.describer)),
        )
        .step(
            StepDescriptor::required(names::EMBED_AND_STORE)
                .reads([slots::INPUT, slots::CLASSIFICATION, slots::ENRICHMENT])
                .writes([slots::EMBEDDINGS]),
            EmbedAndStore::new(
                Arc::clone(&services.embedder),
                Arc::clone(&services.repository),
            ),
        )
        .step(
            StepDescriptor::best_effort(names::SYNTHESIZE_LABELS).writes([slots::SYNTHETIC_LABELS]),
            SynthesizeLabels::new(Arc::clone(&services.synthesizer)),
        )
        .step(
            StepDescriptor::best_effort(names::RENDER_SYNTHETIC)
                .reads([slots::INPUT, slots::SYNTHETIC_LABELS])
                .writes([slots::DERIVED_IMAGE]),
            RenderSyntheticImage::new(Arc::clone(&services.synthesizer)),
        )
        .step(
            StepDescriptor::best_effort(names::NARRATE)
                .reads([slots::ENRICHMENT])
                .writes([slots::NARRATION]),
            GenerateNarration::new(Arc::clone(&services.narrator)),
        )
        // Both branches wait for storage even though they do not read its slot.
        .edge(names::EMBED_AND_STORE, names::SYNTHESIZE_LABELS)
        .edge(names::EMBED_AND_STORE, names::NARRATE)
        .build()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use steps::offline::offline_services;
    use steps::services::{CardRepository, NewCard};
    use steps::ServiceError;
    use uuid::Uuid;

    use super::*;
    use crate::models::Criticality;

    struct NullRepository;

    #[async_trait]
    impl CardRepository for NullRepository {
        async fn persist(&self, _card: NewCard) -> Result<Uuid, ServiceError> {
            Ok(Uuid::nil())
        }
    }

    fn graph() -> GraphDefinition {
        enrichment_graph(&offline_services(Arc::new(NullRepository)), ValidationPolicy::default())
            .expect("enrichment graph is valid")
    }

    #[test]
    fn has_one_entry_and_two_terminals() {
        let g = graph();
        assert_eq!(g.len(), 8);
        assert_eq!(g.entry(), names::VALIDATE_FILE);
        let terminals: BTreeSet<&str> = g.terminals().into_iter().collect();
        assert_eq!(
            terminals,
            BTreeSet::from([names::RENDER_SYNTHETIC, names::NARRATE])
        );
    }

    #[test]
    fn required_chain_is_ordered() {
        let g = graph();
        let order = g.topological_order();
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos(names::VALIDATE_FILE) < pos(names::VALIDATE_CONTENT));
        assert!(pos(names::VALIDATE_CONTENT) < pos(names::CLASSIFY));
        assert!(pos(names::CLASSIFY) < pos(names::DESCRIBE));
        assert!(pos(names::DESCRIBE) < pos(names::EMBED_AND_STORE));
        assert!(pos(names::EMBED_AND_STORE) < pos(names::SYNTHESIZE_LABELS));
        assert!(pos(names::SYNTHESIZE_LABELS) < pos(names::RENDER_SYNTHETIC));
        assert!(pos(names::EMBED_AND_STORE) < pos(names::NARRATE));
    }

    #[test]
    fn trailing_branches_are_best_effort() {
        let g = graph();
        for name in [names::SYNTHESIZE_LABELS, names::RENDER_SYNTHETIC, names::NARRATE] {
            assert_eq!(g.descriptor(name).unwrap().criticality, Criticality::BestEffort);
        }
        assert_eq!(
            g.descriptor(names::EMBED_AND_STORE).unwrap().criticality,
            Criticality::Required
        );
    }

    #[test]
    fn everything_depends_on_file_validation() {
        let g = graph();
        assert_eq!(g.dependents_of(names::VALIDATE_FILE).len(), 7);
        assert!(g
            .dependencies_of(names::RENDER_SYNTHETIC)
            .contains(names::EMBED_AND_STORE));
        assert!(!g
            .dependents_of(names::SYNTHESIZE_LABELS)
            .contains(names::NARRATE));
    }
}

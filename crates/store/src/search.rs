//! Free-text hybrid search over a [`MemoryStore`].

use std::sync::Arc;

use steps::services::Embedder;
use tracing::{debug, instrument};

use crate::memory::{CardHit, MemoryStore};
use crate::ranking::{Ranked, SearchConfig};
use crate::StoreError;

/// Embeds a question in both spaces and ranks the stored cards against it.
pub struct HybridSearcher {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl HybridSearcher {
    pub fn new(store: Arc<MemoryStore>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search with the configured weight and limit.
    pub async fn search(&self, question: &str) -> Result<Vec<Ranked<CardHit>>, StoreError> {
        self.search_with(question, &self.config).await
    }

    #[instrument(skip(self, config), fields(text_weight = config.text_weight, limit = config.limit))]
    pub async fn search_with(
        &self,
        question: &str,
        config: &SearchConfig,
    ) -> Result<Vec<Ranked<CardHit>>, StoreError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(StoreError::EmptyQuery);
        }
        config.validate()?;

        let text_query = self.embedder.embed_text(question).await?;
        let image_query = self.embedder.embed_clip_text(question).await?;
        let hits = self.store.search(&text_query, &image_query, config).await?;
        debug!(hits = hits.len(), "hybrid search finished");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steps::offline::HashEmbedder;
    use steps::services::{CardLabels, CardRepository, NewCard};

    async fn seeded_searcher() -> HybridSearcher {
        let embedder = HashEmbedder::default();
        let store = Arc::new(MemoryStore::new());
        for (player, team) in [("Jordan Ellis", "Harbor Herons"), ("Mina Park", "Valley Comets")] {
            let labels = CardLabels {
                player: player.into(),
                team: team.into(),
                ..CardLabels::default()
            };
            let text = labels.metadata_text();
            store
                .persist(NewCard {
                    text_embedding: embedder.embed_text(&text).await.unwrap(),
                    image_embedding: embedder.embed_clip_text(&text).await.unwrap(),
                    labels,
                    description: String::new(),
                    mime_type: "image/png".into(),
                    image_bytes: Vec::new(),
                })
                .await
                .unwrap();
        }
        HybridSearcher::new(store, Arc::new(embedder), SearchConfig::default())
    }

    #[tokio::test]
    async fn finds_the_matching_player_first() {
        let searcher = seeded_searcher().await;
        let hits = searcher.search("Mina Park Valley Comets").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.player, "Mina Park");
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let searcher = seeded_searcher().await;
        assert_eq!(searcher.search("   ").await.unwrap_err(), StoreError::EmptyQuery);
    }

    #[tokio::test]
    async fn embedder_errors_surface() {
        let searcher = seeded_searcher().await;
        let err = searcher.search("data:image/png;base64,AAAA").await.unwrap_err();
        assert!(matches!(err, StoreError::Embedding(_)));
    }
}

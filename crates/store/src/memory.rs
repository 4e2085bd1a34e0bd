//! In-memory card store.
//!
//! Implements the pipeline's [`CardRepository`] boundary and scores stored
//! cards against query embeddings for hybrid search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use steps::services::{CardLabels, CardRepository, NewCard};
use steps::ServiceError;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::ranking::{rank, Candidate, Ranked, SearchConfig};
use crate::similarity::cosine_similarity;
use crate::StoreError;

/// One persisted card.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCard {
    pub id: Uuid,
    pub labels: CardLabels,
    pub description: String,
    pub mime_type: String,
    pub image_bytes: Vec<u8>,
    pub text_embedding: Vec<f32>,
    pub image_embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// The part of a stored card returned by search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardHit {
    pub id: Uuid,
    pub player: String,
    pub team: String,
    pub year: i32,
    pub grade: String,
    pub description: String,
}

impl From<&StoredCard> for CardHit {
    fn from(card: &StoredCard) -> Self {
        Self {
            id: card.id,
            player: card.labels.player.clone(),
            team: card.labels.team.clone(),
            year: card.labels.year,
            grade: card.labels.grade.clone(),
            description: card.description.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    cards: RwLock<Vec<StoredCard>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.read().await.is_empty()
    }

    pub async fn get(&self, id: Uuid) -> Option<StoredCard> {
        self.cards.read().await.iter().find(|c| c.id == id).cloned()
    }

    /// Rank every stored card against the two query embeddings.
    pub async fn search(
        &self,
        text_query: &[f32],
        image_query: &[f32],
        config: &SearchConfig,
    ) -> Result<Vec<Ranked<CardHit>>, StoreError> {
        config.validate()?;
        let candidates = self
            .cards
            .read()
            .await
            .iter()
            .map(|card| {
                Candidate::new(
                    CardHit::from(card),
                    cosine_similarity(text_query, &card.text_embedding),
                    cosine_similarity(image_query, &card.image_embedding),
                )
            })
            .collect();
        rank(candidates, config.text_weight, config.limit)
    }
}

#[async_trait]
impl CardRepository for MemoryStore {
    async fn persist(&self, card: NewCard) -> Result<Uuid, ServiceError> {
        let id = Uuid::new_v4();
        let stored = StoredCard {
            id,
            labels: card.labels,
            description: card.description,
            mime_type: card.mime_type,
            image_bytes: card.image_bytes,
            text_embedding: card.text_embedding,
            image_embedding: card.image_embedding,
            created_at: Utc::now(),
        };
        self.cards.write().await.push(stored);
        debug!(%id, "card stored");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(player: &str, text: Vec<f32>, image: Vec<f32>) -> NewCard {
        NewCard {
            labels: CardLabels {
                player: player.into(),
                ..CardLabels::default()
            },
            description: format!("{player} card"),
            mime_type: "image/png".into(),
            image_bytes: vec![1, 2, 3],
            text_embedding: text,
            image_embedding: image,
        }
    }

    #[tokio::test]
    async fn persist_then_get() {
        let store = MemoryStore::new();
        let id = store.persist(card("A", vec![1.0], vec![1.0])).await.unwrap();
        assert_eq!(store.len().await, 1);
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.labels.player, "A");
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn search_blends_both_spaces() {
        let store = MemoryStore::new();
        store
            .persist(card("text match", vec![1.0, 0.0], vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .persist(card("image match", vec![0.0, 1.0], vec![1.0, 0.0]))
            .await
            .unwrap();

        let query_text = [1.0, 0.0];
        let query_image = [1.0, 0.0];

        let text_only = SearchConfig {
            text_weight: 1.0,
            ..SearchConfig::default()
        };
        let hits = store.search(&query_text, &query_image, &text_only).await.unwrap();
        assert_eq!(hits[0].item.player, "text match");

        let image_only = SearchConfig {
            text_weight: 0.0,
            ..SearchConfig::default()
        };
        let hits = store.search(&query_text, &query_image, &image_only).await.unwrap();
        assert_eq!(hits[0].item.player, "image match");
        assert!((hits[0].hybrid_score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn invalid_weight_fails_even_when_empty() {
        let store = MemoryStore::new();
        let config = SearchConfig {
            text_weight: 2.0,
            ..SearchConfig::default()
        };
        let err = store.search(&[1.0], &[1.0], &config).await.unwrap_err();
        assert_eq!(err, StoreError::InvalidWeight(2.0));
    }

    #[test]
    fn ranked_hit_serializes_flat() {
        let hit = Ranked {
            item: CardHit {
                id: Uuid::nil(),
                player: "P".into(),
                team: "T".into(),
                year: 1999,
                grade: "PSA 10".into(),
                description: "d".into(),
            },
            text_score: 0.5,
            image_score: 0.25,
            hybrid_score: 0.375,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["player"], "P");
        assert_eq!(json["hybridScore"], 0.375);
    }
}

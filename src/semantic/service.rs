//! Similarity search with keyword fallback.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    blocks::Block,
    config::SearchConfig,
    store::{PageStore, StoreError},
};

use super::{
    embeddings::{EmbeddingError, EmbeddingProvider},
    lexical::{contains_any, split_keywords},
    preprocess::embedding_input,
    similarity::rank,
};

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("search query is empty")]
    EmptyQuery,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Vector,
    Keyword,
}

/// A retrieved block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub block_id: u64,
    pub page_id: u64,
    pub order: i64,
    pub content: String,
    pub similarity: f32,
    pub source: MatchSource,
}

impl Match {
    fn new(block: &Block, similarity: f32, source: MatchSource) -> Self {
        Self {
            block_id: block.id,
            page_id: block.page_id,
            order: block.order,
            content: block.content.clone(),
            similarity,
            source,
        }
    }
}

pub struct SimilaritySearch {
    store: Arc<dyn PageStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl SimilaritySearch {
    pub fn new(
        store: Arc<dyn PageStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub async fn embed_query(&self, message: &str) -> Result<Vec<f32>, SemanticSearchError> {
        let input = embedding_input(message).ok_or(SemanticSearchError::EmptyQuery)?;
        Ok(self.embedder.embed(&input).await?)
    }

    /// Embeds `message` and searches the user's blocks.
    pub async fn search(
        &self,
        user: &str,
        message: &str,
    ) -> Result<Vec<Match>, SemanticSearchError> {
        let query = self.embed_query(message).await?;
        self.search_with_vector(user, message, &query)
    }

    /// Ranks the user's embedded blocks against `query`. If none clears the
    /// threshold, falls back to keyword matching on `message`.
    pub fn search_with_vector(
        &self,
        user: &str,
        message: &str,
        query: &[f32],
    ) -> Result<Vec<Match>, SemanticSearchError> {
        let blocks = self.store.user_blocks(user)?;

        let candidates = blocks
            .iter()
            .filter_map(|block| block.embedding.as_deref().map(|embedding| (block, embedding)));

        let ranked = rank(query, candidates, self.config.threshold, self.config.limit);
        if !ranked.is_empty() {
            log::debug!("vector search for {user}: {} matches", ranked.len());
            return Ok(ranked
                .into_iter()
                .map(|scored| Match::new(scored.item, scored.score, MatchSource::Vector))
                .collect());
        }

        let matches = self.keyword_fallback(&blocks, message);
        log::debug!("keyword fallback for {user}: {} matches", matches.len());
        Ok(matches)
    }

    fn keyword_fallback(&self, blocks: &[Block], message: &str) -> Vec<Match> {
        let keywords = split_keywords(message);
        if keywords.is_empty() {
            return vec![];
        }

        blocks
            .iter()
            .filter(|block| contains_any(&block.content, &keywords))
            .take(self.config.limit)
            .map(|block| Match::new(block, self.config.fallback_similarity, MatchSource::Keyword))
            .collect()
    }
}

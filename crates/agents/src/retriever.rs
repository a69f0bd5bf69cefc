//! Retriever - embeds a question and fetches the nearest stored chunks

use std::collections::HashSet;
use std::sync::Arc;

use chatrag_core::{CoreError, EmbeddingCapability, Result, ScoredChunk, VectorStore};
use tracing::{debug, info, instrument, warn};

pub struct Retriever {
    embedder: Arc<dyn EmbeddingCapability>,
    store: Arc<dyn VectorStore>,
    context_window: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingCapability>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            context_window: 0,
        }
    }

    /// Also return up to `n` messages before and after every hit
    pub fn with_context_window(mut self, n: usize) -> Self {
        self.context_window = n;
        self
    }

    /// Nearest chunks to `question`, most relevant first. Never mutates the
    /// store.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        question: &str,
        collection: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(CoreError::Config("top_k must be at least 1".to_string()));
        }

        let info = self
            .store
            .info(collection)
            .await?
            .ok_or_else(|| CoreError::Config(format!("unknown collection: {}", collection)))?;
        if info.count == 0 {
            debug!("Collection {} is empty", collection);
            return Ok(Vec::new());
        }
        if info.embedding_model != self.embedder.model_id() {
            warn!(
                "Collection {} was built with {}, querying with {}",
                collection,
                info.embedding_model,
                self.embedder.model_id()
            );
        }

        let embedding = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Embedding("no vector returned for question".to_string()))?;
        if let Some(expected) = info.dimension {
            if expected != embedding.len() {
                return Err(CoreError::InvalidEmbeddingDimension {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let hits = self.store.query(collection, &embedding, top_k).await?;
        info!("Retrieved {} chunks from {}", hits.len(), collection);

        if self.context_window == 0 || hits.is_empty() {
            return Ok(hits);
        }
        self.expand(collection, hits).await
    }

    /// Insert each hit's timeline neighbours right after it. A neighbour
    /// carries the score of the hit that pulled it in.
    async fn expand(&self, collection: &str, hits: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>> {
        let mut seen: HashSet<String> = hits.iter().map(|h| h.chunk.id.clone()).collect();
        let mut expanded = Vec::with_capacity(hits.len() * (1 + 2 * self.context_window));

        for hit in hits {
            let score = hit.score;
            let timestamp = hit.chunk.metadata.timestamp.clone();
            expanded.push(hit);
            if timestamp.is_empty() {
                continue;
            }

            let neighbors = self
                .store
                .neighbors(collection, &timestamp, self.context_window)
                .await?;
            for chunk in neighbors.before.into_iter().chain(neighbors.after) {
                if seen.insert(chunk.id.clone()) {
                    expanded.push(ScoredChunk { chunk, score });
                }
            }
        }

        debug!("Context window expanded results to {}", expanded.len());
        Ok(expanded)
    }
}

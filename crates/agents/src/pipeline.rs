//! Pipeline operations: load, query, batch query, check and show.
//!
//! Each operation wires the parser, indexer, retriever and assembler
//! together against the capabilities handed to [`Pipeline::new`].

use std::path::Path;
use std::sync::Arc;

use chatrag_core::{
    CollectionInfo, CollectionState, EmbeddingCapability, IndexedChunk, IndexingReport,
    ModelCapability, QueryFailure, QueryOutcome, QueryResult, TranscriptParser, VectorStore,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::assembler::{AnswerAssembler, NO_RELEVANT_ANSWER};
use crate::config::RagConfig;
use crate::indexer::BatchIndexer;
use crate::retriever::Retriever;
use crate::{AgentError, Result};

/// Health of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub state: CollectionState,
    /// `None` when the collection does not exist
    pub info: Option<CollectionInfo>,
}

impl CollectionStatus {
    pub fn count(&self) -> usize {
        self.info.as_ref().map(|i| i.count).unwrap_or(0)
    }
}

pub struct Pipeline {
    embedder: Arc<dyn EmbeddingCapability>,
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ModelCapability>,
    index_concurrency: usize,
    context_window: usize,
    strip_reasoning: bool,
}

impl Pipeline {
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingCapability>,
        store: Arc<dyn VectorStore>,
        model: Arc<dyn ModelCapability>,
    ) -> Self {
        Self {
            embedder,
            store,
            model,
            index_concurrency: config.index_concurrency,
            context_window: config.context_window,
            strip_reasoning: config.strip_reasoning,
        }
    }

    /// Parse the export at `path` and index it into `collection`.
    ///
    /// A malformed export fails before any batch is attempted; batch
    /// failures end up in the returned report.
    #[instrument(skip(self, cancel))]
    pub async fn load(
        &self,
        path: &Path,
        collection: &str,
        batch_size: usize,
        reset: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexingReport> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AgentError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let transcript = TranscriptParser::new().parse_str(&source)?;
        info!(
            "Parsed {} records from {} ({} messages, {} skipped{})",
            transcript.records.len(),
            path.display(),
            transcript.total_messages,
            transcript.skipped(),
            transcript
                .name
                .as_deref()
                .map(|name| format!(", chat \"{}\"", name))
                .unwrap_or_default()
        );

        let report = BatchIndexer::new(Arc::clone(&self.embedder), Arc::clone(&self.store))
            .with_concurrency(self.index_concurrency)
            .load(transcript.records, collection, batch_size, reset, cancel)
            .await?;
        Ok(report)
    }

    /// Answer one question from the `top_k` most relevant chunks
    #[instrument(skip(self))]
    pub async fn query(&self, question: &str, collection: &str, top_k: usize) -> Result<QueryResult> {
        let hits = Retriever::new(Arc::clone(&self.embedder), Arc::clone(&self.store))
            .with_context_window(self.context_window)
            .search(question, collection, top_k)
            .await?;

        if hits.is_empty() {
            warn!("No relevant messages found for '{}'", question);
            return Ok(QueryResult {
                question: question.to_string(),
                answer: NO_RELEVANT_ANSWER.to_string(),
                relevant_count: 0,
                elapsed_seconds: 0.0,
            });
        }

        let chunks: Vec<IndexedChunk> = hits.into_iter().map(|hit| hit.chunk).collect();
        let result = AnswerAssembler::new()
            .with_strip_reasoning(self.strip_reasoning)
            .answer(question, &chunks, self.model.as_ref())
            .await?;
        Ok(result)
    }

    /// Run `query` for every question in order. A failed question is
    /// recorded and the next one runs; cancellation stops before the next
    /// question.
    #[instrument(skip(self, questions, cancel), fields(questions = questions.len()))]
    pub async fn batch_query(
        &self,
        questions: &[String],
        collection: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Vec<QueryOutcome> {
        let mut outcomes = Vec::with_capacity(questions.len());

        for (index, question) in questions.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "Batch query cancelled after {} of {} questions",
                    index,
                    questions.len()
                );
                break;
            }
            info!("Question {}/{}: {}", index + 1, questions.len(), question);

            match self.query(question, collection, top_k).await {
                Ok(result) => outcomes.push(QueryOutcome::Answered(result)),
                Err(e) => {
                    error!("Question '{}' failed: {}", question, e);
                    outcomes.push(QueryOutcome::Failed(QueryFailure {
                        question: question.clone(),
                        error: e.to_string(),
                    }));
                }
            }
        }

        outcomes
    }

    /// Existence, size and embedding settings of `collection`
    pub async fn check(&self, collection: &str) -> Result<CollectionStatus> {
        let info = self.store.info(collection).await?;
        let state = info
            .as_ref()
            .map(CollectionInfo::state)
            .unwrap_or(CollectionState::Missing);

        Ok(CollectionStatus {
            name: collection.to_string(),
            state,
            info,
        })
    }

    /// Stored chunk with the given message id
    pub async fn show(&self, collection: &str, id: &str) -> Result<Option<IndexedChunk>> {
        Ok(self.store.get(collection, id).await?)
    }
}

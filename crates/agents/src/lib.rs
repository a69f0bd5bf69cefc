//! Pipeline components for ChatRAG
//!
//! This crate contains the moving parts between an export file and an
//! answer:
//! - BatchIndexer: embeds records in batches and writes them to a collection
//! - Retriever: finds the stored messages nearest to a question
//! - AnswerAssembler: fits retrieved messages into a prompt and asks the model
//! - Pipeline: the load / query / batch-query / check operations
//! - HTTP clients for the embedding and generation services

pub mod assembler;
pub mod config;
pub mod error;
pub mod indexer;
pub mod inference;
pub mod pipeline;
pub mod retriever;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assembler::{AnswerAssembler, NO_RELEVANT_ANSWER};
pub use config::{EmbeddingConfig, EmbeddingProvider, GenerationConfig, RagConfig};
pub use error::{AgentError, Result};
pub use indexer::BatchIndexer;
pub use inference::{EmbeddingClient, OllamaClient};
pub use pipeline::{CollectionStatus, Pipeline};
pub use retriever::Retriever;

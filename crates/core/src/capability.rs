//! Capability contracts for the external services the pipeline consumes.
//!
//! The embedding model, the vector store and the language model are
//! reached only through these traits, so any backend satisfying them is
//! substitutable (HTTP services and SurrealDB in production, in-memory
//! fakes in tests).

use std::any::Any;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{IndexedChunk, Result, ScoredChunk};

/// Turns texts into fixed-width vectors.
#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    /// Identifier of the model producing the vectors
    fn model_id(&self) -> &str;

    /// How many `embed` calls may be in flight at once
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Embed `texts`, returning one vector per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Health of a collection as seen by `check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    Missing,
    Empty,
    Populated,
}

impl std::fmt::Display for CollectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionState::Missing => write!(f, "missing"),
            CollectionState::Empty => write!(f, "empty"),
            CollectionState::Populated => write!(f, "populated"),
        }
    }
}

/// Stored description of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub count: usize,
    /// Unset until the first chunk is written
    pub dimension: Option<usize>,
    pub embedding_model: String,
    pub created_at: String,
}

impl CollectionInfo {
    pub fn state(&self) -> CollectionState {
        if self.count == 0 {
            CollectionState::Empty
        } else {
            CollectionState::Populated
        }
    }
}

/// Chunks immediately before and after a point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    /// Oldest first
    pub before: Vec<IndexedChunk>,
    /// Oldest first
    pub after: Vec<IndexedChunk>,
}

/// Right to write one collection, held for the length of a load.
///
/// Obtained from [`VectorStore::reset`] (exclusive) or
/// [`VectorStore::ensure`] (shared). The store's lock guard lives inside
/// and is released when the lease drops.
pub struct WriterLease {
    collection: String,
    exclusive: bool,
    _guard: Box<dyn Any + Send + Sync>,
}

impl WriterLease {
    pub fn new(
        collection: impl Into<String>,
        exclusive: bool,
        guard: impl Any + Send + Sync,
    ) -> Self {
        Self {
            collection: collection.into(),
            exclusive,
            _guard: Box::new(guard),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl std::fmt::Debug for WriterLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLease")
            .field("collection", &self.collection)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

/// Persistent, named partitions of indexed chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Drop the collection and recreate it empty. The returned lease is
    /// exclusive: no other writer touches the collection until it drops.
    async fn reset(&self, collection: &str, embedding_model: &str) -> Result<WriterLease>;

    /// Create the collection if it does not exist yet. The returned lease
    /// is shared with other appending writers and keeps resets out.
    async fn ensure(&self, collection: &str, embedding_model: &str) -> Result<WriterLease>;

    /// `None` when the collection does not exist
    async fn info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Insert or replace chunks by id in the lease's collection as one
    /// atomic write. Rejects a batch whose dimension differs from the
    /// collection's.
    async fn upsert(&self, lease: &WriterLease, chunks: Vec<IndexedChunk>) -> Result<()>;

    /// Nearest `top_k` chunks, most similar first, ties by ascending id
    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize)
        -> Result<Vec<ScoredChunk>>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<IndexedChunk>>;

    /// Up to `n` chunks strictly before and after `timestamp`
    async fn neighbors(&self, collection: &str, timestamp: &str, n: usize) -> Result<Neighbors>;

    /// All stored ids, ascending
    async fn ids(&self, collection: &str) -> Result<Vec<String>>;
}

/// A text-generation model with a bounded context.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    fn model_id(&self) -> &str;

    /// Largest prompt the model accepts, in estimated tokens
    fn context_budget(&self) -> usize;

    /// Single blocking generation; no retries
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Rough token count used against [`ModelCapability::context_budget`]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // counts characters, not bytes
        assert_eq!(estimate_tokens("привет!!"), 2);
    }

    #[test]
    fn test_collection_state() {
        let mut info = CollectionInfo {
            name: "c".into(),
            count: 0,
            dimension: None,
            embedding_model: "m".into(),
            created_at: String::new(),
        };
        assert_eq!(info.state(), CollectionState::Empty);
        info.count = 3;
        assert_eq!(info.state(), CollectionState::Populated);
        assert_eq!(CollectionState::Missing.to_string(), "missing");
    }

    #[test]
    fn test_lease_releases_guard_on_drop() {
        let guard = std::sync::Arc::new(());
        let lease = WriterLease::new("chat", true, guard.clone());
        assert_eq!(lease.collection(), "chat");
        assert!(lease.is_exclusive());
        assert_eq!(std::sync::Arc::strong_count(&guard), 2);

        drop(lease);
        assert_eq!(std::sync::Arc::strong_count(&guard), 1);
    }
}

//! Record types - the units that flow from the parser into the vector store

use serde::{Deserialize, Serialize};

/// A chat message after parsing: flat text plus the fields needed for
/// traceability. Immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Message id, unique within the export
    pub id: String,

    /// Flattened, whitespace-normalized text (never empty)
    pub text: String,

    /// Sender display name (empty when the export has none)
    #[serde(default)]
    pub sender: String,

    /// ISO-8601 timestamp, or empty when the export had none
    #[serde(default)]
    pub timestamp: String,

    /// Id of the message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl NormalizedRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sender: String::new(),
            timestamp: String::new(),
            reply_to: None,
        }
    }

    /// Builder pattern: set sender
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Builder pattern: set timestamp
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Builder pattern: set reply target
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Attach an embedding, producing the unit that gets persisted
    pub fn into_chunk(self, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            id: self.id,
            embedding,
            document: self.text,
            metadata: ChunkMetadata {
                sender: self.sender,
                timestamp: self.timestamp,
                reply_to: self.reply_to,
            },
        }
    }
}

/// Metadata stored next to each chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// The unit persisted in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,

    /// Fixed-width vector; the width is set per collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    /// Message text, identical to `NormalizedRecord::text`
    pub document: String,

    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl IndexedChunk {
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    /// One-line rendering used inside prompts: `[timestamp] sender: text`
    pub fn to_context_line(&self) -> String {
        let sender = if self.metadata.sender.is_empty() {
            "unknown"
        } else {
            &self.metadata.sender
        };
        if self.metadata.timestamp.is_empty() {
            format!("{}: {}", sender, self.document)
        } else {
            format!("[{}] {}: {}", self.metadata.timestamp, sender, self.document)
        }
    }
}

/// A chunk returned by similarity search together with its relevance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: IndexedChunk,
    /// Cosine similarity to the query; higher is more relevant
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_into_chunk() {
        let record = NormalizedRecord::new("7", "hello there")
            .with_sender("Alice")
            .with_timestamp("2023-01-02T10:00:00")
            .with_reply_to("5");

        let chunk = record.into_chunk(vec![0.1, 0.2, 0.3]);

        assert_eq!(chunk.id, "7");
        assert_eq!(chunk.document, "hello there");
        assert_eq!(chunk.dimension(), 3);
        assert_eq!(chunk.metadata.sender, "Alice");
        assert_eq!(chunk.metadata.reply_to, Some("5".into()));
    }

    #[test]
    fn test_context_line() {
        let chunk = NormalizedRecord::new("1", "hi")
            .with_sender("Bob")
            .with_timestamp("2023-01-02T10:00:00")
            .into_chunk(vec![1.0]);
        assert_eq!(chunk.to_context_line(), "[2023-01-02T10:00:00] Bob: hi");

        let anonymous = NormalizedRecord::new("2", "bye").into_chunk(vec![1.0]);
        assert_eq!(anonymous.to_context_line(), "unknown: bye");
    }
}

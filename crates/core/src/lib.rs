//! Core domain types for ChatRAG
//!
//! This crate defines the data that flows through the pipeline (raw export
//! messages, normalized records, indexed chunks, reports), the transcript
//! parser, and the capability traits the other crates implement.

pub mod capability;
pub mod chat_export;
pub mod error;
pub mod question_set;
pub mod record;
pub mod report;

pub use capability::{
    estimate_tokens, CollectionInfo, CollectionState, EmbeddingCapability, ModelCapability,
    Neighbors, VectorStore, WriterLease,
};
pub use chat_export::{RawMessage, RawText, TextFragment, Transcript, TranscriptParser};
pub use error::{CoreError, ErrorKind, Result};
pub use question_set::{questions_from_lines, QuestionSet};
pub use record::{ChunkMetadata, IndexedChunk, NormalizedRecord, ScoredChunk};
pub use report::{BatchFailure, BatchRange, IndexingReport, QueryFailure, QueryOutcome, QueryResult};

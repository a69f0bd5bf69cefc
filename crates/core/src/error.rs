//! Error types for the core domain

use thiserror::Error;

/// Coarse classification of a [`CoreError`], used by callers that only
/// need to know which part of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Config,
    Store,
    Embedding,
    Model,
}

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed export or missing required field
    #[error("Format error: {0}")]
    Format(String),

    /// Invalid settings, unknown collection, mismatched embedder
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },

    /// Vector store unavailable or write rejected
    #[error("Store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Language model failure, timeout or malformed response
    #[error("Model error: {0}")]
    Model(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Format(_) | CoreError::Serialization(_) => ErrorKind::Format,
            CoreError::Config(_) | CoreError::InvalidEmbeddingDimension { .. } => {
                ErrorKind::Config
            }
            CoreError::Store(_) => ErrorKind::Store,
            CoreError::Embedding(_) => ErrorKind::Embedding,
            CoreError::Model(_) => ErrorKind::Model,
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_is_config_kind() {
        let err = CoreError::InvalidEmbeddingDimension {
            expected: 1024,
            actual: 384,
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(
            err.to_string(),
            "Invalid embedding dimension: expected 1024, got 384"
        );
    }

    #[test]
    fn test_json_errors_are_format_kind() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}

//! Outcome types for the load and query phases

use serde::{Deserialize, Serialize};

/// Id range of one batch, inclusive, in export order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRange {
    /// 1-based batch number
    pub batch: usize,
    pub first_id: String,
    pub last_id: String,
    pub len: usize,
}

impl std::fmt::Display for BatchRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch {} (ids {}..={}, {} records)",
            self.batch, self.first_id, self.last_id, self.len
        )
    }
}

/// A batch that was not written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub range: BatchRange,
    pub error: String,
}

/// Summary of one load run. Always produced, even on partial failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingReport {
    pub total_input: usize,
    pub total_loaded: usize,
    pub batches_attempted: usize,
    pub batches_failed: usize,
    #[serde(default)]
    pub failures: Vec<BatchFailure>,
    /// Set when the run was stopped at a batch boundary
    #[serde(default)]
    pub cancelled: bool,
}

impl IndexingReport {
    pub fn is_complete(&self) -> bool {
        self.batches_failed == 0 && !self.cancelled && self.total_loaded == self.total_input
    }
}

/// Answer to one question plus timing and retrieval metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    /// Chunks that actually made it into the prompt
    pub relevant_count: usize,
    /// Wall-clock time spent in the model call
    pub elapsed_seconds: f64,
}

/// A question that could not be answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub question: String,
    pub error: String,
}

/// Per-question outcome of a batch query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered(QueryResult),
    Failed(QueryFailure),
}

impl QueryOutcome {
    pub fn question(&self) -> &str {
        match self {
            QueryOutcome::Answered(result) => &result.question,
            QueryOutcome::Failed(failure) => &failure.question,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, QueryOutcome::Answered(_))
    }
}

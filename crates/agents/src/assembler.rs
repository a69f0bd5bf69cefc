//! Answer Assembler - builds a bounded prompt from retrieved chunks and asks
//! the language model once

use std::sync::LazyLock;
use std::time::Instant;

use chatrag_core::{
    estimate_tokens, CoreError, ErrorKind, IndexedChunk, ModelCapability, QueryResult, Result,
};
use regex::Regex;
use tracing::{debug, info, instrument};

/// Fixed answer when retrieval finds nothing
pub const NO_RELEVANT_ANSWER: &str = "No relevant information found to answer this question.";

const INSTRUCTIONS: &str = "You are an assistant analyzing chat messages.
Use the provided context to answer the question accurately and concisely.
Consider the nature of messaging platforms.
Don't make assumptions; base your answer only on the provided information.
If the answer is unclear, state this and provide a reasonable answer based on logical analysis.
Include the date of the conversation if relevant.";

#[derive(Debug, Clone, Default)]
pub struct AnswerAssembler {
    strip_reasoning: bool,
}

impl AnswerAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strip_reasoning(mut self, strip: bool) -> Self {
        self.strip_reasoning = strip;
        self
    }

    /// Prompt for `question` with every chunk of `chunks`, in order
    pub fn build_prompt(question: &str, chunks: &[IndexedChunk]) -> String {
        let mut prompt = prompt_header();
        for chunk in chunks {
            prompt.push_str(&chunk.to_context_line());
            prompt.push('\n');
        }
        prompt.push_str(&prompt_footer(question));
        prompt
    }

    /// How many leading chunks fit into `budget` tokens. Chunks are never
    /// cut; the tail (least relevant) goes first.
    pub fn fit_to_budget(question: &str, chunks: &[IndexedChunk], budget: usize) -> Option<usize> {
        let fixed = prompt_header().chars().count() + prompt_footer(question).chars().count();
        let mut total_chars = fixed;
        let mut lengths = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let len = chunk.to_context_line().chars().count() + 1;
            lengths.push(len);
            total_chars += len;
        }

        let mut used = chunks.len();
        loop {
            if total_chars.div_ceil(4) <= budget {
                return Some(used);
            }
            if used == 0 {
                return None;
            }
            used -= 1;
            total_chars -= lengths[used];
        }
    }

    /// Ask the model once with as much of `retrieved` as fits its budget
    #[instrument(skip(self, retrieved, model), fields(retrieved = retrieved.len(), model = model.model_id()))]
    pub async fn answer(
        &self,
        question: &str,
        retrieved: &[IndexedChunk],
        model: &dyn ModelCapability,
    ) -> Result<QueryResult> {
        let budget = model.context_budget();
        let used = Self::fit_to_budget(question, retrieved, budget).ok_or_else(|| {
            CoreError::Config(format!(
                "question alone exceeds the model context budget of {} tokens",
                budget
            ))
        })?;
        if used < retrieved.len() {
            info!(
                "Dropped {} of {} chunks to fit {} tokens",
                retrieved.len() - used,
                retrieved.len(),
                budget
            );
        }

        let prompt = Self::build_prompt(question, &retrieved[..used]);
        debug!(
            "Prompt is {} chars (~{} tokens)",
            prompt.chars().count(),
            estimate_tokens(&prompt)
        );

        let started = Instant::now();
        let raw = model.generate(&prompt).await.map_err(|e| match e.kind() {
            ErrorKind::Model => e,
            _ => CoreError::Model(e.to_string()),
        })?;
        let elapsed_seconds = started.elapsed().as_secs_f64();
        info!("Model answered in {:.2}s", elapsed_seconds);

        let answer = if self.strip_reasoning {
            clean_response(&raw)
        } else {
            raw
        };

        Ok(QueryResult {
            question: question.to_string(),
            answer,
            relevant_count: used,
            elapsed_seconds,
        })
    }
}

fn prompt_header() -> String {
    format!("{}\n\nContext:\n", INSTRUCTIONS)
}

fn prompt_footer(question: &str) -> String {
    format!("\nQuestion:\n{}\n\nAnswer:", question)
}

static RE_THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Drop `<think>` blocks and a leading `Answer:` from reasoning-model output
pub fn clean_response(raw: &str) -> String {
    let without_thinking = RE_THINK_BLOCK.replace_all(raw, "");

    let trimmed = without_thinking.trim_start();
    trimmed
        .strip_prefix("Answer:")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

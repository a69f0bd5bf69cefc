//! In-memory capability fakes for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chatrag_core::{CoreError, EmbeddingCapability, ModelCapability, Result};

/// Deterministic bag-of-words embedder: each lowercase word is hashed into
/// one of `dimension` buckets. Texts sharing words end up close together.
pub struct HashEmbedder {
    dimension: usize,
    concurrency: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            concurrency: 1,
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sleep inside every call so concurrent batches overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls observed running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        vector[0] = 1e-3;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingCapability for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-embedder"
    }

    fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let vectors = texts.iter().map(|t| self.vector(t)).collect();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vectors)
    }
}

/// Which calls of a [`FailingEmbedder`] fail
#[derive(Debug, Clone)]
pub enum FailWhen {
    /// The n-th call, 1-based
    Call(usize),
    /// Any call whose batch contains a text with this substring
    TextContains(String),
}

/// A [`HashEmbedder`] that fails selected calls
pub struct FailingEmbedder {
    inner: HashEmbedder,
    rule: FailWhen,
}

impl FailingEmbedder {
    pub fn new(dimension: usize, rule: FailWhen) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            rule,
        }
    }

    pub fn on_call(dimension: usize, call: usize) -> Self {
        Self::new(dimension, FailWhen::Call(call))
    }

    pub fn on_text(dimension: usize, marker: impl Into<String>) -> Self {
        Self::new(dimension, FailWhen::TextContains(marker.into()))
    }
}

#[async_trait]
impl EmbeddingCapability for FailingEmbedder {
    fn model_id(&self) -> &str {
        "hash-embedder"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.inner.calls() + 1;
        let fail = match &self.rule {
            FailWhen::Call(n) => *n == call,
            FailWhen::TextContains(marker) => texts.iter().any(|t| t.contains(marker.as_str())),
        };
        if fail {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            return Err(CoreError::Embedding(format!(
                "embedding service unavailable (call {})",
                call
            )));
        }
        self.inner.embed(texts).await
    }
}

/// Language model fake that records prompts and returns a canned reply
pub struct EchoModel {
    budget: usize,
    reply: String,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl EchoModel {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            reply: "echo".to_string(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    /// Every call fails with a model error
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl ModelCapability for EchoModel {
    fn model_id(&self) -> &str {
        "echo-model"
    }

    fn context_budget(&self) -> usize {
        self.budget
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if self.fail {
            return Err(CoreError::Model("model crashed".to_string()));
        }
        Ok(self.reply.clone())
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

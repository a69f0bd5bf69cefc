//! HTTP clients for the local inference services: embeddings (TEI or
//! Ollama) and answer generation (Ollama).

use std::time::Duration;

use async_trait::async_trait;
use chatrag_core::{CoreError, EmbeddingCapability, ModelCapability, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::{EmbeddingConfig, EmbeddingProvider, GenerationConfig};

#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.config.provider {
            EmbeddingProvider::Tei => format!("{}/health", self.config.url),
            EmbeddingProvider::Ollama => format!("{}/api/tags", self.config.url),
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| embedding_error(&url, e))?;
        Ok(response.status().is_success())
    }

    async fn tei_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed", self.config.url);
        let request = TeiEmbedBatchRequest {
            inputs: texts,
            truncate: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| embedding_error(&url, e))?
            .json::<Value>()
            .await
            .map_err(|e| embedding_error(&url, e))?;

        parse_embeddings_response(response)
    }

    async fn ollama_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.config.url);
        let request = OllamaEmbedRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| embedding_error(&url, e))?
            .json::<OllamaEmbedResponse>()
            .await
            .map_err(|e| embedding_error(&url, e))?;

        Ok(response.embeddings)
    }
}

#[async_trait]
impl EmbeddingCapability for EmbeddingClient {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn max_concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.max_batch.max(1)) {
            let embeddings = match self.config.provider {
                EmbeddingProvider::Tei => self.tei_embed(chunk).await?,
                EmbeddingProvider::Ollama => self.ollama_embed(chunk).await?,
            };
            if embeddings.len() != chunk.len() {
                return Err(CoreError::Embedding(format!(
                    "service returned {} vectors for {} texts",
                    embeddings.len(),
                    chunk.len()
                )));
            }
            results.extend(embeddings);
        }

        debug!("Embedded {} texts", results.len());
        Ok(results)
    }
}

/// Answer generation through Ollama's `/api/generate`
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    config: GenerationConfig,
}

impl OllamaClient {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.url
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::Model(format!("{}: {}", url, e)))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl ModelCapability for OllamaClient {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn context_budget(&self) -> usize {
        self.config.context_budget()
    }

    #[instrument(skip(self, prompt), fields(model = %self.config.model, prompt_chars = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.config.url);
        let timeout_secs = self.config.timeout_secs;
        let request = OllamaGenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_ctx: self.config.num_ctx,
            },
        };

        let model_error = |e: reqwest::Error| {
            if e.is_timeout() {
                CoreError::Model(format!("generation timed out after {}s", timeout_secs))
            } else {
                CoreError::Model(format!("{}: {}", url, e))
            }
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(model_error)?
            .json::<OllamaGenerateResponse>()
            .await
            .map_err(model_error)?;

        if let Some(total_ms) = response.total_duration.map(|ns| ns as f64 / 1_000_000.0) {
            debug!("Ollama generate total_duration_ms={:.2}", total_ms);
        }

        Ok(response.response)
    }
}

fn embedding_error(url: &str, err: reqwest::Error) -> CoreError {
    CoreError::Embedding(format!("{}: {}", url, err))
}

#[derive(Serialize)]
struct TeiEmbedBatchRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_ctx: usize,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    total_duration: Option<u64>,
}

/// TEI answers a batch with a list of vectors, and a single input with a
/// bare vector
fn parse_embeddings_response(value: Value) -> Result<Vec<Vec<f32>>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_array()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items)).map_err(|e| {
                    CoreError::Embedding(format!("invalid TEI embeddings response: {}", e))
                })
            } else {
                let single: Vec<f32> = serde_json::from_value(Value::Array(items)).map_err(|e| {
                    CoreError::Embedding(format!("invalid TEI embedding array: {}", e))
                })?;
                Ok(vec![single])
            }
        }
        other => Err(CoreError::Embedding(format!(
            "unexpected TEI response format: {}",
            other
        ))),
    }
}

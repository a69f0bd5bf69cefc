//! Pipeline configuration.
//!
//! `RagConfig` is built once by the caller (environment, then an optional
//! TOML file, then command-line overrides) and passed by reference into every
//! operation. Nothing below reads the environment on its own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AgentError, Result};

pub const DEFAULT_COLLECTION: &str = "telegram_messages";
pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_TOP_K: usize = 200;

const DEFAULT_TEI_URL: &str = "http://localhost:8081";
const DEFAULT_TEI_MODEL: &str = "mixedbread-ai/mxbai-embed-large-v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_EMBED_MODEL: &str = "mxbai-embed-large";
const DEFAULT_EMBED_MAX_BATCH: usize = 32;
const DEFAULT_OLLAMA_MODEL: &str = "deepseek-r1:32b-qwen-distill-q8_0";
const DEFAULT_TEMPERATURE: f32 = 0.6;
const DEFAULT_TOP_P: f32 = 0.95;
const DEFAULT_NUM_CTX: usize = 32768;
const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_RESPONSE_RESERVE: usize = 2048;

/// Which embedding server API to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// text-embeddings-inference `/embed`
    Tei,
    /// Ollama `/api/embed`
    Ollama,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tei" => Ok(EmbeddingProvider::Tei),
            "ollama" => Ok(EmbeddingProvider::Ollama),
            other => Err(AgentError::Config(format!(
                "unknown embedding provider '{}' (expected tei or ollama)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub url: String,
    pub model: String,
    /// Texts per HTTP request; a pipeline batch may span several requests
    pub max_batch: usize,
    /// Parallel requests the server tolerates
    pub concurrency: usize,
}

impl EmbeddingConfig {
    pub fn for_provider(provider: EmbeddingProvider) -> Self {
        let (url, model) = match provider {
            EmbeddingProvider::Tei => (DEFAULT_TEI_URL, DEFAULT_TEI_MODEL),
            EmbeddingProvider::Ollama => (DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_EMBED_MODEL),
        };
        Self {
            provider,
            url: url.to_string(),
            model: model.to_string(),
            max_batch: DEFAULT_EMBED_MAX_BATCH,
            concurrency: 1,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::for_provider(EmbeddingProvider::Tei)
    }
}

/// Ollama generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Model context size in tokens
    pub num_ctx: usize,
    pub timeout_secs: u64,
    /// Tokens of `num_ctx` kept free for the answer
    pub response_reserve: usize,
}

impl GenerationConfig {
    /// Prompt budget left after the answer reserve
    pub fn context_budget(&self) -> usize {
        self.num_ctx.saturating_sub(self.response_reserve)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            num_ctx: DEFAULT_NUM_CTX,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            response_reserve: DEFAULT_RESPONSE_RESERVE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    /// Directory of the on-disk store
    pub db_path: PathBuf,
    pub collection: String,
    pub batch_size: usize,
    /// Batches embedded at once during a load
    pub index_concurrency: usize,
    pub top_k: usize,
    /// Neighbouring messages added around each hit
    pub context_window: usize,
    /// Remove `<think>` blocks and an `Answer:` prefix from model output
    pub strip_reasoning: bool,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            collection: DEFAULT_COLLECTION.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            index_concurrency: 1,
            top_k: DEFAULT_TOP_K,
            context_window: 0,
            strip_reasoning: true,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl RagConfig {
    /// Defaults overridden by process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = RagConfig::default();

        if let Some(provider) = get("EMBED_PROVIDER") {
            config.embedding = EmbeddingConfig::for_provider(provider.parse()?);
        }
        if let Some(path) = get("CHATRAG_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(collection) = get("CHATRAG_COLLECTION") {
            config.collection = collection;
        }
        set_parsed(&get, "CHATRAG_BATCH_SIZE", &mut config.batch_size)?;
        set_parsed(&get, "CHATRAG_INDEX_CONCURRENCY", &mut config.index_concurrency)?;
        set_parsed(&get, "CHATRAG_TOP_K", &mut config.top_k)?;
        set_parsed(&get, "CHATRAG_CONTEXT_WINDOW", &mut config.context_window)?;
        if let Some(flag) = get("CHATRAG_STRIP_REASONING") {
            config.strip_reasoning = parse_flag("CHATRAG_STRIP_REASONING", &flag)?;
        }

        if let Some(url) = get("EMBED_URL") {
            config.embedding.url = url;
        }
        if let Some(model) = get("EMBED_MODEL") {
            config.embedding.model = model;
        }
        set_parsed(&get, "EMBED_MAX_BATCH", &mut config.embedding.max_batch)?;
        set_parsed(&get, "EMBED_CONCURRENCY", &mut config.embedding.concurrency)?;

        if let Some(url) = get("OLLAMA_URL") {
            config.generation.url = url;
        }
        if let Some(model) = get("OLLAMA_MODEL") {
            config.generation.model = model;
        }
        set_parsed(&get, "OLLAMA_TEMPERATURE", &mut config.generation.temperature)?;
        set_parsed(&get, "OLLAMA_TOP_P", &mut config.generation.top_p)?;
        set_parsed(&get, "OLLAMA_NUM_CTX", &mut config.generation.num_ctx)?;
        set_parsed(&get, "OLLAMA_TIMEOUT_SECS", &mut config.generation.timeout_secs)?;
        set_parsed(
            &get,
            "OLLAMA_RESPONSE_RESERVE",
            &mut config.generation.response_reserve,
        )?;

        Ok(config)
    }

    /// Overlay the values present in a TOML config file
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| AgentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.merge_toml(&source).map_err(|e| match e {
            AgentError::Config(msg) => AgentError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn merge_toml(mut self, source: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(source)
            .map_err(|e| AgentError::Config(format!("invalid config file: {}", e)))?;

        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.collection {
            self.collection = v;
        }
        if let Some(v) = file.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = file.index_concurrency {
            self.index_concurrency = v;
        }
        if let Some(v) = file.top_k {
            self.top_k = v;
        }
        if let Some(v) = file.context_window {
            self.context_window = v;
        }
        if let Some(v) = file.strip_reasoning {
            self.strip_reasoning = v;
        }

        if let Some(embedding) = file.embedding {
            if let Some(provider) = embedding.provider {
                if provider != self.embedding.provider {
                    self.embedding = EmbeddingConfig::for_provider(provider);
                }
            }
            if let Some(v) = embedding.url {
                self.embedding.url = v;
            }
            if let Some(v) = embedding.model {
                self.embedding.model = v;
            }
            if let Some(v) = embedding.max_batch {
                self.embedding.max_batch = v;
            }
            if let Some(v) = embedding.concurrency {
                self.embedding.concurrency = v;
            }
        }

        if let Some(generation) = file.generation {
            let target = &mut self.generation;
            if let Some(v) = generation.url {
                target.url = v;
            }
            if let Some(v) = generation.model {
                target.model = v;
            }
            if let Some(v) = generation.temperature {
                target.temperature = v;
            }
            if let Some(v) = generation.top_p {
                target.top_p = v;
            }
            if let Some(v) = generation.num_ctx {
                target.num_ctx = v;
            }
            if let Some(v) = generation.timeout_secs {
                target.timeout_secs = v;
            }
            if let Some(v) = generation.response_reserve {
                target.response_reserve = v;
            }
        }

        Ok(self)
    }
}

/// `~/.chatrag/data`, or a relative `.chatrag/data` without a home directory
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".chatrag").join("data"))
        .unwrap_or_else(|| PathBuf::from(".chatrag").join("data"))
}

fn set_parsed<G, T>(get: &G, key: &str, target: &mut T) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = get(key) {
        *target = raw
            .parse()
            .map_err(|_| AgentError::Config(format!("{} has an invalid value: {}", key, raw)))?;
    }
    Ok(())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentError::Config(format!(
            "{} has an invalid value: {}",
            key, value
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    collection: Option<String>,
    batch_size: Option<usize>,
    index_concurrency: Option<usize>,
    top_k: Option<usize>,
    context_window: Option<usize>,
    strip_reasoning: Option<bool>,
    embedding: Option<EmbeddingSection>,
    generation: Option<GenerationSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmbeddingSection {
    provider: Option<EmbeddingProvider>,
    url: Option<String>,
    model: Option<String>,
    max_batch: Option<usize>,
    concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerationSection {
    url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    num_ctx: Option<usize>,
    timeout_secs: Option<u64>,
    response_reserve: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RagConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.collection, "telegram_messages");
        assert_eq!(config.batch_size, 5000);
        assert_eq!(config.top_k, 200);
        assert_eq!(config.context_window, 0);
        assert!(config.strip_reasoning);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Tei);
        assert_eq!(config.generation.model, "deepseek-r1:32b-qwen-distill-q8_0");
        assert_eq!(config.generation.num_ctx, 32768);
        assert_eq!(config.generation.context_budget(), 32768 - 2048);
    }

    #[test]
    fn test_env_overrides() {
        let config = RagConfig::from_lookup(lookup(&[
            ("EMBED_PROVIDER", "ollama"),
            ("EMBED_MODEL", "nomic-embed-text"),
            ("CHATRAG_COLLECTION", "family"),
            ("CHATRAG_BATCH_SIZE", "100"),
            ("CHATRAG_STRIP_REASONING", "off"),
            ("OLLAMA_TEMPERATURE", "0.2"),
            ("CHATRAG_TOP_K", "  "),
        ]))
        .unwrap();

        assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
        assert_eq!(config.embedding.url, "http://localhost:11434");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.collection, "family");
        assert_eq!(config.batch_size, 100);
        assert!(!config.strip_reasoning);
        assert_eq!(config.generation.temperature, 0.2);
        // blank values fall back to defaults
        assert_eq!(config.top_k, 200);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = RagConfig::from_lookup(lookup(&[("CHATRAG_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CHATRAG_BATCH_SIZE"));

        let err = RagConfig::from_lookup(lookup(&[("EMBED_PROVIDER", "openai")])).unwrap_err();
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn test_merge_toml() {
        let config = RagConfig::default()
            .merge_toml(
                r#"
                collection = "work_chat"
                top_k = 50
                context_window = 4

                [embedding]
                provider = "ollama"
                max_batch = 8

                [generation]
                model = "llama3.1:8b"
                num_ctx = 8192
                "#,
            )
            .unwrap();

        assert_eq!(config.collection, "work_chat");
        assert_eq!(config.top_k, 50);
        assert_eq!(config.context_window, 4);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
        assert_eq!(config.embedding.max_batch, 8);
        assert_eq!(config.generation.model, "llama3.1:8b");
        assert_eq!(config.generation.context_budget(), 8192 - 2048);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let err = RagConfig::default().merge_toml("batchsize = 3").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_merge_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatrag.toml");
        std::fs::write(&path, "batch_size = 10\n").unwrap();

        let config = RagConfig::default().merge_file(&path).unwrap();
        assert_eq!(config.batch_size, 10);

        let missing = RagConfig::default().merge_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(AgentError::Io { .. })));
    }
}

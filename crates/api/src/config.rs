use anyhow::{Context, Result};
use extract::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub chunker: ChunkerSettings,
    pub retry: RetryPolicy,
    pub concurrency: ConcurrencyConfig,
    pub cache: CacheConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub endpoint: String,
    pub collection_name: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerSettings {
    pub max_chars: usize,
    pub figure_lookahead: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Permits shared by embedding and retrieval calls.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Imports are resolved below this directory.
    pub documents: PathBuf,
    pub snapshot: PathBuf,
    pub course_index: PathBuf,
    pub course_content: PathBuf,
    pub course_title: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Also append logs to this file when set.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "qwen2.5".to_string(),
                request_timeout_secs: 120,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "bge-large-zh-v1.5".to_string(),
            },
            vector: VectorConfig {
                endpoint: "http://localhost:6333".to_string(),
                collection_name: "my_rag_collection".to_string(),
                top_k: 3,
            },
            chunker: ChunkerSettings {
                max_chars: 2000,
                figure_lookahead: 3,
            },
            retry: RetryPolicy::default(),
            concurrency: ConcurrencyConfig { workers: 8 },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            paths: PathsConfig {
                documents: PathBuf::from("data/documents"),
                snapshot: PathBuf::from("data/kg_data.json"),
                course_index: PathBuf::from("index.md"),
                course_content: PathBuf::from("wz.md"),
                course_title: graph::outline::DEFAULT_COURSE_TITLE.to_string(),
            },
            logging: LoggingConfig {
                format: LogFormat::Pretty,
                file: None,
            },
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BIND_ADDR") {
            config.server.bind_addr = v;
        }
        if let Some(v) = var("OLLAMA_URL") {
            config.llm.base_url = v.clone();
            config.embedding.base_url = v;
        }
        if let Some(v) = var("LLM_MODEL") {
            config.llm.model = v;
        }
        if let Some(v) = parse(&var, "LLM_TIMEOUT_SECS")? {
            config.llm.request_timeout_secs = v;
        }
        if let Some(v) = var("EMBEDDING_MODEL") {
            config.embedding.model = v;
        }
        if let Some(v) = var("VECTOR_ENDPOINT") {
            config.vector.endpoint = v;
        }
        if let Some(v) = var("COLLECTION_NAME") {
            config.vector.collection_name = v;
        }
        if let Some(v) = parse(&var, "TOP_K")? {
            config.vector.top_k = v;
        }
        if let Some(v) = parse(&var, "CHUNK_MAX_CHARS")? {
            config.chunker.max_chars = v;
        }
        if let Some(v) = parse(&var, "RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(kind) = var("RETRY_BACKOFF") {
            let delay_ms = parse(&var, "RETRY_DELAY_MS")?.unwrap_or(1000);
            let max_ms = parse(&var, "RETRY_MAX_DELAY_MS")?.unwrap_or(10_000);
            config.retry.backoff = match kind.to_lowercase().as_str() {
                "fixed" => Backoff::Fixed { delay_ms },
                "exponential" => Backoff::Exponential {
                    initial_ms: delay_ms,
                    max_ms,
                },
                "jittered" => Backoff::Jittered {
                    base_ms: delay_ms,
                    max_ms,
                },
                other => anyhow::bail!("RETRY_BACKOFF must be fixed, exponential or jittered, got {}", other),
            };
        } else if let Some(delay_ms) = parse(&var, "RETRY_DELAY_MS")? {
            config.retry.backoff = Backoff::Fixed { delay_ms };
        }
        if let Some(v) = parse(&var, "WORKERS")? {
            config.concurrency.workers = v;
        }
        if let Some(v) = parse(&var, "CACHE_ENABLED")? {
            config.cache.enabled = v;
        }
        if let Some(v) = parse(&var, "CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = v;
        }
        if let Some(v) = var("DOCUMENTS_ROOT") {
            config.paths.documents = PathBuf::from(v);
        }
        if let Some(v) = var("KG_SNAPSHOT") {
            config.paths.snapshot = PathBuf::from(v);
        }
        if let Some(v) = var("COURSE_INDEX") {
            config.paths.course_index = PathBuf::from(v);
        }
        if let Some(v) = var("COURSE_CONTENT") {
            config.paths.course_content = PathBuf::from(v);
        }
        if let Some(v) = var("COURSE_TITLE") {
            config.paths.course_title = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            config.logging.format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => anyhow::bail!("LOG_FORMAT must be pretty or json, got {}", other),
            };
        }
        if let Some(v) = var("LOG_FILE") {
            config.logging.file = Some(PathBuf::from(v));
        }

        if config.concurrency.workers == 0 {
            anyhow::bail!("WORKERS must be at least 1");
        }
        if config.retry.max_attempts == 0 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }

        Ok(config)
    }

    pub fn chunker_config(&self) -> ingest::ChunkerConfig {
        ingest::ChunkerConfig {
            max_chars: self.chunker.max_chars,
            figure_lookahead: self.chunker.figure_lookahead,
        }
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|v| {
            v.trim()
                .parse()
                .with_context(|| format!("{} must be a valid {}", name, std::any::type_name::<T>()))
        })
        .transpose()
}

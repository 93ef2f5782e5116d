use crate::error::CoreError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Process-wide, immutable-after-start configuration. Mirrors the Configuration
/// table: every key named there has a field here, typed and grouped by the
/// subsystem that owns it.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub generator: GeneratorConfig,
    pub vision: VisionConfig,
    pub rag: RagConfig,
    pub prompts: PromptsConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    pub documents_collection: String,
    pub memory_collection: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratorBackend {
    OpenAiCompatibleHosted,
    Gemini,
    OpenRouter,
    LocalVisionLlmServer,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub max_context_tokens: usize,
}

/// The vision-LLM adapter backing image ingestion (4.K). Disabled by default — an
/// image upload fails extraction with a validation error until a backend is
/// configured, per 4.I/4.K treating it as an optional capability.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VisionConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub retrieval_top_k: usize,
    pub reranker_top_n: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_history: usize,
    pub memory_ttl_hours: i64,
    pub max_file_size_bytes: u64,
    pub max_batch_size_bytes: u64,
    pub simple_route_max_tokens: usize,
    pub dedup_by_hash: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system_prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub reranker_concurrency: usize,
    pub generator_concurrency: usize,
    pub store_concurrency: usize,
    pub acquire_timeout_ms: u64,
    pub embedding_timeout_seconds: u64,
    pub search_timeout_seconds: u64,
    pub rerank_timeout_seconds: u64,
    pub generation_timeout_seconds: u64,
    pub vision_timeout_seconds: u64,
}

/// Activity logging (11. Ambient Stack). A second, small connection pool backs the
/// async `ActivityLogger` so a slow log flush can never contend with the store pool
/// the query/ingest paths depend on.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub pool_max_size: u32,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub worker_count: usize,
}

impl Settings {
    pub fn load() -> Result<Self, CoreError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CoreError::fatal(format!("config load failed: {e}")))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| CoreError::fatal(format!("config deserialize failed: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.embedding.dimension == 0 {
            return Err(CoreError::fatal("embedding.dimension must be nonzero"));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(CoreError::fatal(
                "rag.chunk_overlap must be smaller than rag.chunk_size",
            ));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::services::chunker::StrategyKind;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:16334";
pub const DEFAULT_JOB_STORE_URL: &str = "postgres://localhost:5432/ingestd";
pub const DEFAULT_COLLECTION: &str = "ingestd_chunks";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub job_store: JobStoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    pub fn config_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|p| p.join("ingestd").join("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            return Self::load_from(&path);
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject broken settings at load time rather than mid-pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.strategy_kind()?;

        if self.chunking.window == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.window must be greater than zero".to_string(),
            ));
        }
        if self.chunking.overlap >= self.chunking.window {
            return Err(ConfigError::ValidationError(format!(
                "chunking.overlap ({}) must be smaller than chunking.window ({})",
                self.chunking.overlap, self.chunking.window
            )));
        }
        if self.worker.concurrency_limit == 0 {
            return Err(ConfigError::ValidationError(
                "worker.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms == 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry delays must satisfy 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: u32,
}

fn default_embedding_url() -> String {
    std::env::var("INGESTD_EMBEDDING_URL").unwrap_or_else(|_| DEFAULT_EMBEDDING_URL.to_string())
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_embedding_batch_size() -> u32 {
    8
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

/// Vector store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_dimension")]
    pub dimension: u64,
}

fn default_qdrant_url() -> String {
    std::env::var("INGESTD_QDRANT_URL").unwrap_or_else(|_| DEFAULT_QDRANT_URL.to_string())
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_dimension() -> u64 {
    1024
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            dimension: default_dimension(),
        }
    }
}

/// Job store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreDriver {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStoreConfig {
    #[serde(default)]
    pub driver: JobStoreDriver,

    #[serde(default = "default_job_store_url")]
    pub url: String,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_job_store_url() -> String {
    std::env::var("INGESTD_DATABASE_URL").unwrap_or_else(|_| DEFAULT_JOB_STORE_URL.to_string())
}

fn default_pool_max() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    10
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            driver: JobStoreDriver::default(),
            url: default_job_store_url(),
            pool_max: default_pool_max(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Strategy name: "fixed_size" or "sentence".
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Window size in characters for fixed-size chunking, soft budget for
    /// sentence chunking.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Overlap in characters between consecutive fixed-size windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Sentence model identifier for the sentence-aware strategy.
    #[serde(default = "default_sentence_model")]
    pub sentence_model: String,
}

fn default_strategy() -> String {
    "fixed_size".to_string()
}

fn default_window() -> usize {
    2000
}

fn default_overlap() -> usize {
    200
}

fn default_sentence_model() -> String {
    "en".to_string()
}

impl ChunkingConfig {
    /// Parse the configured strategy name, rejecting unknown names.
    pub fn strategy_kind(&self) -> Result<StrategyKind, ConfigError> {
        self.strategy
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!(
                "unknown chunking strategy: {} (expected fixed_size or sentence)",
                self.strategy
            )))
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            window: default_window(),
            overlap: default_overlap(),
            sentence_model: default_sentence_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum embedding provider calls in flight at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Root directory resolved against document storage references.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Capacity of the in-process ingestion queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_concurrency_limit() -> usize {
    8
}

fn default_storage_root() -> String {
    "uploads".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            storage_root: default_storage_root(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`CODEDOC_*`)
//! 2. Project config (`.codedoc/config.toml`)
//! 3. User config (`~/.config/codedoc/config.toml`)
//! 4. Compiled-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CodedocError, CodedocResult};
use crate::retry::RetryPolicy;

/// Top-level configuration for the codedoc engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the registry, vector snapshot, and staging area.
    #[serde(default = "Config::default_data_dir")]
    pub data_dir: PathBuf,

    /// Vector store location. Defaults to `<data_dir>/vectors.bin` for
    /// the built-in flat store.
    #[serde(default)]
    pub vector_store_path: Option<PathBuf>,

    /// Ingestion configuration.
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM provider configuration.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Maximum upload size in bytes. Uploads larger than this are rejected.
    #[serde(default = "IngestionConfig::default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// File patterns excluded from the manifest (glob syntax).
    #[serde(default = "IngestionConfig::default_excludes")]
    pub exclude_patterns: Vec<String>,

    /// Maximum size of a single source file. Larger files are skipped.
    #[serde(default = "IngestionConfig::default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Initial retry delay in milliseconds.
    #[serde(default = "IngestionConfig::default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Retry backoff multiplier.
    #[serde(default = "IngestionConfig::default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "IngestionConfig::default_retry_cap_ms")]
    pub retry_cap_ms: u64,

    /// Total retry budget per activity in milliseconds.
    #[serde(default = "IngestionConfig::default_retry_budget_ms")]
    pub retry_budget_ms: u64,

    /// Delay between embedding batches in milliseconds (provider courtesy).
    #[serde(default = "IngestionConfig::default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: Self::default_max_upload_bytes(),
            exclude_patterns: Self::default_excludes(),
            max_file_bytes: Self::default_max_file_bytes(),
            retry_initial_ms: Self::default_retry_initial_ms(),
            retry_multiplier: Self::default_retry_multiplier(),
            retry_cap_ms: Self::default_retry_cap_ms(),
            retry_budget_ms: Self::default_retry_budget_ms(),
            inter_batch_delay_ms: Self::default_inter_batch_delay_ms(),
        }
    }
}

impl IngestionConfig {
    fn default_max_upload_bytes() -> u64 {
        100 * 1024 * 1024 // 100 MiB
    }

    fn default_excludes() -> Vec<String> {
        vec![
            ".git".into(),
            "node_modules".into(),
            "target".into(),
            "__pycache__".into(),
            ".venv".into(),
            "venv".into(),
            "dist".into(),
            "build".into(),
            ".next".into(),
            "*.lock".into(),
            "*.min.js".into(),
            "*.min.css".into(),
            "*.map".into(),
        ]
    }

    fn default_max_file_bytes() -> u64 {
        5 * 1024 * 1024 // 5MB
    }

    fn default_retry_initial_ms() -> u64 { 2_000 }

    fn default_retry_multiplier() -> f64 { 2.0 }

    fn default_retry_cap_ms() -> u64 { 60_000 }

    fn default_retry_budget_ms() -> u64 { 1_800_000 }

    fn default_inter_batch_delay_ms() -> u64 { 100 }

    /// The retry policy value applied at every activity call-site.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(self.retry_initial_ms),
            multiplier: self.retry_multiplier,
            cap: Duration::from_millis(self.retry_cap_ms),
            budget: Duration::from_millis(self.retry_budget_ms),
        }
    }
}

/// Chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens.
    #[serde(default = "ChunkingConfig::default_token_target")]
    pub token_target: u32,

    /// Hard cap on chunk size in tokens.
    #[serde(default = "ChunkingConfig::default_token_cap")]
    pub token_cap: u32,

    /// Overlap in tokens when a region must be split.
    #[serde(default = "ChunkingConfig::default_overlap_tokens")]
    pub overlap_tokens: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            token_target: Self::default_token_target(),
            token_cap: Self::default_token_cap(),
            overlap_tokens: Self::default_overlap_tokens(),
        }
    }
}

impl ChunkingConfig {
    fn default_token_target() -> u32 { 800 }
    fn default_token_cap() -> u32 { 1_500 }
    fn default_overlap_tokens() -> u32 { 75 }
}

/// One embedding provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    /// Base endpoint URL (OpenAI-compatible `/embeddings` is appended).
    pub endpoint: String,

    /// API key, if the endpoint requires one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier sent with each request.
    #[serde(default = "EmbeddingProviderConfig::default_model")]
    pub model: String,
}

impl EmbeddingProviderConfig {
    fn default_model() -> String {
        "text-embedding-3-small".into()
    }
}

/// Embedding client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Primary provider. Required for ingestion and dense retrieval.
    #[serde(default)]
    pub primary: Option<EmbeddingProviderConfig>,

    /// Fallback provider, used when the primary fails unrecoverably.
    #[serde(default)]
    pub fallback: Option<EmbeddingProviderConfig>,

    /// Batch size for embedding requests.
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,

    /// Maximum concurrent embedding requests.
    #[serde(default = "EmbeddingConfig::default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallback: None,
            batch_size: Self::default_batch_size(),
            max_concurrent: Self::default_max_concurrent(),
        }
    }
}

impl EmbeddingConfig {
    fn default_batch_size() -> usize { 100 }
    fn default_max_concurrent() -> usize { 32 }
}

/// LLM client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base endpoint URL (OpenAI-compatible `/chat/completions` is appended).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key, if the endpoint requires one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier sent with each request.
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,

    /// Maximum concurrent generations sharing the connection pool.
    #[serde(default = "LlmConfig::default_max_concurrent")]
    pub max_concurrent: usize,

    /// Number of prior session messages included as history.
    #[serde(default = "LlmConfig::default_history_messages")]
    pub history_messages: usize,

    /// Token budget for the retrieved-code context block.
    #[serde(default = "LlmConfig::default_context_budget_tokens")]
    pub context_budget_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: Self::default_model(),
            max_concurrent: Self::default_max_concurrent(),
            history_messages: Self::default_history_messages(),
            context_budget_tokens: Self::default_context_budget_tokens(),
        }
    }
}

impl LlmConfig {
    fn default_model() -> String { "gpt-4o-mini".into() }
    fn default_max_concurrent() -> usize { 10 }
    fn default_history_messages() -> usize { 5 }
    fn default_context_budget_tokens() -> u32 { 12_000 }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidate pool size for the dense arm.
    #[serde(default = "RetrievalConfig::default_k_dense")]
    pub k_dense: usize,

    /// Number of fused results returned.
    #[serde(default = "RetrievalConfig::default_k_final")]
    pub k_final: usize,

    /// Weight of the dense similarity in the fused score.
    #[serde(default = "RetrievalConfig::default_dense_weight")]
    pub dense_weight: f64,

    /// Maximum concurrent queries admitted by the agent.
    #[serde(default = "RetrievalConfig::default_concurrent_queries_max")]
    pub concurrent_queries_max: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_dense: Self::default_k_dense(),
            k_final: Self::default_k_final(),
            dense_weight: Self::default_dense_weight(),
            concurrent_queries_max: Self::default_concurrent_queries_max(),
        }
    }
}

impl RetrievalConfig {
    fn default_k_dense() -> usize { 20 }
    fn default_k_final() -> usize { 5 }
    fn default_dense_weight() -> f64 { 0.7 }
    fn default_concurrent_queries_max() -> usize { 10 }
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session time-to-live in seconds since last activity.
    #[serde(default = "SessionConfig::default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Interval between expiry sweeps in seconds.
    #[serde(default = "SessionConfig::default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: Self::default_ttl_seconds(),
            sweep_interval_seconds: Self::default_sweep_interval_seconds(),
        }
    }
}

impl SessionConfig {
    fn default_ttl_seconds() -> u64 { 604_800 } // 7 days
    fn default_sweep_interval_seconds() -> u64 { 86_400 } // daily
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Config {
    /// Load configuration from defaults, then overlay user config,
    /// project config, and environment overrides.
    pub fn load(project_root: &Path) -> CodedocResult<Self> {
        let mut config = Self::default();

        // User config: ~/.config/codedoc/config.toml
        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("codedoc").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        // Project config: <root>/.codedoc/config.toml
        let project_config_path = project_root.join(".codedoc").join("config.toml");
        if project_config_path.exists() {
            config.merge_from_file(&project_config_path)?;
        }

        // Environment overrides
        config.apply_env_overrides();

        Ok(config)
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codedoc")
    }

    /// Directory holding staged codebase content, one subdirectory per id.
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    /// Path of the SQLite registry database.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }

    /// Path of the vector store snapshot.
    pub fn vector_snapshot_path(&self) -> PathBuf {
        self.vector_store_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vectors.bin"))
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> CodedocResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| CodedocError::Config {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        if let Some(data_dir) = overlay.get("data_dir").and_then(|v| v.as_str()) {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Some(path) = overlay.get("vector_store_path").and_then(|v| v.as_str()) {
            self.vector_store_path = Some(PathBuf::from(path));
        }
        if let Some(section) = overlay.get("ingestion") {
            if let Ok(parsed) = section.clone().try_into::<IngestionConfig>() {
                self.ingestion = parsed;
            }
        }
        if let Some(section) = overlay.get("chunking") {
            if let Ok(parsed) = section.clone().try_into::<ChunkingConfig>() {
                self.chunking = parsed;
            }
        }
        if let Some(section) = overlay.get("embedding") {
            if let Ok(parsed) = section.clone().try_into::<EmbeddingConfig>() {
                self.embedding = parsed;
            }
        }
        if let Some(section) = overlay.get("llm") {
            if let Ok(parsed) = section.clone().try_into::<LlmConfig>() {
                self.llm = parsed;
            }
        }
        if let Some(section) = overlay.get("retrieval") {
            if let Ok(parsed) = section.clone().try_into::<RetrievalConfig>() {
                self.retrieval = parsed;
            }
        }
        if let Some(section) = overlay.get("session") {
            if let Ok(parsed) = section.clone().try_into::<SessionConfig>() {
                self.session = parsed;
            }
        }
        if let Some(section) = overlay.get("logging") {
            if let Ok(parsed) = section.clone().try_into::<LoggingConfig>() {
                self.logging = parsed;
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (CODEDOC_* prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CODEDOC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("CODEDOC_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(endpoint) = std::env::var("CODEDOC_EMBEDDING_ENDPOINT") {
            let key = std::env::var("CODEDOC_EMBEDDING_API_KEY").ok();
            let provider = self.embedding.primary.get_or_insert_with(|| {
                EmbeddingProviderConfig {
                    endpoint: String::new(),
                    api_key: None,
                    model: EmbeddingProviderConfig::default_model(),
                }
            });
            provider.endpoint = endpoint;
            if key.is_some() {
                provider.api_key = key;
            }
        }
        if let Ok(endpoint) = std::env::var("CODEDOC_LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("CODEDOC_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            vector_store_path: None,
            ingestion: IngestionConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.ingestion.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.ingestion.retry_initial_ms, 2_000);
        assert_eq!(config.chunking.token_cap, 1_500);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.retrieval.k_dense, 20);
        assert_eq!(config.retrieval.k_final, 5);
        assert_eq!(config.llm.history_messages, 5);
        assert_eq!(config.session.ttl_seconds, 604_800);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = IngestionConfig::default().retry_policy();
        assert_eq!(policy.initial, Duration::from_secs(2));
        assert_eq!(policy.cap, Duration::from_secs(60));
        assert_eq!(policy.budget, Duration::from_secs(1_800));
    }

    #[test]
    fn test_merge_overlay_keeps_unset_sections() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval]\nk_final = 8\n").expect("write");

        let mut config = Config::default();
        config.merge_from_file(&path).expect("merge");
        assert_eq!(config.retrieval.k_final, 8);
        assert_eq!(config.chunking.token_target, 800);
    }
}

//! Configuration management for sqlrag
//!
//! Loads the TOML configuration, applies `SQLRAG_SECTION__KEY` environment
//! overrides and named profiles, then validates the result.

use crate::error::{Result, SqlRagError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub database: DatabaseConfig,
    pub index_store: IndexStoreConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankerConfig,
    pub llm: LlmConfig,
    pub summarizer: SummarizerConfig,
    pub validation: ValidationConfig,
    pub orchestrator: OrchestratorConfig,
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Target database the generated SQL runs against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Rows returned to the caller are capped at this count
    pub max_rows: usize,
    pub timeout_secs: u64,
    pub pool_size: u32,
}

/// Vector-searchable schema index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStoreConfig {
    /// "chroma" or "memory"
    pub backend: String,
    pub url: String,
    pub tenant: String,
    pub database: String,
    pub collection: String,
    pub timeout_secs: u64,
    /// Upper bound on the corpus snapshot used for the lexical index
    pub corpus_limit: usize,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub timeout_secs: u64,
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates requested from each sub-retriever
    pub k: usize,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// Rank constant of the weighted reciprocal rank fusion
    pub rrf_k: f32,
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// "cross-encoder", "lexical-signal" or "llm-selection"
    pub strategy: String,
    pub model: String,
    pub top_n: usize,
    pub hybrid_weight: f32,
    pub rerank_weight: f32,
    pub timeout_secs: u64,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,
}

impl LlmConfig {
    /// Upper bound on one generation call, covering every client retry and
    /// the backoff between them
    pub fn generation_deadline(&self) -> Duration {
        let per_request = Duration::from_secs(self.timeout_secs);
        (1..=self.max_retries).fold(per_request, |total, attempt| {
            total + per_request + crate::generation::retry_delay(attempt)
        })
    }
}

/// Result summarization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    pub enabled: bool,
    pub temperature: f32,
    pub sample_rows: usize,
}

/// Schema validation heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Qualifier pairs used for column suggestions when no substring match
    /// exists, e.g. `["building", "unit"]` suggests a `*unit*` column for an
    /// unknown `building_id`.
    #[serde(default)]
    pub column_aliases: Vec<(String, String)>,
}

/// Retry loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_attempts: usize,
}

/// Schema indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary_file: Option<PathBuf>,
    /// Distinct sample values collected per text column
    pub sample_values: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarizer_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_store_backend: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SqlRagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SqlRagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SqlRagError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SqlRagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SqlRagError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(strategy) = overrides.reranker_strategy {
            self.reranker.strategy = strategy;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(enabled) = overrides.summarizer_enabled {
            self.summarizer.enabled = enabled;
        }
        if let Some(backend) = overrides.index_store_backend {
            self.index_store.backend = backend;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: SQLRAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("SQLRAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "DATABASE__PATH" => {
                self.database.path = PathBuf::from(value);
            }
            "DATABASE__MAX_ROWS" => {
                self.database.max_rows = parse_env(path, value)?;
            }
            "INDEX_STORE__BACKEND" => {
                self.index_store.backend = value.to_string();
            }
            "INDEX_STORE__URL" => {
                self.index_store.url = value.to_string();
            }
            "INDEX_STORE__COLLECTION" => {
                self.index_store.collection = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "RERANKER__STRATEGY" => {
                self.reranker.strategy = value.to_string();
            }
            "RERANKER__TOP_N" => {
                self.reranker.top_n = parse_env(path, value)?;
            }
            "LLM__PROVIDER" => {
                self.llm.provider = value.to_string();
            }
            "LLM__BASE_URL" => {
                self.llm.base_url = Some(value.to_string());
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__TEMPERATURE" => {
                self.llm.temperature = parse_env(path, value)?;
            }
            "SUMMARIZER__ENABLED" => {
                self.summarizer.enabled = parse_env(path, value)?;
            }
            "ORCHESTRATOR__MAX_ATTEMPTS" => {
                self.orchestrator.max_attempts = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SqlRagError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("sqlrag").join("config.toml"))
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().ok_or_else(|| {
                SqlRagError::Config("Cannot determine home directory".to_string())
            })?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| SqlRagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.sqlrag");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            database: DatabaseConfig {
                path: data_dir.join("target.db"),
                max_rows: 500,
                timeout_secs: 30,
                pool_size: 8,
            },
            index_store: IndexStoreConfig {
                backend: "chroma".to_string(),
                url: "http://localhost:8000".to_string(),
                tenant: "default_tenant".to_string(),
                database: "default_database".to_string(),
                collection: "database_schema".to_string(),
                timeout_secs: 30,
                corpus_limit: 1000,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                timeout_secs: 30,
            },
            retrieval: RetrievalConfig {
                k: 5,
                semantic_weight: 0.7,
                keyword_weight: 0.3,
                rrf_k: 60.0,
            },
            reranker: RerankerConfig {
                strategy: "cross-encoder".to_string(),
                model: "BAAI/bge-reranker-base".to_string(),
                top_n: 5,
                hybrid_weight: 0.3,
                rerank_weight: 0.7,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: "openai".to_string(),
                base_url: None,
                api_key_env: "OPENAI_API_KEY".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.0,
                timeout_secs: 60,
                max_retries: 2,
                prompt_file: None,
            },
            summarizer: SummarizerConfig {
                enabled: true,
                temperature: 0.3,
                sample_rows: 5,
            },
            validation: ValidationConfig {
                column_aliases: vec![("building".to_string(), "unit".to_string())],
            },
            orchestrator: OrchestratorConfig { max_attempts: 3 },
            indexing: IndexingConfig {
                glossary_file: None,
                sample_values: 10,
            },
            profiles: HashMap::new(),
        }
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sqlrag
#[derive(Error, Debug)]
pub enum SqlRagError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Target database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Index store errors
    #[error("Index store error: {0}")]
    IndexStore(#[from] crate::index_store::IndexStoreError),

    /// Schema retrieval errors
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] crate::retrieval::RetrievalError),

    /// Embedding model errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Reranker construction errors
    #[error("Reranker error: {0}")]
    Rerank(#[from] crate::retrieval::RerankError),

    /// Language model client errors
    #[error("LLM error: {0}")]
    Llm(#[from] crate::generation::LlmError),

    /// Prompt template errors
    #[error("Prompt error: {0}")]
    Prompt(#[from] crate::generation::PromptError),

    /// Schema validator errors
    #[error("Schema validator error: {0}")]
    Validator(#[from] crate::validation::ValidatorError),

    /// Target database errors raised while running or describing SQL
    #[error("Execution error: {0}")]
    Execution(#[from] crate::database::ExecutionError),

    /// Schema indexer errors
    #[error("Indexing error: {0}")]
    Indexing(#[from] crate::indexing::IndexingError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for sqlrag operations
pub type Result<T> = std::result::Result<T, SqlRagError>;

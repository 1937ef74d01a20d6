use crate::config::Config;
use crate::error::{Result, SqlRagError, ValidationError};

/// Known reranker strategies
pub const RERANK_STRATEGIES: [&str; 3] = ["cross-encoder", "lexical-signal", "llm-selection"];

/// Known index store backends
pub const INDEX_BACKENDS: [&str; 2] = ["chroma", "memory"];

/// Known LLM providers (anything else needs an explicit `base_url`)
pub const LLM_PROVIDERS: [&str; 3] = ["openai", "groq", "ollama"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_database(config, &mut errors);
        Self::validate_index_store(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_reranker(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_orchestrator(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SqlRagError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_database(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.database.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "database.path",
                "Database path cannot be empty",
            ));
        }

        if config.database.max_rows == 0 {
            errors.push(ValidationError::new(
                "database.max_rows",
                "Row limit must be greater than 0",
            ));
        }

        if config.database.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "database.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if config.database.pool_size == 0 {
            errors.push(ValidationError::new(
                "database.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_index_store(config: &Config, errors: &mut Vec<ValidationError>) {
        let store = &config.index_store;

        if !INDEX_BACKENDS.contains(&store.backend.as_str()) {
            errors.push(ValidationError::new(
                "index_store.backend",
                format!(
                    "Backend must be one of {:?}, got '{}'",
                    INDEX_BACKENDS, store.backend
                ),
            ));
        }

        if store.backend == "chroma" && !Self::is_http_url(&store.url) {
            errors.push(ValidationError::new(
                "index_store.url",
                format!("Expected an http(s) URL, got '{}'", store.url),
            ));
        }

        if store.collection.is_empty() {
            errors.push(ValidationError::new(
                "index_store.collection",
                "Collection name cannot be empty",
            ));
        }

        if store.corpus_limit == 0 {
            errors.push(ValidationError::new(
                "index_store.corpus_limit",
                "Corpus limit must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.k == 0 {
            errors.push(ValidationError::new(
                "retrieval.k",
                "k must be greater than 0",
            ));
        }

        Self::validate_weight_pair(
            "retrieval.semantic_weight",
            retrieval.semantic_weight,
            "retrieval.keyword_weight",
            retrieval.keyword_weight,
            errors,
        );

        if retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF constant cannot be negative",
            ));
        }
    }

    fn validate_reranker(config: &Config, errors: &mut Vec<ValidationError>) {
        let reranker = &config.reranker;

        if !RERANK_STRATEGIES.contains(&reranker.strategy.as_str()) {
            errors.push(ValidationError::new(
                "reranker.strategy",
                format!(
                    "Strategy must be one of {:?}, got '{}'",
                    RERANK_STRATEGIES, reranker.strategy
                ),
            ));
        }

        if reranker.top_n == 0 {
            errors.push(ValidationError::new(
                "reranker.top_n",
                "top_n must be greater than 0",
            ));
        }

        Self::validate_weight_pair(
            "reranker.hybrid_weight",
            reranker.hybrid_weight,
            "reranker.rerank_weight",
            reranker.rerank_weight,
            errors,
        );
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        let provider = &config.llm.provider;
        match &config.llm.base_url {
            Some(url) if !Self::is_http_url(url) => {
                errors.push(ValidationError::new(
                    "llm.base_url",
                    format!("Expected an http(s) URL, got '{}'", url),
                ));
            }
            None if !LLM_PROVIDERS.contains(&provider.as_str()) => {
                errors.push(ValidationError::new(
                    "llm.provider",
                    format!(
                        "Provider must be one of {:?} unless llm.base_url is set, got '{}'",
                        LLM_PROVIDERS, provider
                    ),
                ));
            }
            _ => {}
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model cannot be empty"));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_orchestrator(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.orchestrator.max_attempts == 0 {
            errors.push(ValidationError::new(
                "orchestrator.max_attempts",
                "At least one attempt is required",
            ));
        }
    }

    fn validate_weight_pair(
        first_path: &str,
        first: f32,
        second_path: &str,
        second: f32,
        errors: &mut Vec<ValidationError>,
    ) {
        for (path, weight) in [(first_path, first), (second_path, second)] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        if ((first + second) - 1.0).abs() > 1e-3 {
            errors.push(ValidationError::new(
                second_path,
                format!(
                    "{} and {} must sum to 1.0, got {}",
                    first_path,
                    second_path,
                    first + second
                ),
            ));
        }
    }

    fn is_http_url(s: &str) -> bool {
        s.starts_with("http://") || s.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.reranker.hybrid_weight = 0.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_unknown_strategy() {
        let mut config = Config::default();
        config.reranker.strategy = "gpt".to_string();

        match ConfigValidator::validate(&config) {
            Err(SqlRagError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "reranker.strategy");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_provider_requires_base_url() {
        let mut config = Config::default();
        config.llm.provider = "vllm".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.llm.base_url = Some("http://localhost:8001/v1".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_attempts() {
        let mut config = Config::default();
        config.orchestrator.max_attempts = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}

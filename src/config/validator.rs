use crate::config::Config;
use crate::error::{Result, ValidationError, VaultError};

const PROVIDERS: [&str; 2] = ["openai", "fastembed"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retry(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_reranking(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VaultError::ConfigValidation { errors })
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

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.sources.reminders_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "sources.reminders_dir",
                "Reminders directory cannot be empty",
            ));
        }

        if config.sources.parsed_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "sources.parsed_dir",
                "Parsed data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if !PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be one of {:?}, got '{}'", PROVIDERS, provider),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Vector dimension must be greater than 0",
            ));
        }

        if provider == "openai" && config.embedding.base_url.is_empty() {
            errors.push(ValidationError::new(
                "embedding.base_url",
                "Base URL cannot be empty for the openai provider",
            ));
        }

        if config.embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_retry(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retry.max_attempts == 0 {
            errors.push(ValidationError::new(
                "retry.max_attempts",
                "At least one attempt is required",
            ));
        }

        if config.retry.multiplier < 1.0 {
            errors.push(ValidationError::new(
                "retry.multiplier",
                format!(
                    "Backoff multiplier must be at least 1.0, got {}",
                    config.retry.multiplier
                ),
            ));
        }

        if config.retry.max_delay_ms < config.retry.base_delay_ms {
            errors.push(ValidationError::new(
                "retry.max_delay_ms",
                "Maximum delay cannot be below the base delay",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.max_chars == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chars",
                "Chunk budget must be greater than 0",
            ));
        }

        if config.chunking.overlap >= config.chunking.max_chars {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than the chunk budget ({})",
                    config.chunking.overlap, config.chunking.max_chars
                ),
            ));
        }

        if config.chunking.preview_chars == 0 {
            errors.push(ValidationError::new(
                "chunking.preview_chars",
                "Preview length must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.workers == 0 {
            errors.push(ValidationError::new(
                "indexing.workers",
                "Worker pool needs at least one worker",
            ));
        }

        if config.indexing.first_id < 0 {
            errors.push(ValidationError::new(
                "indexing.first_id",
                "First id cannot be negative",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.default_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_k",
                "Default k must be greater than 0",
            ));
        }

        if config.retrieval.category_overfetch == 0 || config.retrieval.window_overfetch == 0 {
            errors.push(ValidationError::new(
                "retrieval",
                "Over-fetch multipliers must be greater than 0",
            ));
        }
    }

    fn validate_reranking(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.reranking;
        if r.category_bonus < 0.0
            || r.tag_bonus < 0.0
            || r.validity_penalty < 0.0
            || r.archived_penalty < 0.0
        {
            errors.push(ValidationError::new(
                "reranking",
                "Bonuses and penalties must not be negative",
            ));
        }

        if r.max_age_days < 0 {
            errors.push(ValidationError::new(
                "reranking.max_age_days",
                "Age cap cannot be negative",
            ));
        }
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
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.embedding.provider = "carrier-pigeon".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_overlap_must_fit_budget() {
        let mut config = Config::default();
        config.chunking.max_chars = 100;
        config.chunking.overlap = 100;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.indexing.workers = 0;
        config.retry.max_attempts = 0;

        match ConfigValidator::validate(&config) {
            Err(VaultError::ConfigValidation { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }
}

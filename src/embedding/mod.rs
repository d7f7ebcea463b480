//! Text to vector conversion
//!
//! - `EmbeddingProvider` trait abstracts the backend (OpenAI-compatible HTTP, local FastEmbed)
//! - `RetryPolicy` retries transient provider failures with exponential backoff
//! - `EmbeddingClient` combines the two and enforces the configured dimension
mod openai;
mod provider;
mod retry;

pub use openai::OpenAiProvider;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use retry::{RetryFailure, RetryPolicy};

use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Retrying, dimension-checking front end over a provider
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    dimension: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy, dimension: usize) -> Self {
        Self {
            provider,
            policy,
            dimension,
        }
    }

    /// Build the provider named in the configuration
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingError> {
        let provider = build_provider(config)?;
        Ok(Self::new(
            provider,
            RetryPolicy::from(&config.retry),
            config.embedding.dimension,
        ))
    }

    /// Embed `text`, retrying transient failures
    ///
    /// Exhausted retries yield [`EmbeddingError::Exhausted`]; a vector of the wrong length
    /// yields [`EmbeddingError::DimensionMismatch`] and is never retried.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self
            .policy
            .run(|| self.provider.embed(text), EmbeddingError::is_retryable)
            .map_err(|failure| match failure.last_error {
                EmbeddingError::Transient(message) => EmbeddingError::Exhausted {
                    attempts: failure.attempts,
                    message,
                },
                other => other,
            })?;

        if vector.len() != self.dimension {
            error!(
                "Provider {} returned {} dimensions, expected {}",
                self.provider.model_name(),
                vector.len(),
                self.dimension
            );
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

/// Instantiate the configured provider
pub fn build_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let embedding = &config.embedding;
    let provider: Arc<dyn EmbeddingProvider> = match embedding.provider.as_str() {
        "openai" => Arc::new(OpenAiProvider::from_env(
            &embedding.api_key_env,
            &embedding.base_url,
            &embedding.model,
            embedding.dimension,
            Duration::from_secs(embedding.timeout_secs),
        )?),
        "fastembed" => Arc::new(FastEmbedProvider::new(&embedding.model)?),
        other => {
            return Err(EmbeddingError::Initialization(format!(
                "Unknown embedding provider: {}",
                other
            )))
        }
    };

    if provider.dimension() != embedding.dimension {
        return Err(EmbeddingError::Initialization(format!(
            "Model {} produces {}-dimensional vectors but embedding.dimension is {}",
            provider.model_name(),
            provider.dimension(),
            embedding.dimension
        )));
    }

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `failure` for the first `failures` calls, then returns `vector`
    struct ScriptedProvider {
        failures: u32,
        failure: EmbeddingError,
        vector: Vec<f32>,
        calls: AtomicU32,
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.failure.clone())
            } else {
                Ok(self.vector.clone())
            }
        }

        fn dimension(&self) -> usize {
            self.vector.len()
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn client(provider: Arc<ScriptedProvider>, attempts: u32, dimension: usize) -> EmbeddingClient {
        let policy = RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
        };
        EmbeddingClient::new(provider, policy, dimension)
    }

    fn scripted(failures: u32, failure: EmbeddingError) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            failures,
            failure,
            vector: vec![0.1, 0.2, 0.3],
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_retries_transient_failures() {
        let provider = scripted(2, EmbeddingError::Transient("429".into()));
        let client = client(provider.clone(), 4, 3);

        assert_eq!(client.embed("hello").unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let provider = scripted(10, EmbeddingError::Transient("503".into()));
        let client = client(provider.clone(), 4, 3);

        match client.embed("hello") {
            Err(EmbeddingError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_rejection_not_retried() {
        let provider = scripted(10, EmbeddingError::Rejected("400".into()));
        let client = client(provider.clone(), 4, 3);

        assert!(matches!(client.embed("hello"), Err(EmbeddingError::Rejected(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let provider = scripted(0, EmbeddingError::Transient("unused".into()));
        let client = client(provider.clone(), 4, 1536);

        assert_eq!(
            client.embed("hello"),
            Err(EmbeddingError::DimensionMismatch {
                expected: 1536,
                actual: 3
            })
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = Config::default();
        config.embedding.provider = "carrier-pigeon".to_string();
        assert!(matches!(
            build_provider(&config),
            Err(EmbeddingError::Initialization(_))
        ));
    }
}

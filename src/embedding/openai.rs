//! OpenAI-compatible HTTP embedding provider

use super::provider::{EmbeddingError, EmbeddingProvider};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Blocking client for `POST {base_url}/embeddings`
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiProvider {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::Initialization(
                "missing OpenAI API key".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::Initialization(
                "missing OpenAI model name".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| EmbeddingError::Initialization("invalid OpenAI API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Initialization(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        })
    }

    /// Read the API key from `key_env` and build the provider
    pub fn from_env(
        key_env: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(key_env).map_err(|_| {
            EmbeddingError::Initialization(format!("environment variable {} is not set", key_env))
        })?;
        Self::new(&api_key, base_url, model, dimension, timeout)
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("embeddings request failed ({}): {}", status, body);
            return Err(if is_retryable_status(status) {
                EmbeddingError::Transient(message)
            } else {
                EmbeddingError::Rejected(message)
            });
        }

        let parsed: EmbeddingResponse = resp.json().map_err(classify_transport)?;
        parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| EmbeddingError::Rejected("response contained no embeddings".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_transport(err: reqwest::Error) -> EmbeddingError {
    if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
    {
        EmbeddingError::Transient(err.to_string())
    } else {
        EmbeddingError::Rejected(err.to_string())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = OpenAiProvider::new(
            "  ",
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            1536,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(EmbeddingError::Initialization(_))));
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"data":[{"embedding":[0.5,-0.25],"index":0}],"model":"m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.25]);
    }
}

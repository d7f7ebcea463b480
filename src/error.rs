use crate::embedding::EmbeddingError;
use crate::index::VectorIndexError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for brainvault
#[derive(Error, Debug)]
pub enum VaultError {
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

    /// Metadata store errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Registry and health report errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Embedding provider errors that abort the current operation
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector index errors
    #[error("Vector index error: {0}")]
    VectorIndex(#[from] VectorIndexError),

    /// Index or metadata store missing, partial, or unreadable; a refresh rebuilds it
    #[error("Index not yet built: {reason}")]
    IndexNotBuilt { reason: String },

    /// Another refresh holds the refresh lock
    #[error("Refresh already in progress")]
    RefreshInProgress,

    /// Registry file unreadable
    #[error("Registry error: {0}")]
    Registry(String),

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

/// Result type for brainvault operations
pub type Result<T> = std::result::Result<T, VaultError>;

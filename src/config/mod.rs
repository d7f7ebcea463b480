//! Configuration management for brainvault
//!
//! Loads the TOML configuration, applies `BRAINVAULT_SECTION__KEY` environment
//! overrides and validates every section before anything touches the stores.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub sources: SourcesConfig,
    pub embedding: EmbeddingConfig,
    pub retry: RetryConfig,
    pub chunking: ChunkingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub reranking: RerankingConfig,
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

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of all persisted state
    pub data_dir: PathBuf,
}

/// Source collections. Relative paths resolve against `storage.data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Reminder snippets, category "Reminders"
    pub reminders_dir: PathBuf,
    /// Parsed documents; each sub-folder is a category
    pub parsed_dir: PathBuf,
    /// Optional chat history mined for inline `REMINDER:` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" or "fastembed"
    pub provider: String,
    pub model: String,
    /// Fixed vector dimension D of the index
    pub dimension: usize,
    /// Environment variable holding the API key (openai only)
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Retry policy for transient provider failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Soft maximum characters per chunk
    pub max_chars: usize,
    /// Characters carried over from the previous chunk
    pub overlap: usize,
    /// Maximum characters kept in a metadata preview
    pub preview_chars: usize,
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Bounded worker pool size for document embedding
    pub workers: usize,
    /// First id handed out by a brand new index
    pub first_id: i64,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_k: usize,
    /// Pool multiplier for category-restricted searches
    pub category_overfetch: usize,
    /// Pool multiplier for windowed searches
    pub window_overfetch: usize,
    /// Category treated as meeting notes
    pub meetings_category: String,
}

/// Composite score weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankingConfig {
    pub category_bonus: f64,
    pub tag_bonus: f64,
    pub validity_penalty: f64,
    /// Subtracted from records the registry archived; larger than every bonus combined
    #[serde(default = "default_archived_penalty")]
    pub archived_penalty: f64,
    pub max_age_days: i64,
    /// Domain terms recognised as tags in queries
    pub vocabulary: Vec<String>,
}

fn default_archived_penalty() -> f64 {
    1.0e9
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VaultError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;

        config.finish()
    }

    /// Load `path` when it exists, otherwise start from the defaults
    ///
    /// Both paths go through the same env overrides and validation.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::warn!(
            "Config file not found, using defaults. Run 'brainvault config init' to create one."
        );
        Self::default().finish()
    }

    fn finish(mut self) -> Result<Self> {
        self.apply_env_overrides();
        ConfigValidator::validate(&self)?;
        Ok(self)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: BRAINVAULT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("BRAINVAULT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DIMENSION" => {
                self.embedding.dimension = parse_env(path, value)?;
            }
            "EMBEDDING__BASE_URL" => {
                self.embedding.base_url = value.to_string();
            }
            "INDEXING__WORKERS" => {
                self.indexing.workers = parse_env(path, value)?;
            }
            "RETRY__MAX_ATTEMPTS" => {
                self.retry.max_attempts = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Data directory with `~/` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }

    /// Directory holding the index, registry and health report
    pub fn embeddings_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("embeddings"))
    }

    pub fn registry_path(&self) -> Result<PathBuf> {
        Ok(self.embeddings_dir()?.join("knowledge_registry.csv"))
    }

    pub fn report_path(&self) -> Result<PathBuf> {
        Ok(self.embeddings_dir()?.join("embedding_report.csv"))
    }

    pub fn reminders_dir(&self) -> Result<PathBuf> {
        self.resolve(&self.sources.reminders_dir)
    }

    pub fn parsed_dir(&self) -> Result<PathBuf> {
        self.resolve(&self.sources.parsed_dir)
    }

    pub fn history_file(&self) -> Result<Option<PathBuf>> {
        self.sources
            .history_file
            .as_ref()
            .map(|p| self.resolve(p))
            .transpose()
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let expanded = expand_path(path)?;
        if expanded.is_absolute() {
            Ok(expanded)
        } else {
            Ok(self.data_dir()?.join(expanded))
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| VaultError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("brainvault").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| VaultError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".brainvault"))
    }

    /// Defaults rooted at an explicit data directory (tests, scripted setups)
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| VaultError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| VaultError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| VaultError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.brainvault"),
            },
            sources: SourcesConfig {
                reminders_dir: PathBuf::from("reminders"),
                parsed_dir: PathBuf::from("parsed_data"),
                history_file: Some(PathBuf::from("chat_history.json")),
            },
            embedding: EmbeddingConfig {
                provider: "openai".to_string(),
                model: "text-embedding-3-small".to_string(),
                dimension: 1536,
                api_key_env: "OPENAI_API_KEY".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                timeout_secs: 30,
            },
            retry: RetryConfig {
                max_attempts: 4,
                base_delay_ms: 500,
                multiplier: 1.5,
                max_delay_ms: 10_000,
            },
            chunking: ChunkingConfig {
                max_chars: 3500,
                overlap: 300,
                preview_chars: 1000,
            },
            indexing: IndexingConfig {
                workers: 4,
                first_id: 1_000_000,
            },
            retrieval: RetrievalConfig {
                default_k: 7,
                category_overfetch: 4,
                window_overfetch: 20,
                meetings_category: "meetings".to_string(),
            },
            reranking: RerankingConfig {
                category_bonus: 1.0e7,
                tag_bonus: 1.0e6,
                validity_penalty: 5.0e6,
                archived_penalty: default_archived_penalty(),
                max_age_days: 365,
                vocabulary: [
                    "policy",
                    "finance",
                    "budget",
                    "headcount",
                    "hiring",
                    "meeting",
                    "reminder",
                    "security",
                    "sales",
                    "marketing",
                    "product",
                    "engineering",
                    "legal",
                    "hr",
                    "operations",
                    "roadmap",
                    "pricing",
                    "compliance",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
        }
    }
}

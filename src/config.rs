use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TranslatorError};
use crate::tokenizer::ModelFamily;

fn default_max_continuations() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent_jobs() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Language names accepted as source or target
    pub supported_languages: Vec<String>,
    pub translate: TranslateConfig,
    /// Token budgets keyed by engine name (e.g. `gpt35`)
    pub models: BTreeMap<String, ModelProfile>,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Completion provider flavour
    pub provider: ProviderKind,
    /// Base URL of the completion service
    pub endpoint: String,
    /// Azure `api-version` query parameter
    pub api_version: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Engine used when a request does not name one
    pub default_engine: String,
    /// Sampling temperature
    pub temperature: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    /// Maximum continuation turns per chunk when the model truncates its answer
    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,
    /// Timeout applied to every single completion request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How many jobs the CLI runs at once in directory mode
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Plain OpenAI-compatible `/v1/chat/completions`
    OpenAi,
    /// Azure OpenAI deployment URLs
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Context size of the model in tokens
    pub max_tokens: usize,
    /// Message accounting family; resolved from the engine name when absent
    #[serde(default)]
    pub family: Option<ModelFamily>,
    /// Deployment or model name sent to the provider; defaults to the engine key
    #[serde(default)]
    pub deployment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Elasticsearch base URL
    pub endpoint: String,
    /// Index holding terminology and translation memory
    pub index: String,
    pub username: Option<String>,
    /// Environment variable holding the Elasticsearch password
    pub password_env: String,
    /// Base URL of the embedding service
    pub embedding_endpoint: String,
    pub embedding_model: String,
    /// Dimension of stored source vectors
    pub vector_dim: usize,
    /// Number of records returned by a lookup
    pub top_k: usize,
    /// Attempts made for a store write before giving up
    pub insert_attempts: u32,
    pub batch_retry_delay_ms: u64,
    pub single_retry_delay_ms: u64,
    /// Search terminology before translating unless the request overrides it
    pub search_terms: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "gpt35".to_string(),
            ModelProfile { max_tokens: 4096, family: Some(ModelFamily::Gpt35Turbo0301), deployment: None },
        );
        models.insert(
            "gpt4-8k".to_string(),
            ModelProfile { max_tokens: 8192, family: Some(ModelFamily::Gpt4_0314), deployment: None },
        );
        models.insert(
            "gpt4-32k".to_string(),
            ModelProfile { max_tokens: 32768, family: Some(ModelFamily::Gpt4_0314), deployment: None },
        );

        Self {
            supported_languages: vec!["English".to_string(), "Chinese".to_string()],
            translate: TranslateConfig {
                provider: ProviderKind::Azure,
                endpoint: "https://example.openai.azure.com".to_string(),
                api_version: "2023-03-15-preview".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                default_engine: "gpt35".to_string(),
                temperature: 0.5,
                frequency_penalty: 0.0,
                presence_penalty: 0.0,
                max_continuations: default_max_continuations(),
                request_timeout_secs: default_request_timeout_secs(),
                max_concurrent_jobs: default_max_concurrent_jobs(),
            },
            models,
            memory: MemoryConfig {
                endpoint: "http://localhost:9200".to_string(),
                index: "translation_material_1.0".to_string(),
                username: Some("elastic".to_string()),
                password_env: "ELASTIC_PASSWORD".to_string(),
                embedding_endpoint: "https://api.openai.com".to_string(),
                embedding_model: "text-embedding-ada-002".to_string(),
                vector_dim: 1536,
                top_k: 1,
                insert_attempts: 20,
                batch_retry_delay_ms: 5000,
                single_retry_delay_ms: 2000,
                search_terms: false,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TranslatorError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| TranslatorError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TranslatorError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslatorError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Look up the token profile of an engine. Unknown engines are a hard error.
    pub fn model(&self, engine: &str) -> Result<&ModelProfile> {
        self.models.get(engine).ok_or_else(|| {
            TranslatorError::Config(format!(
                "Unknown engine '{}'. Configured engines: {}",
                engine,
                self.models.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn is_supported_language(&self, language: &str) -> bool {
        self.supported_languages.iter().any(|l| l == language)
    }
}

impl ModelProfile {
    /// Accounting family for this engine. Unknown engines without an explicit family fail.
    pub fn resolve_family(&self, engine: &str) -> Result<ModelFamily> {
        match self.family {
            Some(family) => Ok(family),
            None => ModelFamily::from_model(self.deployment.as_deref().unwrap_or(engine)),
        }
    }

    /// Name sent to the completion provider
    pub fn deployment_name<'a>(&'a self, engine: &'a str) -> &'a str {
        self.deployment.as_deref().unwrap_or(engine)
    }
}

impl TranslateConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl MemoryConfig {
    pub fn batch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.batch_retry_delay_ms)
    }

    pub fn single_retry_delay(&self) -> Duration {
        Duration::from_millis(self.single_retry_delay_ms)
    }
}

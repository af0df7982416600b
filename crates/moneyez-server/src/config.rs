//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the MoneyEZ service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub embedding: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
    pub finance: FinanceConfig,
    pub graph: GraphSettings,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Shared secret expected in `X-External-Secret`, and sent to the finance backend
    pub external_secret: String,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Directory for per-conversation checkpoints; in-memory when unset
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            external_secret: String::new(),
            log_level: "info".to_string(),
            checkpoint_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Chat model used by the conversation graph
    pub chat_model: String,
    /// Model used for expense classification and suggestions
    pub classifier_model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            chat_model: "gemini-2.0-flash".to_string(),
            classifier_model: "gemini-2.0-flash".to_string(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: Option<String>,
    /// Texts per embedding request (at most 100)
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-004".to_string(),
            base_url: None,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// SQLite database holding documents, chunks and embeddings
    pub db_path: PathBuf,
    /// Documents returned per retrieval query
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            db_path: Config::data_dir().join("knowledge.db"),
            top_k: 3,
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinanceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://easymoney.anttravel.online".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub use_rag: bool,
    pub max_tool_iterations: usize,
    pub model_timeout_secs: u64,
    pub retrieval_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Replaces the built-in system prompt
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            use_rag: true,
            max_tool_iterations: 10,
            model_timeout_secs: 120,
            retrieval_timeout_secs: 30,
            tool_timeout_secs: 60,
            system_prompt_file: None,
        }
    }
}

impl GraphSettings {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub google: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("moneyez")
    }

    /// Get the data directory
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("moneyez")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MONEYEZ_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load from the default path, then apply environment overrides
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing or unreadable file yields defaults
    pub fn load_from(path: &Path) -> Self {
        let mut config = if !path.exists() {
            Self::default()
        } else {
            match fs::read_to_string(path) {
                Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Secrets from the environment take precedence over the file
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("MONEYEZ_EXTERNAL_SECRET").filter(|s| !s.is_empty()) {
            self.server.external_secret = secret;
        }
        if let Some(key) = ["GOOGLE_API_KEY", "GEMINI_API_KEY"]
            .iter()
            .find_map(|name| lookup(name).filter(|s| !s.is_empty()))
        {
            self.api_keys.google = Some(key);
        }
    }

    /// Google API key from config or environment
    pub fn google_api_key(&self) -> moneyez_ai::Result<String> {
        moneyez_ai::providers::get_api_key(
            self.api_keys.google.as_deref(),
            &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        )
    }

    /// Effective system prompt, if a custom file is configured and readable
    pub fn system_prompt(&self) -> Option<String> {
        let path = self.graph.system_prompt_file.as_ref()?;
        match fs::read_to_string(path) {
            Ok(prompt) => Some(prompt),
            Err(e) => {
                tracing::warn!("Failed to read system prompt file {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::InvocationOptions;

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub provider: String,
    pub model: String,
    /// Upper bound on model → tool → model round trips per generation.
    pub max_tool_rounds: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            provider: "ollama".to_string(),
            model: std::env::var("OLLAMA_MODEL")
                .unwrap_or_else(|_| "qwen3:4b-instruct-2507-q4_K_M".to_string()),
            max_tool_rounds: 5,
        }
    }
}

/// Retrieval augmentation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub embedding_model: String,
    pub segment_size: usize,
    pub top_n: usize,
    /// Embedding cache location, `~/.cache/parlor/embeddings` on Linux.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            embedding_model: "bge-m3".to_string(),
            segment_size: 128,
            top_n: 3,
            cache_dir: dirs::cache_dir().map(|d| d.join("parlor").join("embeddings")),
        }
    }
}

/// Host application state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub setup_completed: bool,
}

/// Unified configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub invocation: InvocationOptions,
    pub retrieval: RetrievalConfig,
    pub app: AppConfig,
}

impl Config {
    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// `~/.parlor/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parlor")
            .join("config.toml")
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path())
    }
}

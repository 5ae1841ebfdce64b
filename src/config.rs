use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MemhopConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub generator: GeneratorConfig,
    pub retrieval: RetrievalConfig,
    pub retry: RetryConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Temperature of the answer call. Reranking always samples at 0.
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Result count when adaptive parameters are off.
    pub top_k: usize,
    /// Derive `top_k` and the expansion count from query complexity.
    pub adaptive: bool,
    /// Expansion count when adaptive parameters are off.
    pub default_expansions: usize,
    pub deduplication: bool,
    pub dedup_threshold: f64,
    pub consolidation_max_group: usize,
    pub multi_hop: bool,
    pub max_hops: usize,
    pub hop_similarity_threshold: f64,
    pub rerank_batch_size: usize,
    /// Render per-speaker graph relations into the answer prompt.
    pub graph_mode: bool,
    /// Pass the user scope as an explicit store filter as well.
    pub filter_memories: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub store_delay_ms: u64,
    pub generator_delay_ms: u64,
    /// Hard bound on a single external call. 0 disables it.
    pub attempt_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub output_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_memhop_dir()
            .join("memories.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            base_url: "http://localhost:11434/v1".into(),
            model: "llama3.2:latest".into(),
            api_key: None,
            temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 30,
            adaptive: true,
            default_expansions: 2,
            deduplication: true,
            dedup_threshold: 0.75,
            consolidation_max_group: 3,
            multi_hop: true,
            max_hops: 2,
            hop_similarity_threshold: 0.3,
            rerank_batch_size: 5,
            graph_mode: false,
            filter_memories: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            store_delay_ms: 1000,
            generator_delay_ms: 500,
            attempt_timeout_secs: 60,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 5,
            output_path: "results/memhop_results.json".into(),
        }
    }
}

/// Returns `~/.memhop/`
pub fn default_memhop_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memhop")
}

/// Returns the default config file path: `~/.memhop/config.toml`
pub fn default_config_path() -> PathBuf {
    default_memhop_dir().join("config.toml")
}

impl MemhopConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemhopConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// `MEMHOP_DB`, `MEMHOP_LOG_LEVEL`, `MEMHOP_GENERATOR_URL`, `MEMHOP_MODEL`,
    /// and `MEMHOP_API_KEY` (falling back to `OPENAI_API_KEY`).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMHOP_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMHOP_LOG_LEVEL") {
            self.general.log_level = val;
        }
        if let Ok(val) = std::env::var("MEMHOP_GENERATOR_URL") {
            self.generator.base_url = val;
        }
        if let Ok(val) = std::env::var("MEMHOP_MODEL") {
            self.generator.model = val;
        }
        if let Ok(val) =
            std::env::var("MEMHOP_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            self.generator.api_key = Some(val);
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

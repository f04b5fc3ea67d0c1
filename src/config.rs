//! TOML configuration.
//!
//! Every section has defaults so the backend runs without a config file;
//! the desktop shell normally starts `ilib serve` with no arguments. Paths
//! default to the per-user data directory (`~/.IntelligentLibrary`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the per-user data directory under the home directory.
pub const DATA_DIR_NAME: &str = ".IntelligentLibrary";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub agent: AgentConfig,
    pub license: LicenseConfig,
}

/// On-disk locations. Relative paths are resolved against `data_dir`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub index_path: PathBuf,
    pub embedding_cache_dir: PathBuf,
    pub credential_file: PathBuf,
    pub license_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            documents_dir: PathBuf::from("documents"),
            index_path: PathBuf::from("db_storage"),
            embedding_cache_dir: PathBuf::from("embedding_cache"),
            credential_file: PathBuf::from(".env"),
            license_file: PathBuf::from("license.json"),
        }
    }
}

impl PathsConfig {
    /// Build a path set rooted at `data_dir` with the default file names.
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.resolve(&self.documents_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.index_path)
    }

    pub fn embedding_cache_dir(&self) -> PathBuf {
        self.resolve(&self.embedding_cache_dir)
    }

    pub fn credential_file(&self) -> PathBuf {
        self.resolve(&self.credential_file)
    }

    pub fn license_file(&self) -> PathBuf {
        self.resolve(&self.license_file)
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.data_dir.join(p)
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME))
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Drop hits scoring below this cosine similarity. Unset keeps all `top_k`.
    pub score_threshold: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "paraphrase-multilingual-minilm-l12-v2".to_string(),
            batch_size: 64,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    pub model: String,
    /// Model used for the one-shot credential check.
    pub validation_model: String,
    pub temperature: f32,
    pub max_iterations: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            validation_model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_iterations: 5,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LicenseConfig {
    /// Refuse to serve when the trial or license has expired.
    pub enforce: bool,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self { enforce: true }
    }
}

impl Config {
    /// Defaults with every path rooted at `data_dir`. Used by tests and
    /// embedders that manage their own directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig::rooted_at(data_dir),
            ..Self::default()
        }
    }
}

/// Default config file location: `~/.IntelligentLibrary/config.toml`.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Load configuration.
///
/// An explicit path must exist. Without one, the default location is read
/// if present and built-in defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(p) => parse_file(p)?,
        None => {
            let p = default_config_path();
            if p.exists() {
                parse_file(&p)?
            } else {
                Config::default()
            }
        }
    };

    validate(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if let Some(t) = config.retrieval.score_threshold {
        if !(-1.0..=1.0).contains(&t) {
            anyhow::bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.agent.max_iterations < 1 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.agent.temperature) {
        anyhow::bail!("agent.temperature must be in [0.0, 2.0]");
    }
    Ok(())
}

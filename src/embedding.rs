//! Embedding provider abstraction.
//!
//! Defines the [`EmbeddingProvider`] trait and the [`LocalProvider`], which
//! runs a multilingual sentence-embedding model locally through fastembed.
//! The model is downloaded from Hugging Face on first use into the
//! configured cache directory; afterwards embedding runs offline.
//!
//! Also provides the vector utilities used by the index:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Trait for embedding providers.
///
/// Implementations must return one vector per input text, in input order,
/// each of length [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"paraphrase-multilingual-minilm-l12-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Resolve the dimensionality of a supported local model.
fn model_dims(name: &str) -> Result<usize> {
    match name {
        "paraphrase-multilingual-minilm-l12-v2" => Ok(384),
        "paraphrase-multilingual-mpnet-base-v2" => Ok(768),
        "multilingual-e5-small" => Ok(384),
        "multilingual-e5-base" => Ok(768),
        "multilingual-e5-large" => Ok(1024),
        "all-minilm-l6-v2" => Ok(384),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             paraphrase-multilingual-minilm-l12-v2, paraphrase-multilingual-mpnet-base-v2, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large, all-minilm-l6-v2",
            other
        ),
    }
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for local inference.
///
/// The ONNX model is loaded lazily on the first call and kept for the life
/// of the provider, so rebuilding the index does not reload it.
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    #[cfg_attr(not(feature = "local-embeddings-fastembed"), allow(dead_code))]
    cache_dir: PathBuf,
    #[cfg(feature = "local-embeddings-fastembed")]
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig, cache_dir: &Path) -> Result<Self> {
        let dims = model_dims(&config.model)?;
        #[cfg(feature = "local-embeddings-fastembed")]
        config_to_fastembed_model(&config.model)?;

        Ok(Self {
            model_name: config.model.clone(),
            dims,
            batch_size: config.batch_size,
            cache_dir: cache_dir.to_path_buf(),
            #[cfg(feature = "local-embeddings-fastembed")]
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let cache_dir = self.cache_dir.clone();
        let batch_size = self.batch_size;
        let slot = Arc::clone(&self.model);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;

            if guard.is_none() {
                std::fs::create_dir_all(&cache_dir)?;
                tracing::info!(cache = %cache_dir.display(), "loading local embedding model");
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_cache_dir(cache_dir)
                        .with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }

            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("embedding model not loaded"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _ = self.batch_size;
        bail!("Local embedding provider requires --features local-embeddings-fastembed")
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "paraphrase-multilingual-minilm-l12-v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "paraphrase-multilingual-mpnet-base-v2" => {
            Ok(fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2)
        }
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        other => bail!("Unknown local embedding model: '{}'", other),
    }
}

/// Create the configured embedding provider.
pub fn create_provider(
    config: &EmbeddingConfig,
    cache_dir: &Path,
) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(LocalProvider::new(config, cache_dir)?))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

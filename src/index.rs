//! On-disk vector index.
//!
//! A single SQLite file holding every chunk with its embedding as a
//! little-endian f32 BLOB. The index is never updated in place: each
//! document load destroys the previous index and builds a new one, so
//! stored embeddings can never go stale relative to the staged documents.
//!
//! Nearest-neighbour search is brute-force cosine similarity computed in
//! Rust over all stored vectors.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::{self, EmbeddingProvider};
use crate::models::{Chunk, RetrievedChunk};

/// Name recorded in `index_meta` for the chunk collection.
pub const COLLECTION_NAME: &str = "library";

/// Options for [`VectorIndex::build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Number of texts per embedding call.
    pub batch_size: usize,
    /// Upper bound on the whole embedding phase.
    pub timeout: Duration,
}

/// A built, queryable vector index.
pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    len: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("path", &self.path)
            .field("model", &self.provider.model_name())
            .field("len", &self.len)
            .finish()
    }
}

impl VectorIndex {
    /// Destroy whatever exists at `path` and build a fresh index from `chunks`.
    ///
    /// Fails on an empty chunk list. Embedding errors abort the build.
    pub async fn build(
        path: &Path,
        chunks: &[Chunk],
        provider: Arc<dyn EmbeddingProvider>,
        options: &BuildOptions,
    ) -> Result<Self> {
        if chunks.is_empty() {
            bail!("No text could be extracted from the documents");
        }

        let vectors = tokio::time::timeout(
            options.timeout,
            embed_all(provider.as_ref(), chunks, options.batch_size),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Embedding timed out after {:?}",
                options.timeout
            )
        })??;

        destroy(path)?;
        let pool = connect(path).await?;
        create_schema(&pool).await?;
        write_meta(&pool, provider.as_ref(), chunks.len()).await?;
        insert_chunks(&pool, chunks, &vectors).await?;

        tracing::info!(
            path = %path.display(),
            chunks = chunks.len(),
            model = provider.model_name(),
            "vector index built"
        );

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            provider,
            len: chunks.len(),
        })
    }

    /// Embed `query` and return the `k` most similar chunks, best first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query_vec = embedding::embed_query(self.provider.as_ref(), query).await?;
        self.search_vector(&query_vec, k).await
    }

    /// Return the `k` chunks nearest to `query_vec` by cosine similarity.
    ///
    /// Ties are broken by insertion order so results are deterministic.
    pub async fn search_vector(&self, query_vec: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, source, page, text, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(i64, RetrievedChunk)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let page: i64 = row.get("page");
                let vec = embedding::blob_to_vec(&blob);
                (
                    row.get::<i64, _>("id"),
                    RetrievedChunk {
                        source: row.get("source"),
                        page: page as u32,
                        text: row.get("text"),
                        score: embedding::cosine_similarity(query_vec, &vec),
                    },
                )
            })
            .collect();

        scored.sort_by(|(id_a, a), (id_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(id_a.cmp(id_b))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    /// Number of chunks in the index.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the underlying connection pool. The file stays on disk.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn embed_all(
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = provider
            .embed(&texts)
            .await
            .context("Failed to embed document chunks")?;

        if embedded.len() != texts.len() {
            bail!(
                "Embedding provider returned {} vectors for {} texts",
                embedded.len(),
                texts.len()
            );
        }
        if let Some(v) = embedded.iter().find(|v| v.len() != provider.dims()) {
            bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                provider.dims(),
                v.len()
            );
        }
        vectors.extend(embedded);
    }

    tracing::debug!(vectors = vectors.len(), "embedded chunks");
    Ok(vectors)
}

/// Remove an existing index at `path`, whether it is a file or a directory.
pub fn destroy(path: &Path) -> Result<()> {
    if path.is_dir() {
        tracing::info!(path = %path.display(), "removing old index directory");
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove old index: {}", path.display()))?;
    } else if path.exists() {
        tracing::info!(path = %path.display(), "removing old index file");
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove old index: {}", path.display()))?;
    }

    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_os_string();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.is_file() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // A filename, not a URL: `?` and `#` in the path are literal.
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index at {}", path.display()))?;

    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            source TEXT NOT NULL,
            page INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn write_meta(pool: &SqlitePool, provider: &dyn EmbeddingProvider, count: usize) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let entries = [
        ("collection", COLLECTION_NAME.to_string()),
        ("model", provider.model_name().to_string()),
        ("dims", provider.dims().to_string()),
        ("chunks", count.to_string()),
        ("created_at", now),
    ];

    for (key, value) in entries {
        sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn insert_chunks(pool: &SqlitePool, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for (chunk, vec) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            r#"
            INSERT INTO chunks (source, page, chunk_index, text, embedding)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.source)
        .bind(chunk.page as i64)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(embedding::vec_to_blob(vec))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Read a value from `index_meta`. Used by diagnostics and tests.
pub async fn read_meta(index: &VectorIndex, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(&index.pool)
        .await?;
    Ok(value)
}

//! Application session.
//!
//! A [`Session`] owns everything one front-end connection needs: the
//! configuration, the embedding provider, the chat backend, the license
//! manager, and the agent built by the last successful document load.
//! It is owned by the request loop and handles one operation at a time.
//!
//! # Document load
//!
//! ```text
//! paths ─► validate key ─► stage ─► list PDFs ─► extract ─► chunk
//!                                                              │
//!            ready ◄─ new agent ◄─ retrieval tool ◄─ index ◄───┘
//! ```
//!
//! Staging zero files stops before anything is rebuilt, so the previous
//! agent keeps working. Once the rebuild itself starts, the previous agent
//! is dropped; a failed rebuild leaves the session not ready.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::chunk;
use crate::config::Config;
use crate::credential;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::LibraryError;
use crate::extract;
use crate::index::{BuildOptions, VectorIndex};
use crate::license::{ActivationResult, LicenseManager, LicenseStatus};
use crate::llm::{ChatBackend, OpenAiBackend};
use crate::models::Chunk;
use crate::stage;
use crate::tools::{RetrievalTool, ToolRegistry};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Ready,
    NotReady,
}

/// The agent and the index it searches.
struct Library {
    agent: Agent,
    index: Arc<VectorIndex>,
}

pub struct Session {
    config: Config,
    embedder: Arc<dyn EmbeddingProvider>,
    backend: Arc<dyn ChatBackend>,
    license: LicenseManager,
    library: Option<Library>,
}

impl Session {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Arc<dyn ChatBackend>,
        license: LicenseManager,
    ) -> Self {
        Self {
            config,
            embedder,
            backend,
            license,
            library: None,
        }
    }

    /// Session with the local embedding model and the OpenAI backend.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder =
            embedding::create_provider(&config.embedding, &config.paths.embedding_cache_dir())?;
        let backend = Arc::new(OpenAiBackend::new(config.agent.clone()));
        let license = LicenseManager::new(config.paths.license_file());
        Ok(Self::new(config, embedder, backend, license))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        if self.library.is_some() {
            SessionStatus::Ready
        } else {
            SessionStatus::NotReady
        }
    }

    /// Persist `key`, then check it against the API.
    ///
    /// The key is saved even when it turns out to be invalid. A failure to
    /// save is logged and does not affect the validation result.
    pub async fn save_and_validate_key(&self, key: &str) -> Result<&'static str, LibraryError> {
        let key = key.trim();
        if let Err(e) = credential::save_credential(&self.config.paths.credential_file(), key) {
            tracing::error!(error = %format!("{:#}", e), "failed to save API key");
        }
        credential::check_api_key(self.backend.as_ref(), key).await?;
        Ok(credential::VALID_MESSAGE)
    }

    /// Stage `paths`, rebuild the index, and replace the agent.
    ///
    /// An empty `api_key` falls back to the stored credential.
    pub async fn load_documents(
        &mut self,
        paths: &[PathBuf],
        api_key: &str,
    ) -> Result<String, LibraryError> {
        if paths.is_empty() {
            return Err(LibraryError::NoFilePaths);
        }

        let api_key = self.resolve_key(api_key);
        credential::check_api_key(self.backend.as_ref(), &api_key).await?;

        let staging_dir = self.config.paths.documents_dir();
        let sources = paths.to_vec();
        let report = {
            let dir = staging_dir.clone();
            tokio::task::spawn_blocking(move || stage::stage_documents(&dir, &sources))
                .await
                .map_err(|e| LibraryError::Pipeline(e.into()))?
                .map_err(LibraryError::Pipeline)?
        };
        if report.copied == 0 {
            return Err(LibraryError::NoDocuments);
        }

        let pdfs = stage::list_pdfs(&staging_dir).map_err(LibraryError::Pipeline)?;
        if pdfs.is_empty() {
            return Err(LibraryError::NoPdfsFound);
        }
        let chunks = extract_chunks(pdfs.clone(), &self.config)
            .await
            .map_err(LibraryError::Pipeline)?;

        if let Some(old) = self.library.take() {
            old.index.close().await;
        }

        let options = BuildOptions {
            batch_size: self.config.embedding.batch_size,
            timeout: Duration::from_secs(self.config.embedding.timeout_secs),
        };
        let index = VectorIndex::build(
            &self.config.paths.index_path(),
            &chunks,
            Arc::clone(&self.embedder),
            &options,
        )
        .await
        .map_err(LibraryError::Pipeline)?;
        let index = Arc::new(index);

        let mut tools = ToolRegistry::new();
        tools.register(Box::new(RetrievalTool::new(
            Arc::clone(&index),
            &self.config.retrieval,
        )));
        let agent = Agent::new(
            self.backend.agent_model(&api_key),
            tools,
            self.config.agent.max_iterations,
        );
        self.library = Some(Library { agent, index });

        tracing::info!(documents = pdfs.len(), chunks = chunks.len(), "library ready");
        Ok(format!(
            "[OK] {} document(s) processed and library created!",
            pdfs.len()
        ))
    }

    /// Ask the current agent a question.
    pub async fn ask(&mut self, question: &str) -> Result<String, LibraryError> {
        let library = self.library.as_mut().ok_or(LibraryError::NotReady)?;
        let answer = library
            .agent
            .ask(question)
            .await?;
        Ok(answer.trim().to_string())
    }

    pub fn license_status(&self) -> Result<LicenseStatus> {
        self.license.status()
    }

    pub fn activate_license(&self, key: &str) -> ActivationResult {
        self.license.activate(key)
    }

    fn resolve_key(&self, api_key: &str) -> String {
        let api_key = api_key.trim();
        if !api_key.is_empty() {
            return api_key.to_string();
        }
        match credential::load_credential(&self.config.paths.credential_file()) {
            Ok(Some(stored)) => stored,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "could not read stored API key");
                String::new()
            }
        }
    }
}

/// Extract and chunk every staged PDF. Any unreadable PDF fails the load.
async fn extract_chunks(pdfs: Vec<PathBuf>, config: &Config) -> Result<Vec<Chunk>> {
    let chunking = config.chunking.clone();

    tokio::task::spawn_blocking(move || -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for path in &pdfs {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let pages = extract::extract_pdf_pages(path)
                .with_context(|| format!("Failed to read {}", name))?;
            let doc_chunks = chunk::split_pages(&name, &pages, &chunking);
            tracing::debug!(file = %name, pages = pages.len(), chunks = doc_chunks.len(), "chunked");
            chunks.extend(doc_chunks);
        }
        Ok(chunks)
    })
    .await?
}

//! Core data models used throughout the library.
//!
//! These types represent the chunks and retrieval results that flow through
//! the ingestion and question-answering pipeline.

use serde::Serialize;

/// A bounded text span extracted from one page of a staged PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Base filename of the source PDF.
    pub source: String,
    /// 0-based page number. Displayed 1-based.
    pub page: u32,
    /// Position of this chunk within its document, contiguous from 0.
    pub chunk_index: i64,
    pub text: String,
}

impl Chunk {
    /// Page number as shown to users.
    pub fn display_page(&self) -> u32 {
        self.page + 1
    }
}

/// A chunk returned from the vector index with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub source: String,
    pub page: u32,
    pub text: String,
    pub score: f32,
}

/// Outcome of staging user-selected files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub copied: usize,
    pub skipped: usize,
}

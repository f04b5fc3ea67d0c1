//! Shared fixtures for integration tests: a deterministic embedder, a
//! scripted chat backend, and hand-built PDFs.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use intelligent_library::agent::REFUSAL_ANSWER;
use intelligent_library::config::Config;
use intelligent_library::embedding::EmbeddingProvider;
use intelligent_library::license::{LicenseManager, ManualClock};
use intelligent_library::llm::{
    ChatBackend, ChatMessage, ChatModel, ChatResponse, LlmError, Role, ToolCall, ToolDefinition,
};
use intelligent_library::session::Session;
use intelligent_library::tools::{NO_RESULTS, SEARCH_TOOL_NAME};

/// A key the scripted backend treats as revoked.
pub const REVOKED_KEY: &str = "sk-revoked";
pub const GOOD_KEY: &str = "sk-good";

// ============ Embedder ============

/// Bag-of-words hashing embedder. Texts sharing words have positive
/// cosine similarity; texts sharing none score zero.
pub struct HashEmbedder;

const HASH_DIMS: usize = 256;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "test-hash"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; HASH_DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % HASH_DIMS as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

// ============ Chat backend ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Search once with the question, then answer by quoting the tool
    /// output, or refuse when it found nothing.
    Grounded,
    /// Request the search tool on every turn.
    AlwaysTool,
}

pub struct ScriptedBackend {
    behavior: Behavior,
    pub validation_calls: Arc<AtomicUsize>,
    pub agent_calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            validation_calls: Arc::new(AtomicUsize::new(0)),
            agent_calls: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl ChatBackend for ScriptedBackend {
    fn agent_model(&self, api_key: &str) -> Arc<dyn ChatModel> {
        Arc::new(ScriptedModel {
            behavior: self.behavior,
            revoked: api_key == REVOKED_KEY,
            calls: Arc::clone(&self.agent_calls),
        })
    }

    fn validation_model(&self, api_key: &str) -> Arc<dyn ChatModel> {
        Arc::new(ValidationModel {
            revoked: api_key == REVOKED_KEY,
            calls: Arc::clone(&self.validation_calls),
        })
    }
}

struct ValidationModel {
    revoked: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatModel for ValidationModel {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.revoked {
            return Err(LlmError::Authentication("Incorrect API key provided".into()));
        }
        Ok(ChatResponse {
            content: "ok".into(),
            tool_calls: Vec::new(),
        })
    }
}

struct ScriptedModel {
    behavior: Behavior,
    revoked: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.revoked {
            return Err(LlmError::Authentication("key revoked".into()));
        }

        let last = messages.last().cloned().unwrap_or_else(|| ChatMessage::user(""));
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let search = || ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call_{}", n),
                name: SEARCH_TOOL_NAME.into(),
                arguments: json!({ "query": question }).to_string(),
            }],
        };
        let say = |text: String| ChatResponse {
            content: text,
            tool_calls: Vec::new(),
        };

        match self.behavior {
            Behavior::AlwaysTool => Ok(search()),
            Behavior::Grounded if last.role == Role::Tool => {
                if last.content == NO_RESULTS {
                    Ok(say(REFUSAL_ANSWER.to_string()))
                } else {
                    Ok(say(format!("According to the documents:\n{}\n", last.content)))
                }
            }
            Behavior::Grounded if question.eq_ignore_ascii_case("hello") => {
                Ok(say("Hello! Ask me about your documents.".into()))
            }
            Behavior::Grounded => Ok(search()),
        }
    }
}

// ============ Session ============

pub struct TestEnv {
    pub tmp: tempfile::TempDir,
    pub session: Session,
    pub backend: Arc<ScriptedBackend>,
    pub clock: Arc<ManualClock>,
}

impl TestEnv {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_config(behavior, |_| {})
    }

    pub fn with_config(behavior: Behavior, tweak: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::with_data_dir(tmp.path().join("data"));
        tweak(&mut config);

        let backend = ScriptedBackend::new(behavior);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap(),
        ));
        let license = LicenseManager::with_clock(config.paths.license_file(), clock.clone());
        let session = Session::new(config, Arc::new(HashEmbedder), backend.clone(), license);

        Self {
            tmp,
            session,
            backend,
            clock,
        }
    }

    /// Write a PDF with one page per entry under the scratch `inbox/` dir.
    pub fn write_pdf(&self, name: &str, pages: &[&str]) -> PathBuf {
        write_pdf(&self.tmp.path().join("inbox"), name, pages)
    }
}

// ============ PDFs ============

pub fn write_pdf(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, pdf_with_pages(pages)).unwrap();
    path
}

/// Minimal PDF with one Helvetica text line per page.
///
/// Objects: 1 catalog, 2 page tree, 3 font, then a page and its content
/// stream for each page.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let kids = (0..pages.len())
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids,
            pages.len()
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        let page_obj = 4 + 2 * i;
        let content_obj = page_obj + 1;
        let escaped = text
            .replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)");
        let stream = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", escaped);

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj, content_obj
            )
            .as_bytes(),
        );
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_obj,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for off in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

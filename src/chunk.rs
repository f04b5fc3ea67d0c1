//! Recursive character text chunker.
//!
//! Splits page text into [`Chunk`]s of at most `chunk_size` characters with
//! up to `chunk_overlap` characters carried over between consecutive
//! chunks. Splitting prefers paragraph breaks, then line breaks, then
//! spaces, and only cuts inside a word when a word alone exceeds the limit.
//!
//! Lengths are counted in characters (Unicode scalar values), not bytes.

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Separators tried in order. The empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunk every page of one document, tagging each chunk with `source` and
/// its 0-based page. Indices are contiguous from 0 across the document.
pub fn split_pages(source: &str, pages: &[String], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for (page, text) in pages.iter().enumerate() {
        for piece in split_text(text, config.chunk_size, config.chunk_overlap) {
            chunks.push(Chunk {
                source: source.to_string(),
                page: page as u32,
                chunk_index,
                text: piece,
            });
            chunk_index += 1;
        }
    }

    chunks
}

/// Split a single text into overlapping windows.
///
/// Returns no chunks for empty or whitespace-only input.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let splitter = Splitter {
        chunk_size,
        chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
    };
    splitter.split(text, &SEPARATORS)
}

struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // First separator present in the text; the empty one always matches.
        let pos = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(pos).copied().unwrap_or("");
        let finer = separators.get(pos + 1..).unwrap_or(&[]);

        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_on(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                out.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                if let Some(p) = clean(piece) {
                    out.push(p);
                }
            } else {
                out.extend(self.split(piece, finer));
            }
        }

        if !pending.is_empty() {
            out.extend(self.merge(&pending, separator));
        }
        out
    }

    /// Greedily pack small pieces into windows, keeping a tail of the
    /// previous window (at most `chunk_overlap` chars) at the head of the next.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut out = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !window.is_empty() {
                if let Some(doc) = join(&window, separator) {
                    out.push(doc);
                }
                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if window.is_empty() { 0 } else { sep_len }
                            > self.chunk_size)
                {
                    let (_, first_len) = window.remove(0);
                    total -= first_len + if window.is_empty() { 0 } else { sep_len };
                }
            }

            let joiner = if window.is_empty() { 0 } else { sep_len };
            window.push((piece, len));
            total += len + joiner;
        }

        if let Some(doc) = join(&window, separator) {
            out.push(doc);
        }
        out
    }
}

fn split_on<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    }
}

fn join(window: &[(&str, usize)], separator: &str) -> Option<String> {
    let joined = window
        .iter()
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(separator);
    clean(&joined)
}

fn clean(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

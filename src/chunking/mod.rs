//! Paragraph-aware text chunking with character overlap
//!
//! Documents are split on blank lines and paragraphs are packed greedily into chunks
//! that stay within a soft character budget. Each new chunk is seeded with the tail
//! of the previous one so context survives the cut point.

use regex::Regex;
use std::sync::OnceLock;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

fn paragraph_break() -> &'static Regex {
    static BREAK: OnceLock<Regex> = OnceLock::new();
    BREAK.get_or_init(|| Regex::new(r"\n[ \t\r]*\n(?:[ \t\r]*\n)*").expect("valid regex"))
}

/// A bounded segment of a document, the unit of embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Dense, zero-based ordinal within the document
    pub chunk_id: usize,
    /// Full chunk text, overlap prefix included
    pub text: String,
    /// Byte length of the overlap prefix (seed text plus separator)
    overlap_len: usize,
}

impl Chunk {
    /// Text that belongs to this chunk, without the overlap carried from the previous one
    pub fn primary(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    /// Overlap text duplicated from the previous chunk, empty for the first chunk
    pub fn overlap(&self) -> &str {
        self.text[..self.overlap_len].trim_end_matches(PARAGRAPH_SEPARATOR)
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split text into non-empty, trimmed paragraphs
pub fn paragraphs(text: &str) -> Vec<&str> {
    paragraph_break()
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split `text` into overlapping chunks on paragraph boundaries
///
/// # Arguments
/// * `max_chars` - Soft budget per chunk; only a single over-long paragraph exceeds it
/// * `overlap` - Characters carried from the end of the previous chunk
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<Chunk> {
    let mut builder = ChunkBuilder::new(max_chars, overlap);
    for paragraph in paragraphs(text) {
        builder.push(paragraph);
    }
    builder.finish()
}

struct ChunkBuilder {
    max_chars: usize,
    overlap: usize,
    chunks: Vec<Chunk>,
    current: String,
    current_chars: usize,
    current_overlap_len: usize,
    has_primary: bool,
}

impl ChunkBuilder {
    fn new(max_chars: usize, overlap: usize) -> Self {
        Self {
            max_chars,
            overlap,
            chunks: Vec::new(),
            current: String::new(),
            current_chars: 0,
            current_overlap_len: 0,
            has_primary: false,
        }
    }

    fn push(&mut self, paragraph: &str) {
        let para_chars = paragraph.chars().count();

        if !self.has_primary {
            self.append(paragraph, para_chars);
            return;
        }

        let separator = if self.current.is_empty() { 0 } else { 2 };
        if self.current_chars + separator + para_chars <= self.max_chars {
            self.append(paragraph, para_chars);
            return;
        }

        let closed = self.close();
        self.seed(&closed, para_chars);
        self.append(paragraph, para_chars);
    }

    fn append(&mut self, paragraph: &str, para_chars: usize) {
        if !self.current.is_empty() {
            self.current.push_str(PARAGRAPH_SEPARATOR);
            self.current_chars += 2;
        }
        self.current.push_str(paragraph);
        self.current_chars += para_chars;
        self.has_primary = true;
    }

    /// Seed the next chunk with the tail of `closed`, shrunk so the seeded chunk fits
    fn seed(&mut self, closed: &str, para_chars: usize) {
        let room = self
            .max_chars
            .saturating_sub(para_chars + PARAGRAPH_SEPARATOR.len());
        let take = self.overlap.min(room);
        if take == 0 {
            return;
        }

        let tail = char_tail(closed, take).trim_start();
        if tail.is_empty() {
            return;
        }

        self.current.push_str(tail);
        self.current_chars = tail.chars().count();
        self.current_overlap_len = tail.len() + PARAGRAPH_SEPARATOR.len();
    }

    fn close(&mut self) -> String {
        let text = std::mem::take(&mut self.current);
        self.chunks.push(Chunk {
            chunk_id: self.chunks.len(),
            text: text.clone(),
            overlap_len: self.current_overlap_len,
        });
        self.current_chars = 0;
        self.current_overlap_len = 0;
        self.has_primary = false;
        text
    }

    fn finish(mut self) -> Vec<Chunk> {
        if self.has_primary {
            self.close();
        }
        self.chunks
    }
}

/// Last `n` characters of `s`, respecting char boundaries
fn char_tail(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if n >= total {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

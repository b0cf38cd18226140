//! Fixed-size document splitter.
//!
//! Splits source text into overlapping character windows and wraps them as
//! [`Chunk`]s with source provenance and sequence ids. All slicing is
//! clamped to UTF-8 character boundaries.

use crate::error::RagError;
use crate::store::Chunk;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitterConfig {
    /// Target window size in bytes (clamped to character boundaries).
    pub chunk_size: usize,
    /// Overlap between adjacent windows.
    pub chunk_overlap: usize,
}

#[derive(Debug)]
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    /// Overlap must be strictly smaller than the chunk size, otherwise the
    /// window would never advance.
    pub fn new(config: SplitterConfig) -> Result<Self, RagError> {
        if config.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".into()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> SplitterConfig {
        self.config
    }

    /// Split raw text into overlapping windows.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let stride = self.config.chunk_size - self.config.chunk_overlap;
        let mut windows = Vec::new();
        let mut start = 0usize;
        loop {
            let end = ceil_char_boundary(text, (start + self.config.chunk_size).min(text.len()));
            windows.push(text[start..end].to_string());
            if end >= text.len() {
                break;
            }
            start = floor_char_boundary(text, start + stride);
        }
        windows
    }

    /// Split one source document into chunks with provenance metadata.
    pub fn split_source(&self, source: &str, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(seq, content)| Chunk::new(content, source, seq))
            .collect()
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

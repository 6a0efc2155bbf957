//! Plain-text loader.
//!
//! Handles `.txt`, `.md`, and extension-less files. Long text is cut into
//! overlapping chunks on word boundaries; each chunk's byte offset feeds
//! its chunk id, so re-reading an unchanged file reproduces the same ids.

use std::path::Path;

use crate::chunker::chunk_text;
use crate::error::{SemangoError, SemangoResult};
use crate::loader::Loader;
use crate::types::{meta_keys, Modality, Representation};

/// Loader for plain text and markdown.
pub struct TextLoader {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextLoader {
    /// Build a text loader with the configured chunk window.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }
}

impl Loader for TextLoader {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md", "markdown", "rst", "org"]
    }

    fn load(&self, rel: &str, abs: &Path) -> SemangoResult<Vec<Representation>> {
        let content = std::fs::read_to_string(abs)
            .map_err(|e| SemangoError::loader(abs, format!("read failed: {e}")))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reps = chunk_text(&content, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .map(|(offset, chunk)| {
                Representation::new(rel, Modality::Text, offset, chunk)
                    .with_meta(meta_keys::SOURCE, self.name())
                    .with_meta(meta_keys::OFFSET, offset.to_string())
            })
            .collect();
        Ok(reps)
    }
}

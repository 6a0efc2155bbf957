//! Core domain types shared across all semango-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Modality
// ---------------------------------------------------------------------------

/// Semantic kind of a representation.
///
/// Only `Text` and `TableRow` are indexed end-to-end; the image and
/// PDF-page kinds exist so loaders for those formats can slot in without
/// a type change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Plain or chunked text.
    Text,
    /// A single row of a tabular source.
    TableRow,
    /// An image (not indexed by this core).
    Image,
    /// A single page of a PDF (not indexed by this core).
    PdfPage,
}

impl Modality {
    /// Returns the modality identifier string used in chunk ids and hits.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::TableRow => "table_row",
            Self::Image => "image",
            Self::PdfPage => "pdf_page",
        }
    }

    /// Parse from an identifier string, defaulting to `Text`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "table_row" => Self::TableRow,
            "image" => Self::Image,
            "pdf_page" => Self::PdfPage,
            _ => Self::Text,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chunk identity
// ---------------------------------------------------------------------------

/// Derive the stable chunk id for `(path, modality, offset)`.
///
/// The three fields are concatenated as raw bytes without separator and
/// hashed with SHA-256; the first 20 bytes are rendered as 40 lower-hex
/// characters. Deterministic across runs and filesystem state, so index
/// writes keyed by it are idempotent upserts.
pub fn chunk_id(path: &str, modality: Modality, offset: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(modality.as_str().as_bytes());
    hasher.update(offset.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..20])
}

// ---------------------------------------------------------------------------
// Metadata keys
// ---------------------------------------------------------------------------

/// Recognized keys in [`Representation::meta`].
pub mod meta_keys {
    /// Loader that produced the representation.
    pub const SOURCE: &str = "source";
    /// Byte offset of a positional chunk in its source text.
    pub const OFFSET: &str = "offset";
    /// Source-relative path, forward slashes.
    pub const PATH: &str = "path";
    /// Programming language of a code representation.
    pub const LANGUAGE: &str = "language";
    /// Row index of a tabular row representation.
    pub const ROW: &str = "row";
    /// Schema description of a tabular source.
    pub const SCHEMA: &str = "schema";
    /// Row count of a tabular source.
    pub const NUM_ROWS: &str = "num_rows";
    /// Prefix for raw column values of a tabular row (`col.<name>`).
    pub const COL_PREFIX: &str = "col.";
    /// Modality of the representation, stored so search results can
    /// report it without consulting the vector side.
    pub const MODALITY: &str = "modality";
}

// ---------------------------------------------------------------------------
// Representation
// ---------------------------------------------------------------------------

/// The unit of indexing: an identified chunk of content with optional
/// vector and metadata.
///
/// Created by a [`crate::loader::Loader`], mutated only to attach a
/// vector before indexing, and dropped once both indexes acknowledge
/// the write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Representation {
    /// Stable 40-hex chunk id. See [`chunk_id`].
    pub id: String,
    /// Source-relative path, forward slashes.
    pub path: String,
    /// Semantic kind of the content.
    pub modality: Modality,
    /// Extracted text. May be empty for non-text modalities.
    pub text: String,
    /// Dense embedding, attached by the pipeline before indexing.
    pub vector: Option<Vec<f32>>,
    /// String metadata. See [`meta_keys`] for recognized keys.
    pub meta: BTreeMap<String, String>,
}

impl Representation {
    /// Build a representation, deriving its id from `(path, modality, offset)`.
    ///
    /// `offset` is the byte offset for positional chunks, the row index
    /// for tabular rows, and 0 otherwise. Sets the `path` meta key; the
    /// loader is responsible for `source` and any loader-specific keys.
    pub fn new(path: impl Into<String>, modality: Modality, offset: usize, text: impl Into<String>) -> Self {
        let path = path.into();
        let id = chunk_id(&path, modality, offset);
        let mut meta = BTreeMap::new();
        meta.insert(meta_keys::PATH.to_string(), path.clone());
        Self {
            id,
            path,
            modality,
            text: text.into(),
            vector: None,
            meta,
        }
    }

    /// Insert a metadata entry, builder style.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Search types
// ---------------------------------------------------------------------------

/// A search result row with combined and per-side scores plus stored payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based position in the fused ranking.
    pub rank: usize,
    /// Fused relevance score (higher is better).
    pub score: f64,
    /// Raw BM25 score, 0.0 when the lexical side did not match.
    pub lexical_score: f64,
    /// Raw inner-product score, 0.0 when the semantic side did not match.
    pub semantic_score: f64,
    /// Modality of the matched representation.
    pub modality: Modality,
    /// Source-relative path of the matched representation.
    pub path: String,
    /// Stored chunk text.
    pub text: String,
    /// Stored metadata.
    pub meta: BTreeMap<String, String>,
    /// `(start, end)` char offsets of case-insensitive exact query matches
    /// in `text`. Populated only for ids the lexical search returned.
    /// Offsets are chunk-relative; add the `offset` meta for file-relative
    /// positions.
    pub highlights: Vec<(usize, usize)>,
}

/// Aggregate statistics over both indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of distinct source paths in the lexical index.
    pub total_documents: usize,
    /// Number of indexed chunks.
    pub total_chunks: usize,
    /// On-disk size of both indexes in bytes.
    pub index_size_bytes: u64,
}

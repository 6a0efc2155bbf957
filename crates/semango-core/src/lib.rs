//! # semango-core
//!
//! Core indexing and hybrid retrieval engine for Semango, a local
//! hybrid search engine over a configured file tree.
//!
//! The engine crawls the tree, extracts text from heterogeneous formats,
//! cuts it into chunks with stable identities, embeds each chunk, and
//! indexes it in both a lexical (BM25) inverted index and a flat vector
//! index under the same chunk id. Queries run both searches in parallel
//! and fuse the result lists into one ranking.
//!
//! ## Architecture
//!
//! The engine is split into decoupled subsystems:
//!
//! - **`config`** -- Configuration loading and validation
//! - **`crawler`** -- Filtered filesystem walk onto a bounded channel
//! - **`loader`** -- File-format loaders (text, code, tabular)
//! - **`chunker`** -- Overlapping word-boundary text chunking
//! - **`embedder`** -- Remote (OpenAI-compatible) and local (ONNX)
//!   embedding backends
//! - **`index`** -- Lexical BM25 index + flat vector index
//! - **`search`** -- Parallel hybrid retrieval with linear/RRF fusion
//! - **`pipeline`** -- Orchestrates ingestion and owns the subsystems
//!
//! Each module exposes a public trait or struct that the pipeline wires
//! together. Modules communicate via the types in `types`.

// Workspace lints are inherited from Cargo.toml

pub mod config;
pub mod error;
pub mod types;

// Core subsystems
pub mod chunker;
pub mod crawler;
pub mod embedder;
pub mod index;
pub mod loader;
pub mod pipeline;
pub mod search;

/// Re-export the primary engine interface.
pub use config::Config;
pub use error::{SemangoError, SemangoResult};
pub use pipeline::{Engine, IndexReport};
pub use types::{IndexStats, Representation, SearchHit};
